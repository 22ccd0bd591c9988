//! # gantry-controller
//!
//! The reconciling controller at the heart of gantry. It observes two
//! independent event streams (workflow objects, and the pods that execute
//! their nodes) and drives each workflow's status forward until every node
//! of its graph reaches a terminal phase.
//!
//! ## Architecture
//!
//! - **Event sources** ([`sources`]): three long-lived list+watch streams
//!   (config, workflows, pods) feeding two bounded queues
//! - **Dispatch loop** ([`controller`]): a single consumer draining both
//!   queues, giving a total order over observed events
//! - **Workflow operator** ([`operator`]): materialises pods for ready graph
//!   nodes and records workflow completion
//! - **Pod reconciler** ([`reconciler`]): translates one pod observation
//!   into at most one write against the owning workflow's status
//! - **Config store** ([`config`]): hot-reloadable controller configuration
//! - **Completed-pod cache** ([`cache`]): suppresses straggler events for
//!   pods whose outcome is already recorded
//!
//! ## Guarantees
//!
//! - **At-least-once**: every component tolerates redelivery; reconciliation
//!   is idempotent and produces no writes when nothing changed
//! - **Single-writer dispatch**: the operator and reconciler never run
//!   concurrently with each other or with themselves
//! - **Crash-tolerant**: all state is a projection of in-cluster objects
//!   plus rebuildable process-local caches

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

// Internal module - not exposed in public API.
pub(crate) mod dag;

pub mod cache;
pub mod cluster;
pub mod config;
pub mod controller;
pub mod error;
pub mod metrics;
pub mod operator;
pub mod reconciler;
pub mod sources;
pub mod stats;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::cache::CompletedPodCache;
    pub use crate::cluster::memory::InMemoryCluster;
    pub use crate::cluster::{ClusterClient, ConfigDocument, LabelTerm, Selector, WatchEvent};
    pub use crate::config::{ArtifactRepository, ConfigStore, ControllerConfig};
    pub use crate::controller::WorkflowController;
    pub use crate::error::{Error, Result};
    pub use crate::operator::{ContainerPodFactory, PodFactory, WorkflowOperator};
    pub use crate::reconciler::PodReconciler;
}
