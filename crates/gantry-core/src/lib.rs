//! # gantry-core
//!
//! Shared resource model for the gantry workflow controller.
//!
//! This crate provides the types every gantry component agrees on:
//!
//! - **Workflow model**: the `Workflow` resource, its template spec and its
//!   per-node execution status
//! - **Pod model**: the subset of the cluster's pod object the controller
//!   observes and mutates
//! - **Wire contract**: the label keys, annotation keys and container names
//!   shared with the executor sidecar
//! - **Observability**: logging initialization and span helpers
//!
//! ## Crate Boundary
//!
//! `gantry-core` is the only crate allowed to define the wire contract.
//! Anything that crosses a process boundary (labels, annotations, the
//! configuration document) is named here and nowhere else.
//!
//! ## Example
//!
//! ```rust
//! use gantry_core::prelude::*;
//!
//! let mut workflow = Workflow::new("pipeline", "batch");
//! workflow.status.nodes.insert(
//!     "pipeline-extract".to_string(),
//!     NodeStatus::new("pipeline-extract"),
//! );
//! assert!(!workflow.status.nodes["pipeline-extract"].phase.is_completed());
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod contract;
pub mod meta;
pub mod observability;
pub mod pod;
pub mod workflow;

/// Prelude module for convenient imports.
///
/// # Example
///
/// ```rust
/// use gantry_core::prelude::*;
/// ```
pub mod prelude {
    pub use crate::meta::ObjectMeta;
    pub use crate::pod::{
        Container, ContainerState, ContainerStateTerminated, ContainerStatus, EnvVar, Pod,
        PodPhase, PodSpec, PodStatus,
    };
    pub use crate::workflow::{
        NodePhase, NodeStatus, Outputs, Parameter, Template, Workflow, WorkflowSpec,
        WorkflowStatus,
    };
}
