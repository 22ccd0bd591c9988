//! Cluster access abstraction.
//!
//! The controller consumes the cluster through the [`ClusterClient`] trait:
//! list+watch with selector parameters, point reads, whole-object updates
//! and label patches. The real transport lives outside this repository; the
//! [`memory`] module provides an in-process implementation for tests.
//!
//! ## Design Principles
//!
//! - **Read-modify-write**: updates replace the whole object the caller last
//!   observed; there are no blind patches apart from single-label patches
//! - **Watch fan-out**: a watch is a bounded channel of typed events; the
//!   producer applies the selector, the consumer never re-filters
//! - **Testability**: the in-memory implementation counts writes so tests
//!   can assert the no-redundant-write properties

pub mod memory;

use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::mpsc;

use gantry_core::pod::{Pod, PodPhase};
use gantry_core::workflow::Workflow;

use crate::error::Result;

/// A typed event delivered by a watch.
#[derive(Debug, Clone, PartialEq)]
pub enum WatchEvent<T> {
    /// The object appeared (or was listed for the first time).
    Added(T),
    /// The object changed. Resyncs re-deliver every object as Modified.
    Modified(T),
    /// The object was removed.
    Deleted(T),
}

impl<T> WatchEvent<T> {
    /// Consumes the event and returns the carried object.
    pub fn into_object(self) -> T {
        match self {
            Self::Added(obj) | Self::Modified(obj) | Self::Deleted(obj) => obj,
        }
    }

    /// Returns a reference to the carried object.
    pub const fn object(&self) -> &T {
        match self {
            Self::Added(obj) | Self::Modified(obj) | Self::Deleted(obj) => obj,
        }
    }
}

/// The receiving half of a watch.
pub type WatchStream<T> = mpsc::Receiver<WatchEvent<T>>;

/// One conjunctive label requirement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LabelTerm {
    /// The label must be present with exactly this value.
    Equals {
        /// Label key.
        key: String,
        /// Required value.
        value: String,
    },
    /// The label must be absent, or present with none of these values.
    NotIn {
        /// Label key.
        key: String,
        /// Excluded values.
        values: Vec<String>,
    },
}

impl LabelTerm {
    fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        match self {
            Self::Equals { key, value } => labels.get(key) == Some(value),
            Self::NotIn { key, values } => {
                labels.get(key).is_none_or(|actual| !values.contains(actual))
            }
        }
    }
}

/// Selector parameters for list and watch operations.
///
/// All terms are conjunctive. `excluded_phases` is the field-selector
/// equivalent of `status.phase!=X`; it only applies to pod queries and is
/// ignored for other kinds.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Selector {
    /// Namespace scope. `None` means all namespaces.
    pub namespace: Option<String>,

    /// Conjunctive label requirements.
    pub labels: Vec<LabelTerm>,

    /// Pod phases excluded from results.
    pub excluded_phases: Vec<PodPhase>,
}

impl Selector {
    /// Creates an empty selector matching everything.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Scopes the selector to one namespace. An empty string leaves the
    /// selector unscoped.
    #[must_use]
    pub fn in_namespace(mut self, namespace: impl Into<String>) -> Self {
        let namespace = namespace.into();
        self.namespace = (!namespace.is_empty()).then_some(namespace);
        self
    }

    /// Requires a label to be present with exactly the given value.
    #[must_use]
    pub fn label_equals(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.push(LabelTerm::Equals {
            key: key.into(),
            value: value.into(),
        });
        self
    }

    /// Requires a label to be absent or outside the given value set.
    #[must_use]
    pub fn label_not_in(mut self, key: impl Into<String>, values: Vec<String>) -> Self {
        self.labels.push(LabelTerm::NotIn {
            key: key.into(),
            values,
        });
        self
    }

    /// Excludes pods in the given phase.
    #[must_use]
    pub fn exclude_phase(mut self, phase: PodPhase) -> Self {
        self.excluded_phases.push(phase);
        self
    }

    /// Returns true if the namespace and labels satisfy every term.
    #[must_use]
    pub fn matches(&self, namespace: &str, labels: &BTreeMap<String, String>) -> bool {
        if let Some(scope) = &self.namespace {
            if scope != namespace {
                return false;
            }
        }
        self.labels.iter().all(|term| term.matches(labels))
    }

    /// Returns true if a pod satisfies the selector, including the phase
    /// exclusions.
    #[must_use]
    pub fn matches_pod(&self, pod: &Pod) -> bool {
        self.matches(&pod.metadata.namespace, &pod.metadata.labels)
            && !self.excluded_phases.contains(&pod.status.phase)
    }
}

/// A named configuration document stored in the cluster.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigDocument {
    /// Document name.
    pub name: String,

    /// Namespace the document lives in.
    pub namespace: String,

    /// Key/value payload.
    pub data: BTreeMap<String, String>,
}

impl ConfigDocument {
    /// Creates an empty document with the given identity.
    #[must_use]
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            data: BTreeMap::new(),
        }
    }
}

/// Cluster operations the controller depends on.
///
/// Implementations must deliver watch events in the order the cluster
/// observed them, per stream. There is no ordering guarantee across streams.
#[async_trait]
pub trait ClusterClient: Send + Sync {
    // --- Workflows ---

    /// Lists workflows matching the selector.
    async fn list_workflows(&self, selector: &Selector) -> Result<Vec<Workflow>>;

    /// Opens a watch over workflows matching the selector.
    async fn watch_workflows(&self, selector: &Selector) -> Result<WatchStream<Workflow>>;

    /// Reads one workflow. Returns `None` if it does not exist.
    async fn get_workflow(&self, namespace: &str, name: &str) -> Result<Option<Workflow>>;

    /// Replaces a workflow with the caller's copy.
    async fn update_workflow(&self, workflow: &Workflow) -> Result<Workflow>;

    // --- Pods ---

    /// Lists pods matching the selector.
    async fn list_pods(&self, selector: &Selector) -> Result<Vec<Pod>>;

    /// Opens a watch over pods matching the selector.
    async fn watch_pods(&self, selector: &Selector) -> Result<WatchStream<Pod>>;

    /// Creates a pod.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::Error::AlreadyExists`] when a pod with the
    /// same name already exists in the namespace.
    async fn create_pod(&self, pod: &Pod) -> Result<Pod>;

    /// Sets one label on a pod.
    async fn patch_pod_label(
        &self,
        namespace: &str,
        name: &str,
        key: &str,
        value: &str,
    ) -> Result<()>;

    // --- Configuration documents ---

    /// Reads a configuration document. Returns `None` if it does not exist.
    async fn get_config_document(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ConfigDocument>>;

    /// Opens a watch over one named configuration document.
    async fn watch_config_documents(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<WatchStream<ConfigDocument>>;
}
