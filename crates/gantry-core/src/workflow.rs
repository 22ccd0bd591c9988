//! The Workflow resource and its per-node execution status.
//!
//! A workflow is a user-declared graph of templates. The controller never
//! mutates the spec; all progress is recorded in `status.nodes`, a map from
//! node id to [`NodeStatus`]. For container nodes the node id equals the name
//! of the pod that executes it.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::contract::LABEL_KEY_COMPLETED;
use crate::meta::ObjectMeta;
use crate::pod::Container;

/// A persisted workflow resource.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Workflow {
    /// Resource identity.
    pub metadata: ObjectMeta,

    /// The user-declared execution graph.
    #[serde(default)]
    pub spec: WorkflowSpec,

    /// Controller-owned execution state.
    #[serde(default)]
    pub status: WorkflowStatus,
}

impl Workflow {
    /// Creates an empty workflow with the given name and namespace.
    #[must_use]
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            metadata: ObjectMeta::new(name, namespace),
            spec: WorkflowSpec::default(),
            status: WorkflowStatus::default(),
        }
    }

    /// Returns true if the workflow has been labelled completed.
    #[must_use]
    pub fn is_labelled_completed(&self) -> bool {
        self.metadata.has_label(LABEL_KEY_COMPLETED, "true")
    }
}

/// The declarative half of a workflow.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowSpec {
    /// Named templates forming the execution graph.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub templates: Vec<Template>,
}

/// One vertex of the declared execution graph.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Template {
    /// Template name, unique within the workflow.
    pub name: String,

    /// Names of templates that must succeed before this one runs.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<String>,

    /// Marks the template as a daemon: its pod keeps running after the node
    /// is considered done, and later steps may connect to it by pod IP.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub daemon: Option<bool>,

    /// The container to run for this template.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container: Option<Container>,
}

impl Template {
    /// Returns true if the template declares daemon semantics.
    #[must_use]
    pub fn is_daemon(&self) -> bool {
        self.daemon.unwrap_or(false)
    }
}

/// Controller-owned workflow state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowStatus {
    /// Aggregate workflow phase.
    #[serde(default)]
    pub phase: NodePhase,

    /// When the controller first started advancing the workflow.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,

    /// When the workflow reached a terminal phase.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,

    /// Human-readable detail for failed or errored workflows.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,

    /// Execution state per graph node, keyed by node id.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub nodes: BTreeMap<String, NodeStatus>,
}

impl WorkflowStatus {
    /// Returns true if every node reached a terminal phase.
    ///
    /// An empty node map is not complete: nothing has been scheduled yet.
    #[must_use]
    pub fn all_nodes_completed(&self) -> bool {
        !self.nodes.is_empty() && self.nodes.values().all(NodeStatus::is_completed)
    }
}

/// Execution state of one graph node.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeStatus {
    /// Node id. For container nodes this equals the owning pod's name.
    pub id: String,

    /// Current phase.
    #[serde(default)]
    pub phase: NodePhase,

    /// Present when the node is a daemon whose pod must keep running.
    ///
    /// Absence and `false` are equivalent; the controller normalises `false`
    /// to absent before persisting.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub daemoned: Option<bool>,

    /// IP of the owning pod. Only tracked for daemoned nodes.
    #[serde(default, rename = "podIP", skip_serializing_if = "Option::is_none")]
    pub pod_ip: Option<String>,

    /// Structured result published by the executor. Set at most once.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outputs: Option<Outputs>,

    /// Human-readable failure detail.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,

    /// When the node started executing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,

    /// When the node reached a terminal phase. Set exactly when the phase is
    /// terminal and never overwritten once set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl NodeStatus {
    /// Creates a pending node with the given id.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    /// Returns true if the node reached a terminal phase.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.phase.is_completed()
    }

    /// Returns true if the node is currently marked as a daemon.
    #[must_use]
    pub fn is_daemoned(&self) -> bool {
        self.daemoned.unwrap_or(false)
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.id, self.phase)
    }
}

/// Phase of a workflow node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodePhase {
    /// Waiting to be scheduled.
    #[default]
    Pending,
    /// The owning pod is executing.
    Running,
    /// Finished successfully. Terminal.
    Succeeded,
    /// Never ran because an upstream dependency failed. Terminal.
    Skipped,
    /// The user workload failed. Terminal.
    Failed,
    /// Infrastructure failure unrelated to the user workload. Terminal.
    Error,
}

impl NodePhase {
    /// Returns true for the terminal phases.
    #[must_use]
    pub const fn is_completed(self) -> bool {
        matches!(
            self,
            Self::Succeeded | Self::Skipped | Self::Failed | Self::Error
        )
    }

    /// Returns true for the terminal phases that do not represent success.
    #[must_use]
    pub const fn is_unsuccessful(self) -> bool {
        matches!(self, Self::Failed | Self::Error)
    }
}

impl fmt::Display for NodePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "Pending",
            Self::Running => "Running",
            Self::Succeeded => "Succeeded",
            Self::Skipped => "Skipped",
            Self::Failed => "Failed",
            Self::Error => "Error",
        };
        f.write_str(s)
    }
}

/// Structured result a node publishes through the executor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Outputs {
    /// Named output parameters.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parameters: Vec<Parameter>,

    /// Named output artifacts.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub artifacts: Vec<Artifact>,

    /// Raw result string, when the template captures stdout.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
}

/// A single named output parameter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Parameter {
    /// Parameter name.
    pub name: String,

    /// Parameter value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

/// A single named output artifact.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Artifact {
    /// Artifact name.
    pub name: String,

    /// Path inside the container the artifact was collected from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}
