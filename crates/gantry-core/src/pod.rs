//! The subset of the cluster's pod object the controller observes.
//!
//! Pods live in a separate lifetime domain from workflows; the controller
//! consumes their metadata, phase and container statuses, and mutates only
//! their labels.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::meta::ObjectMeta;

/// A pod as observed from the cluster.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pod {
    /// Resource identity.
    pub metadata: ObjectMeta,

    /// The declared container set.
    #[serde(default)]
    pub spec: PodSpec,

    /// Observed execution state.
    #[serde(default)]
    pub status: PodStatus,
}

/// Declared containers of a pod.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PodSpec {
    /// Init containers, run to completion before the main set starts.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub init_containers: Vec<Container>,

    /// Main containers, started together.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub containers: Vec<Container>,
}

/// A single container declaration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Container {
    /// Container name, unique within the pod.
    pub name: String,

    /// Container image reference.
    pub image: String,

    /// Entrypoint override.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub command: Vec<String>,

    /// Arguments to the entrypoint.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,

    /// Environment variables.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<EnvVar>,
}

/// A single environment variable on a container.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvVar {
    /// Variable name.
    pub name: String,

    /// Variable value.
    #[serde(default)]
    pub value: String,
}

/// Observed pod state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PodStatus {
    /// Coarse pod lifecycle phase.
    #[serde(default)]
    pub phase: PodPhase,

    /// Human-readable detail supplied by the cluster, if any.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,

    /// Pod IP, once assigned.
    #[serde(default, rename = "podIP", skip_serializing_if = "Option::is_none")]
    pub pod_ip: Option<String>,

    /// Statuses of init containers, in declaration order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub init_container_statuses: Vec<ContainerStatus>,

    /// Statuses of main containers, in declaration order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub container_statuses: Vec<ContainerStatus>,
}

/// Coarse pod lifecycle phase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PodPhase {
    /// Accepted but not all containers started.
    #[default]
    Pending,
    /// At least one container is running.
    Running,
    /// All containers terminated with exit code zero.
    Succeeded,
    /// All containers terminated and at least one failed.
    Failed,
    /// The pod state could not be obtained.
    #[serde(other)]
    Unknown,
}

impl fmt::Display for PodPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "Pending",
            Self::Running => "Running",
            Self::Succeeded => "Succeeded",
            Self::Failed => "Failed",
            Self::Unknown => "Unknown",
        };
        f.write_str(s)
    }
}

/// Observed state of one container.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerStatus {
    /// Container name.
    pub name: String,

    /// Whether the container passes its readiness check.
    #[serde(default)]
    pub ready: bool,

    /// Detailed container state.
    #[serde(default)]
    pub state: ContainerState,
}

/// Detailed state of a container. Only the terminated branch is observed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerState {
    /// Present once the container terminated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub terminated: Option<ContainerStateTerminated>,
}

/// Terminal state of a container.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerStateTerminated {
    /// Process exit code.
    #[serde(default)]
    pub exit_code: i32,

    /// Message the container or runtime left behind.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,

    /// When the container finished.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_phase_is_the_catch_all() {
        let phase: PodPhase = serde_json::from_str("\"Evicted\"").unwrap();
        assert_eq!(phase, PodPhase::Unknown);
    }

    #[test]
    fn terminated_state_round_trips() {
        let status = ContainerStatus {
            name: "main".into(),
            ready: false,
            state: ContainerState {
                terminated: Some(ContainerStateTerminated {
                    exit_code: 137,
                    message: "oom".into(),
                    finished_at: Some(Utc::now()),
                }),
            },
        };

        let json = serde_json::to_string(&status).unwrap();
        assert!(json.contains("exitCode"));
        let decoded: ContainerStatus = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, status);
    }

    #[test]
    fn pod_ip_uses_upper_case_wire_name() {
        let status = PodStatus {
            pod_ip: Some("10.1.2.3".into()),
            ..PodStatus::default()
        };
        let json = serde_json::to_string(&status).unwrap();
        assert!(json.contains("\"podIP\""));
    }
}
