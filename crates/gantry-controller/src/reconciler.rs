//! Pod → node status reconciliation.
//!
//! Each pod observation is translated into a patch against exactly one node
//! of the owning workflow's status, then persisted with at most one write.
//! Once a non-daemon node's outcome is recorded the pod is labelled
//! `completed=true` so the watch stops delivering it; daemoned pods stay
//! unlabelled because their eventual termination must still be observed.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use metrics::{counter, histogram};

use gantry_core::contract::{
    ANNOTATION_KEY_NODE_MESSAGE, ANNOTATION_KEY_OUTPUTS, ANNOTATION_KEY_TEMPLATE,
    LABEL_KEY_COMPLETED, LABEL_KEY_WORKFLOW, MAIN_CONTAINER_NAME, WAIT_CONTAINER_NAME,
};
use gantry_core::pod::{Pod, PodPhase};
use gantry_core::workflow::{NodePhase, NodeStatus, Outputs, Template};

use crate::cache::CompletedPodCache;
use crate::cluster::ClusterClient;
use crate::metrics::{TimingGuard, labels as metrics_labels, names as metrics_names};

/// Translates pod observations into node-status transitions.
pub struct PodReconciler {
    client: Arc<dyn ClusterClient>,
    completed_pods: Arc<CompletedPodCache>,
}

impl PodReconciler {
    /// Creates a reconciler.
    #[must_use]
    pub fn new(client: Arc<dyn ClusterClient>, completed_pods: Arc<CompletedPodCache>) -> Self {
        Self {
            client,
            completed_pods,
        }
    }

    /// Reconciles one pod observation.
    ///
    /// Produces at most one workflow write and at most one label patch.
    /// Every failure is logged and absorbed; correction comes from the next
    /// event or the resync.
    pub async fn handle_pod_update(&self, pod: Pod) {
        let _timing = TimingGuard::new(|duration| {
            histogram!(metrics_names::POD_RECONCILE_SECONDS).record(duration.as_secs_f64());
        });
        let outcome = self.reconcile(pod).await;
        counter!(
            metrics_names::POD_RECONCILES_TOTAL,
            metrics_labels::OUTCOME => outcome,
        )
        .increment(1);
    }

    #[allow(clippy::too_many_lines)]
    async fn reconcile(&self, pod: Pod) -> &'static str {
        let pod_name = pod.metadata.name.clone();
        if self.completed_pods.seen(&pod_name) {
            return "skipped_cached";
        }
        if pod.metadata.has_label(LABEL_KEY_COMPLETED, "true") {
            return "skipped_completed";
        }
        let Some(workflow_name) = pod.metadata.label(LABEL_KEY_WORKFLOW) else {
            // Shouldn't happen unless the watch selector is set up wrong.
            tracing::warn!(pod = %pod_name, "watch returned pod unrelated to any workflow");
            return "orphan";
        };
        let workflow_name = workflow_name.to_string();

        let new_phase: NodePhase;
        let new_daemon_status: Option<bool>;
        let mut message = String::new();
        match pod.status.phase {
            PodPhase::Pending => {
                // Filtered out by the watch; seeing one means the selector
                // is set up wrong.
                tracing::warn!(pod = %pod_name, "watch returned a Pending pod");
                return "unexpected_phase";
            }
            PodPhase::Succeeded => {
                new_phase = NodePhase::Succeeded;
                new_daemon_status = Some(false);
            }
            PodPhase::Failed => {
                let (phase, daemon, msg) = infer_failed_reason(&pod);
                new_phase = phase;
                new_daemon_status = daemon;
                message = msg;
            }
            PodPhase::Running => {
                let Some(template_json) = pod.metadata.annotation(ANNOTATION_KEY_TEMPLATE) else {
                    tracing::warn!(pod = %pod_name, "missing template annotation");
                    return "bad_annotation";
                };
                let template: Template = match serde_json::from_str(template_json) {
                    Ok(template) => template,
                    Err(err) => {
                        tracing::warn!(pod = %pod_name, error = %err, "template annotation unreadable");
                        return "bad_annotation";
                    }
                };
                if !template.is_daemon() {
                    // Incidental state change of a running pod; nothing to do.
                    return "noop";
                }
                // Running and marked daemon: the node succeeds once every
                // container reports ready.
                if pod.status.container_statuses.iter().any(|c| !c.ready) {
                    return "noop";
                }
                tracing::info!(pod = %pod_name, "processing ready daemon pod");
                new_phase = NodePhase::Succeeded;
                new_daemon_status = Some(true);
            }
            PodPhase::Unknown => {
                tracing::info!(pod = %pod_name, phase = %pod.status.phase, "unexpected pod phase");
                new_phase = NodePhase::Error;
                new_daemon_status = None;
            }
        }

        let mut workflow = match self
            .client
            .get_workflow(&pod.metadata.namespace, &workflow_name)
            .await
        {
            Ok(Some(workflow)) => workflow,
            Ok(None) => {
                tracing::warn!(workflow = %workflow_name, pod = %pod_name, "workflow not found");
                return "orphan";
            }
            Err(err) => {
                tracing::warn!(workflow = %workflow_name, error = %err, "failed to read workflow");
                return "error";
            }
        };
        let Some(node) = workflow.status.nodes.get(&pod_name) else {
            tracing::warn!(pod = %pod_name, workflow = %workflow_name, "pod unassociated with workflow");
            return "orphan";
        };
        let mut node = node.clone();

        let update_needed = apply_updates(&pod, &mut node, new_phase, new_daemon_status, &message);
        if update_needed {
            workflow.status.nodes.insert(pod_name.clone(), node.clone());
            if let Err(err) = self.client.update_workflow(&workflow).await {
                // Rely on the resync to catch up.
                tracing::warn!(node = %node, error = %err, "failed to update workflow status");
                return "error";
            }
            tracing::info!(node = %node, "updated workflow node");
        } else {
            tracing::debug!(node = %node, pod_phase = %pod.status.phase, "no workflow update needed");
        }

        if node.is_completed() {
            // Decide whether to stop watching this pod. Daemoned pods stay
            // unlabelled: their eventual termination must still be
            // delivered so the daemon status can be revised.
            if node.is_daemoned() {
                tracing::info!(node = %node, "skipping completed labelling for daemoned pod");
            } else {
                if let Err(err) = self
                    .client
                    .patch_pod_label(&pod.metadata.namespace, &pod_name, LABEL_KEY_COMPLETED, "true")
                    .await
                {
                    // The next event for this pod retries the label.
                    tracing::warn!(node = %node, error = %err, "failed to label completed pod");
                    return "error";
                }
                self.completed_pods.insert(pod_name.clone());
                tracing::info!(node = %node, "labelled pod completed");
            }
        }

        if update_needed { "updated" } else { "noop" }
    }
}

/// Examines a Failed pod to determine why, returning the node phase, the
/// daemon opinion and the message to record.
///
/// Artifact handling failures (init containers loading inputs, the wait
/// sidecar saving outputs) classify as `Error`; failures of the user's own
/// containers classify as `Failed`.
#[must_use]
pub fn infer_failed_reason(pod: &Pod) -> (NodePhase, Option<bool>, String) {
    if !pod.status.message.is_empty() {
        // The cluster supplied a message. Use that.
        return (NodePhase::Failed, Some(false), pod.status.message.clone());
    }

    let annotated_message = pod
        .metadata
        .annotation(ANNOTATION_KEY_NODE_MESSAGE)
        .unwrap_or_default();

    // Only one message ends up on the node. Order of preference when
    // multiple containers failed: init, main, wait, sidecars.
    for container in &pod.status.init_container_statuses {
        let Some(terminated) = &container.state.terminated else {
            tracing::warn!(
                pod = %pod.metadata.name,
                container = %container.name,
                "pod phase was Failed but container has no terminated state"
            );
            continue;
        };
        if terminated.exit_code == 0 {
            continue;
        }
        let message = suffixed_message(
            "failed to load artifacts",
            annotated_message,
            &terminated.message,
        );
        return (NodePhase::Error, Some(false), message);
    }

    // Declaration order, so the "first failure" fallback below is
    // deterministic.
    let mut failures: Vec<(&str, String)> = Vec::new();
    for container in &pod.status.container_statuses {
        let Some(terminated) = &container.state.terminated else {
            tracing::warn!(
                pod = %pod.metadata.name,
                container = %container.name,
                "pod phase was Failed but container has no terminated state"
            );
            continue;
        };
        if terminated.exit_code == 0 {
            continue;
        }
        let message = if container.name == WAIT_CONTAINER_NAME {
            suffixed_message(
                "failed to save artifacts",
                annotated_message,
                &terminated.message,
            )
        } else if terminated.message.is_empty() {
            format!("failed with exit code {}", terminated.exit_code)
        } else {
            terminated.message.clone()
        };
        failures.push((container.name.as_str(), message));
    }

    if let Some((_, message)) = failures.iter().find(|(name, _)| *name == MAIN_CONTAINER_NAME) {
        return (NodePhase::Failed, Some(false), message.clone());
    }
    if let Some((_, message)) = failures.iter().find(|(name, _)| *name == WAIT_CONTAINER_NAME) {
        return (NodePhase::Error, Some(false), message.clone());
    }

    // Main and wait both succeeded; a sidecar carried the failure. The
    // executor may have had to terminate it forcefully, or it may be
    // expected to exit non-zero. Report the first failure in declaration
    // order until per-sidecar policy exists.
    if let Some((_, message)) = failures.first() {
        return (NodePhase::Failed, Some(false), message.clone());
    }
    (
        NodePhase::Failed,
        Some(false),
        "pod failed for unknown reason".to_string(),
    )
}

fn suffixed_message(prefix: &str, annotated: &str, terminated: &str) -> String {
    for candidate in [annotated, terminated] {
        if !candidate.is_empty() {
            return format!("{prefix}: {candidate}");
        }
    }
    prefix.to_string()
}

/// Applies new pod-derived state to a node, computing the minimal mutation.
///
/// Returns whether any field changed (and the workflow therefore needs to
/// be written).
#[must_use]
pub fn apply_updates(
    pod: &Pod,
    node: &mut NodeStatus,
    new_phase: NodePhase,
    new_daemon_status: Option<bool>,
    message: &str,
) -> bool {
    let mut update_needed = false;

    if node.phase != new_phase {
        // A terminal phase is immutable, with one sanctioned exception: a
        // daemoned node optimistically marked Succeeded may be revised to
        // Failed or Error when its pod finally terminates unhealthily.
        let daemon_revision = node.is_daemoned() && new_phase.is_unsuccessful();
        if node.is_completed() && !daemon_revision {
            tracing::info!(node = %node, from = %node.phase, to = %new_phase, "ignoring node phase change");
        } else {
            tracing::info!(node = %node, from = %node.phase, to = %new_phase, "updating node phase");
            node.phase = new_phase;
            update_needed = true;
        }
    }

    if let Some(daemon) = new_daemon_status {
        // Absent and false are equivalent; normalise false to absent so a
        // presence check is enough everywhere else.
        let target = daemon.then_some(true);
        if target.is_some() != node.daemoned.is_some() {
            tracing::info!(node = %node, daemoned = daemon, "flipping node daemon status");
            node.daemoned = target;
            update_needed = true;
            if node.daemoned.is_some() {
                // Pod IP is only tracked for daemons to reduce write volume.
                if node.pod_ip != pod.status.pod_ip {
                    node.pod_ip.clone_from(&pod.status.pod_ip);
                }
            } else {
                node.pod_ip = None;
            }
        }
    }

    if let Some(outputs_json) = pod.metadata.annotation(ANNOTATION_KEY_OUTPUTS) {
        if node.outputs.is_none() {
            update_needed = true;
            match serde_json::from_str::<Outputs>(outputs_json) {
                Ok(outputs) => {
                    tracing::info!(node = %node, "setting node outputs");
                    node.outputs = Some(outputs);
                }
                Err(err) => {
                    tracing::warn!(node = %node, error = %err, "failed to decode outputs annotation");
                    node.phase = NodePhase::Error;
                }
            }
        }
    }

    if !message.is_empty() && node.message != message {
        tracing::info!(node = %node, new_message = message, "updating node message");
        node.message = message.to_string();
        update_needed = true;
    }

    if node.is_completed() && node.finished_at.is_none() {
        if !node.is_daemoned() {
            // Use the latest container finish time: the controller may be
            // backlogged or have been down when the pod finished.
            node.finished_at = latest_container_finish(pod);
        }
        if node.finished_at.is_none() {
            // Daemoned, or no container reported a timestamp.
            node.finished_at = Some(Utc::now());
        }
        update_needed = true;
    }

    update_needed
}

fn latest_container_finish(pod: &Pod) -> Option<DateTime<Utc>> {
    pod.status
        .init_container_statuses
        .iter()
        .chain(&pod.status.container_statuses)
        .filter_map(|c| c.state.terminated.as_ref())
        .filter_map(|t| t.finished_at)
        .max()
}
