//! The workflow operator.
//!
//! `operate` advances one workflow toward completion: it materialises pods
//! for graph nodes whose dependencies have succeeded, records nodes that can
//! never run because an upstream failed, and marks the workflow terminal
//! once every node is.
//!
//! ## Contract
//!
//! - **Idempotent**: operating on a workflow whose graph made no progress
//!   produces no writes
//! - **Partial-failure tolerant**: a pod created without the matching status
//!   write is re-derived on the next invocation (the duplicate create is
//!   tolerated), so truth always reconverges from observable cluster state

use std::sync::Arc;

use chrono::Utc;
use metrics::counter;
use serde_json::json;

use gantry_core::contract::{
    ANNOTATION_KEY_TEMPLATE, ENV_ARTIFACT_REPOSITORY, LABEL_KEY_COMPLETED, LABEL_KEY_WORKFLOW,
    MAIN_CONTAINER_NAME, WAIT_CONTAINER_NAME,
};
use gantry_core::pod::{Container, EnvVar, Pod, PodSpec};
use gantry_core::workflow::{NodePhase, NodeStatus, Template, Workflow};

use crate::cluster::ClusterClient;
use crate::config::{ConfigStore, ControllerConfig};
use crate::dag::TemplateGraph;
use crate::error::{Error, Result};
use crate::metrics::{labels as metrics_labels, names as metrics_names};

/// Renders the pod that executes one graph node.
///
/// Pod-spec generation is a seam: callers may substitute their own factory,
/// e.g. to add volumes or scheduling constraints.
pub trait PodFactory: Send + Sync {
    /// Builds the pod for `node_id` from the given template.
    ///
    /// # Errors
    ///
    /// Returns an error when the template cannot be turned into a pod.
    fn render(
        &self,
        workflow: &Workflow,
        template: &Template,
        node_id: &str,
        config: &ControllerConfig,
    ) -> Result<Pod>;
}

/// Default pod factory: one main container from the template plus the
/// executor `wait` sidecar, stamped with the wire-contract labels and the
/// template annotation.
#[derive(Debug, Default, Clone, Copy)]
pub struct ContainerPodFactory;

impl PodFactory for ContainerPodFactory {
    fn render(
        &self,
        workflow: &Workflow,
        template: &Template,
        node_id: &str,
        config: &ControllerConfig,
    ) -> Result<Pod> {
        let mut main = template.container.clone().ok_or_else(|| {
            Error::invalid_workflow(format!(
                "template '{}' does not declare a container",
                template.name
            ))
        })?;
        main.name = MAIN_CONTAINER_NAME.to_string();

        let artifact_repository = serde_json::to_string(&json!({
            "artifactRepository": config.artifact_repository,
        }))
        .map_err(|e| Error::serialization(format!("artifact repository encoding: {e}")))?;

        let wait = Container {
            name: WAIT_CONTAINER_NAME.to_string(),
            image: config.executor_image.clone(),
            command: Vec::new(),
            args: Vec::new(),
            env: vec![EnvVar {
                name: ENV_ARTIFACT_REPOSITORY.to_string(),
                value: artifact_repository,
            }],
        };

        let mut pod = Pod::default();
        pod.metadata.name = node_id.to_string();
        pod.metadata.namespace = workflow.metadata.namespace.clone();
        pod.metadata
            .labels
            .insert(LABEL_KEY_WORKFLOW.to_string(), workflow.metadata.name.clone());
        pod.metadata
            .labels
            .insert(LABEL_KEY_COMPLETED.to_string(), "false".to_string());
        for (key, value) in &config.match_labels {
            pod.metadata.labels.insert(key.clone(), value.clone());
        }
        let template_json = serde_json::to_string(template)
            .map_err(|e| Error::serialization(format!("template encoding: {e}")))?;
        pod.metadata
            .annotations
            .insert(ANNOTATION_KEY_TEMPLATE.to_string(), template_json);
        pod.spec = PodSpec {
            init_containers: Vec::new(),
            containers: vec![main, wait],
        };
        Ok(pod)
    }
}

/// Advances workflows by materialising pods and recording completion.
pub struct WorkflowOperator {
    client: Arc<dyn ClusterClient>,
    config: Arc<ConfigStore>,
    pod_factory: Arc<dyn PodFactory>,
}

impl WorkflowOperator {
    /// Creates an operator using the default pod factory.
    #[must_use]
    pub fn new(client: Arc<dyn ClusterClient>, config: Arc<ConfigStore>) -> Self {
        Self::with_pod_factory(client, config, Arc::new(ContainerPodFactory))
    }

    /// Creates an operator with a custom pod factory.
    #[must_use]
    pub fn with_pod_factory(
        client: Arc<dyn ClusterClient>,
        config: Arc<ConfigStore>,
        pod_factory: Arc<dyn PodFactory>,
    ) -> Self {
        Self {
            client,
            config,
            pod_factory,
        }
    }

    /// Ensures the workflow's graph advances.
    ///
    /// Every failure is logged and absorbed; the next watch event or resync
    /// re-derives the intended state.
    pub async fn operate(&self, workflow: Workflow) {
        let outcome = self.advance(workflow).await;
        counter!(
            metrics_names::WORKFLOW_OPERATIONS_TOTAL,
            metrics_labels::OUTCOME => outcome,
        )
        .increment(1);
    }

    async fn advance(&self, workflow: Workflow) -> &'static str {
        if workflow.is_labelled_completed() {
            return "noop";
        }

        let config = self.config.snapshot();
        let mut wf = workflow;
        let mut changed = false;

        let graph = match TemplateGraph::build(&wf.spec.templates) {
            Ok(graph) => graph,
            Err(err) => {
                tracing::warn!(workflow = %wf.metadata.name, error = %err, "unrunnable workflow spec");
                finalize_workflow(&mut wf, NodePhase::Error, err.to_string());
                return self.persist(&wf).await;
            }
        };

        if wf.status.phase == NodePhase::Pending {
            wf.status.phase = NodePhase::Running;
            wf.status.started_at = Some(Utc::now());
            changed = true;
        }

        for name in graph.sorted() {
            let Some(template) = wf.spec.templates.iter().find(|t| &t.name == name) else {
                continue;
            };
            let node_id = pod_name(&wf.metadata.name, name);
            if wf.status.nodes.contains_key(&node_id) {
                // The pod reconciler owns the node from here on.
                continue;
            }

            match dependency_gate(&wf, template) {
                DependencyGate::Blocked(reason) => {
                    tracing::info!(workflow = %wf.metadata.name, node = %node_id, %reason, "skipping node");
                    let mut node = NodeStatus::new(&node_id);
                    node.phase = NodePhase::Skipped;
                    node.message = format!("omitted: {reason}");
                    node.finished_at = Some(Utc::now());
                    wf.status.nodes.insert(node_id, node);
                    changed = true;
                }
                DependencyGate::NotReady => {}
                DependencyGate::Ready => {
                    let template = template.clone();
                    if self.schedule_node(&mut wf, &template, &node_id, &config).await {
                        changed = true;
                    }
                }
            }
        }

        if record_completion(&mut wf) {
            changed = true;
        }

        if changed {
            self.persist(&wf).await
        } else {
            "noop"
        }
    }

    /// Creates the pod for a ready node and records its node status.
    /// Returns whether the workflow changed.
    async fn schedule_node(
        &self,
        wf: &mut Workflow,
        template: &Template,
        node_id: &str,
        config: &ControllerConfig,
    ) -> bool {
        let pod = match self.pod_factory.render(wf, template, node_id, config) {
            Ok(pod) => pod,
            Err(err) => {
                tracing::warn!(workflow = %wf.metadata.name, node = %node_id, error = %err, "pod rendering failed");
                let mut node = NodeStatus::new(node_id);
                node.phase = NodePhase::Error;
                node.message = err.to_string();
                node.finished_at = Some(Utc::now());
                wf.status.nodes.insert(node_id.to_string(), node);
                return true;
            }
        };

        match self.client.create_pod(&pod).await {
            Ok(_) => {
                tracing::info!(workflow = %wf.metadata.name, node = %node_id, "created pod");
            }
            Err(err) if err.is_already_exists() => {
                // A previous invocation created the pod but lost the status
                // write; adopt it.
                tracing::debug!(workflow = %wf.metadata.name, node = %node_id, "pod already exists");
            }
            Err(err) => {
                tracing::warn!(workflow = %wf.metadata.name, node = %node_id, error = %err, "pod create failed");
                return false;
            }
        }

        let mut node = NodeStatus::new(node_id);
        node.started_at = Some(Utc::now());
        wf.status.nodes.insert(node_id.to_string(), node);
        true
    }

    async fn persist(&self, wf: &Workflow) -> &'static str {
        match self.client.update_workflow(wf).await {
            Ok(_) => "updated",
            Err(err) => {
                tracing::warn!(workflow = %wf.metadata.name, error = %err, "workflow update failed");
                "error"
            }
        }
    }
}

/// Pod (and node) name for one template of a workflow.
#[must_use]
pub fn pod_name(workflow_name: &str, template_name: &str) -> String {
    format!("{workflow_name}-{template_name}")
}

enum DependencyGate {
    Ready,
    NotReady,
    Blocked(String),
}

fn dependency_gate(wf: &Workflow, template: &Template) -> DependencyGate {
    for dependency in &template.dependencies {
        let dep_id = pod_name(&wf.metadata.name, dependency);
        match wf.status.nodes.get(&dep_id) {
            Some(node) if node.phase == NodePhase::Succeeded => {}
            Some(node) if node.is_completed() => {
                return DependencyGate::Blocked(format!(
                    "upstream step '{dependency}' {}",
                    node.phase
                ));
            }
            _ => return DependencyGate::NotReady,
        }
    }
    DependencyGate::Ready
}

/// Records workflow-level completion once every node is terminal.
/// Returns whether the workflow changed.
fn record_completion(wf: &mut Workflow) -> bool {
    let empty_spec = wf.spec.templates.is_empty();
    let graph_done = !empty_spec
        && wf.status.nodes.len() == wf.spec.templates.len()
        && wf.status.all_nodes_completed();
    if !(empty_spec || graph_done) || wf.status.phase.is_completed() {
        return false;
    }

    let nodes = wf.status.nodes.values();
    let phase = if nodes.clone().any(|n| n.phase == NodePhase::Failed) {
        NodePhase::Failed
    } else if nodes.clone().any(|n| n.phase == NodePhase::Error) {
        NodePhase::Error
    } else {
        NodePhase::Succeeded
    };
    let message = wf
        .status
        .nodes
        .values()
        .find(|n| n.phase.is_unsuccessful())
        .map(|n| n.message.clone())
        .unwrap_or_default();

    finalize_workflow(wf, phase, message);
    true
}

/// Stamps a terminal phase, message and the completed label on a workflow.
fn finalize_workflow(wf: &mut Workflow, phase: NodePhase, message: String) {
    wf.status.phase = phase;
    wf.status.message = message;
    if wf.status.finished_at.is_none() {
        wf.status.finished_at = Some(Utc::now());
    }
    wf.metadata
        .labels
        .insert(LABEL_KEY_COMPLETED.to_string(), "true".to_string());
    tracing::info!(workflow = %wf.metadata.name, phase = %phase, "workflow completed");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pod_names_join_workflow_and_template() {
        assert_eq!(pod_name("pipeline", "extract"), "pipeline-extract");
    }

    #[test]
    fn factory_renders_main_and_wait_containers() {
        let mut wf = Workflow::new("pipeline", "batch");
        let template = Template {
            name: "extract".into(),
            container: Some(Container {
                name: String::new(),
                image: "busybox:1.36".into(),
                command: vec!["sh".into(), "-c".into()],
                args: vec!["echo done".into()],
                env: Vec::new(),
            }),
            ..Template::default()
        };
        wf.spec.templates.push(template.clone());
        let config = ControllerConfig {
            executor_image: "gantry/executor:v1".into(),
            ..ControllerConfig::default()
        };

        let pod = ContainerPodFactory
            .render(&wf, &template, "pipeline-extract", &config)
            .unwrap();

        assert_eq!(pod.metadata.name, "pipeline-extract");
        assert_eq!(pod.metadata.namespace, "batch");
        assert_eq!(pod.metadata.label(LABEL_KEY_WORKFLOW), Some("pipeline"));
        assert_eq!(pod.metadata.label(LABEL_KEY_COMPLETED), Some("false"));
        assert!(pod.metadata.annotation(ANNOTATION_KEY_TEMPLATE).is_some());

        let names: Vec<&str> = pod.spec.containers.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, [MAIN_CONTAINER_NAME, WAIT_CONTAINER_NAME]);
        assert_eq!(pod.spec.containers[1].image, "gantry/executor:v1");
    }

    #[test]
    fn factory_rejects_template_without_container() {
        let wf = Workflow::new("pipeline", "batch");
        let template = Template {
            name: "extract".into(),
            ..Template::default()
        };
        let err = ContainerPodFactory
            .render(&wf, &template, "pipeline-extract", &ControllerConfig::default())
            .unwrap_err();
        assert!(err.to_string().contains("does not declare a container"));
    }

    #[test]
    fn factory_applies_match_labels() {
        let wf = Workflow::new("pipeline", "batch");
        let template = Template {
            name: "extract".into(),
            container: Some(Container {
                name: String::new(),
                image: "busybox:1.36".into(),
                ..Container::default()
            }),
            ..Template::default()
        };
        let mut config = ControllerConfig {
            executor_image: "gantry/executor:v1".into(),
            ..ControllerConfig::default()
        };
        config
            .match_labels
            .insert("team".to_string(), "data".to_string());

        let pod = ContainerPodFactory
            .render(&wf, &template, "pipeline-extract", &config)
            .unwrap();
        // Watches are filtered by matchLabels; rendered pods must carry them
        // to stay visible.
        assert_eq!(pod.metadata.label("team"), Some("data"));
    }

    #[test]
    fn dependency_gate_transitions() {
        let mut wf = Workflow::new("pipeline", "batch");
        let template = Template {
            name: "load".into(),
            dependencies: vec!["extract".into()],
            ..Template::default()
        };

        assert!(matches!(
            dependency_gate(&wf, &template),
            DependencyGate::NotReady
        ));

        let mut dep = NodeStatus::new("pipeline-extract");
        dep.phase = NodePhase::Running;
        wf.status.nodes.insert("pipeline-extract".into(), dep);
        assert!(matches!(
            dependency_gate(&wf, &template),
            DependencyGate::NotReady
        ));

        wf.status.nodes.get_mut("pipeline-extract").unwrap().phase = NodePhase::Succeeded;
        assert!(matches!(
            dependency_gate(&wf, &template),
            DependencyGate::Ready
        ));

        wf.status.nodes.get_mut("pipeline-extract").unwrap().phase = NodePhase::Failed;
        assert!(matches!(
            dependency_gate(&wf, &template),
            DependencyGate::Blocked(_)
        ));
    }

    #[test]
    fn completion_aggregates_failure_over_error() {
        let mut wf = Workflow::new("pipeline", "batch");
        wf.spec.templates.push(Template {
            name: "a".into(),
            ..Template::default()
        });
        wf.spec.templates.push(Template {
            name: "b".into(),
            ..Template::default()
        });

        let mut a = NodeStatus::new("pipeline-a");
        a.phase = NodePhase::Error;
        a.message = "infra".into();
        let mut b = NodeStatus::new("pipeline-b");
        b.phase = NodePhase::Failed;
        b.message = "oom".into();
        wf.status.nodes.insert(a.id.clone(), a);
        wf.status.nodes.insert(b.id.clone(), b);

        assert!(record_completion(&mut wf));
        assert_eq!(wf.status.phase, NodePhase::Failed);
        assert!(wf.is_labelled_completed());
        assert!(wf.status.finished_at.is_some());
        // Second pass is a no-op.
        assert!(!record_completion(&mut wf));
    }

    #[test]
    fn empty_spec_completes_succeeded() {
        let mut wf = Workflow::new("empty", "batch");
        assert!(record_completion(&mut wf));
        assert_eq!(wf.status.phase, NodePhase::Succeeded);
    }
}
