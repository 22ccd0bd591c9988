//! Event sources: long-lived list+watch streams feeding the dispatch loop.
//!
//! Three independent streams run against the cluster:
//!
//! 1. **Config watch**: the controller's own configuration document;
//!    every change is applied to the [`ConfigStore`]
//! 2. **Workflow watch**: workflows not yet labelled completed; every
//!    event pushes the object onto the bounded workflow queue
//! 3. **Pod watch**: workflow pods past `Pending` and not yet labelled
//!    completed; every event pushes the object onto the bounded pod queue
//!
//! Each stream alternates between a full list (the resync, which re-delivers
//! every object and thereby recovers from dropped writes) and a watch. The
//! queues are bounded; a full queue blocks the producer rather than dropping
//! events, and sustained overload is recovered by the next resync re-list.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use gantry_core::contract::LABEL_KEY_COMPLETED;
use gantry_core::pod::{Pod, PodPhase};
use gantry_core::workflow::Workflow;

use crate::cluster::ClusterClient;
use crate::config::{ConfigStore, ControllerConfig};

/// How often the workflow watch re-lists every object.
pub const WORKFLOW_RESYNC_PERIOD: Duration = Duration::from_secs(20 * 60);

/// How often the pod watch re-lists every object.
pub const POD_RESYNC_PERIOD: Duration = Duration::from_secs(30 * 60);

/// Capacity of the workflow dispatch queue.
pub const WORKFLOW_QUEUE_CAPACITY: usize = 10_240;

/// Capacity of the pod dispatch queue.
///
/// Pod events far outnumber workflow events; a pod burst must not
/// back-pressure workflow progress, hence the asymmetric capacities.
pub const POD_QUEUE_CAPACITY: usize = 102_400;

/// Delay before reconnecting after a watch stream ends prematurely.
const WATCH_RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// Selector for the workflow watch: not completed, plus the configured
/// match labels, scoped to the configured namespace.
#[must_use]
pub fn workflow_selector(config: &ControllerConfig) -> crate::cluster::Selector {
    let mut selector = crate::cluster::Selector::new()
        .in_namespace(config.namespace.clone())
        .label_not_in(LABEL_KEY_COMPLETED, vec!["true".to_string()]);
    for (key, value) in &config.match_labels {
        selector = selector.label_equals(key.clone(), value.clone());
    }
    selector
}

/// Selector for the pod watch: explicitly not completed, past `Pending`,
/// plus the configured match labels, scoped to the configured namespace.
#[must_use]
pub fn pod_selector(config: &ControllerConfig) -> crate::cluster::Selector {
    let mut selector = crate::cluster::Selector::new()
        .in_namespace(config.namespace.clone())
        .label_equals(LABEL_KEY_COMPLETED, "false")
        .exclude_phase(PodPhase::Pending);
    for (key, value) in &config.match_labels {
        selector = selector.label_equals(key.clone(), value.clone());
    }
    selector
}

/// Starts the workflow list+watch, pushing every observed object onto `tx`.
pub fn spawn_workflow_source(
    client: Arc<dyn ClusterClient>,
    config: Arc<ConfigStore>,
    tx: mpsc::Sender<Workflow>,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            // The selector is rebuilt each cycle so matchLabels and
            // namespace changes take effect at the next resync.
            let selector = workflow_selector(&config.snapshot());

            match client.list_workflows(&selector).await {
                Ok(workflows) => {
                    for workflow in workflows {
                        if tx.send(workflow).await.is_err() {
                            return;
                        }
                    }
                }
                Err(err) => {
                    tracing::warn!(error = %err, "workflow list failed");
                    if pause(WATCH_RECONNECT_DELAY, &mut shutdown).await {
                        return;
                    }
                    continue;
                }
            }

            let mut stream = match client.watch_workflows(&selector).await {
                Ok(stream) => stream,
                Err(err) => {
                    tracing::warn!(error = %err, "workflow watch failed");
                    if pause(WATCH_RECONNECT_DELAY, &mut shutdown).await {
                        return;
                    }
                    continue;
                }
            };

            let resync = tokio::time::sleep(WORKFLOW_RESYNC_PERIOD);
            tokio::pin!(resync);
            loop {
                tokio::select! {
                    () = &mut resync => break,
                    _ = shutdown.changed() => return,
                    event = stream.recv() => match event {
                        Some(event) => {
                            if tx.send(event.into_object()).await.is_err() {
                                return;
                            }
                        }
                        None => {
                            if pause(WATCH_RECONNECT_DELAY, &mut shutdown).await {
                                return;
                            }
                            break;
                        }
                    },
                }
            }
        }
    })
}

/// Starts the pod list+watch, pushing every observed object onto `tx`.
pub fn spawn_pod_source(
    client: Arc<dyn ClusterClient>,
    config: Arc<ConfigStore>,
    tx: mpsc::Sender<Pod>,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let selector = pod_selector(&config.snapshot());

            match client.list_pods(&selector).await {
                Ok(pods) => {
                    for pod in pods {
                        if tx.send(pod).await.is_err() {
                            return;
                        }
                    }
                }
                Err(err) => {
                    tracing::warn!(error = %err, "pod list failed");
                    if pause(WATCH_RECONNECT_DELAY, &mut shutdown).await {
                        return;
                    }
                    continue;
                }
            }

            let mut stream = match client.watch_pods(&selector).await {
                Ok(stream) => stream,
                Err(err) => {
                    tracing::warn!(error = %err, "pod watch failed");
                    if pause(WATCH_RECONNECT_DELAY, &mut shutdown).await {
                        return;
                    }
                    continue;
                }
            };

            let resync = tokio::time::sleep(POD_RESYNC_PERIOD);
            tokio::pin!(resync);
            loop {
                tokio::select! {
                    () = &mut resync => break,
                    _ = shutdown.changed() => return,
                    event = stream.recv() => match event {
                        Some(event) => {
                            if tx.send(event.into_object()).await.is_err() {
                                return;
                            }
                        }
                        None => {
                            if pause(WATCH_RECONNECT_DELAY, &mut shutdown).await {
                                return;
                            }
                            break;
                        }
                    },
                }
            }
        }
    })
}

/// Starts the config document watch. Every add or update is applied to the
/// store; failed updates are logged and leave the previous config in
/// effect.
pub fn spawn_config_source(
    client: Arc<dyn ClusterClient>,
    namespace: String,
    name: String,
    store: Arc<ConfigStore>,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let mut stream = match client.watch_config_documents(&namespace, &name).await {
                Ok(stream) => stream,
                Err(err) => {
                    tracing::warn!(error = %err, "config watch failed");
                    if pause(WATCH_RECONNECT_DELAY, &mut shutdown).await {
                        return;
                    }
                    continue;
                }
            };

            loop {
                tokio::select! {
                    _ = shutdown.changed() => return,
                    event = stream.recv() => match event {
                        Some(crate::cluster::WatchEvent::Deleted(document)) => {
                            tracing::warn!(document = %document.name, "config document deleted; keeping current config");
                        }
                        Some(event) => {
                            tracing::info!("detected config document update");
                            if let Err(err) = store.update(event.object()) {
                                tracing::error!(error = %err, "config update rejected");
                            }
                        }
                        None => {
                            if pause(WATCH_RECONNECT_DELAY, &mut shutdown).await {
                                return;
                            }
                            break;
                        }
                    },
                }
            }
        }
    })
}

/// Sleeps for `delay` unless shutdown fires first. Returns true on shutdown.
async fn pause(delay: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        () = tokio::time::sleep(delay) => false,
        _ = shutdown.changed() => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    use gantry_core::contract::CONFIG_DATA_KEY;

    use crate::cluster::memory::InMemoryCluster;
    use crate::cluster::ConfigDocument;

    fn config_with(namespace: &str, match_labels: &[(&str, &str)]) -> ControllerConfig {
        ControllerConfig {
            executor_image: "gantry/executor:v1".into(),
            namespace: namespace.into(),
            match_labels: match_labels
                .iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                .collect(),
            ..ControllerConfig::default()
        }
    }

    #[test]
    fn workflow_selector_excludes_completed() {
        let selector = workflow_selector(&config_with("", &[]));
        let mut labels = BTreeMap::new();
        assert!(selector.matches("anywhere", &labels));

        labels.insert(LABEL_KEY_COMPLETED.to_string(), "true".to_string());
        assert!(!selector.matches("anywhere", &labels));
    }

    #[test]
    fn pod_selector_requires_explicit_not_completed_label() {
        let selector = pod_selector(&config_with("batch", &[("team", "data")]));
        let mut labels = BTreeMap::new();
        labels.insert(LABEL_KEY_COMPLETED.to_string(), "false".to_string());
        labels.insert("team".to_string(), "data".to_string());
        assert!(selector.matches("batch", &labels));

        // Unlike the workflow selector, an absent label does not match.
        labels.remove(LABEL_KEY_COMPLETED);
        assert!(!selector.matches("batch", &labels));
        assert!(selector.excluded_phases.contains(&PodPhase::Pending));
    }

    #[tokio::test]
    async fn workflow_source_lists_then_watches() {
        let cluster = Arc::new(InMemoryCluster::new());
        let store = Arc::new(ConfigStore::new());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (tx, mut rx) = mpsc::channel(16);

        cluster.put_workflow(gantry_core::workflow::Workflow::new("pre-existing", "batch"));

        let handle = spawn_workflow_source(
            cluster.clone() as Arc<dyn ClusterClient>,
            store,
            tx,
            shutdown_rx,
        );

        // Listed object arrives first.
        let listed = rx.recv().await.unwrap();
        assert_eq!(listed.metadata.name, "pre-existing");

        // A watch event follows. Re-put until the source's watch
        // registration has caught the object; puts are idempotent here.
        let mut watched = None;
        for _ in 0..200 {
            cluster.put_workflow(gantry_core::workflow::Workflow::new("incoming", "batch"));
            match tokio::time::timeout(Duration::from_millis(20), rx.recv()).await {
                Ok(Some(wf)) if wf.metadata.name == "incoming" => {
                    watched = Some(wf);
                    break;
                }
                _ => {}
            }
        }
        assert!(watched.is_some(), "watch event was never delivered");

        shutdown_tx.send(true).unwrap();
        let _ = handle.await;
    }

    #[tokio::test]
    async fn config_source_applies_updates_and_keeps_previous_on_rejection() {
        let cluster = Arc::new(InMemoryCluster::new());
        let store = Arc::new(ConfigStore::new());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = spawn_config_source(
            cluster.clone() as Arc<dyn ClusterClient>,
            "gantry-system".into(),
            "workflow-controller".into(),
            store.clone(),
            shutdown_rx,
        );

        let mut doc = ConfigDocument::new("workflow-controller", "gantry-system");
        doc.data.insert(
            CONFIG_DATA_KEY.into(),
            "executorImage: gantry/executor:v2\n".into(),
        );

        // Re-put until the source's watch registration has caught the
        // document, then wait for the store to reflect it.
        for _ in 0..200 {
            cluster.put_config_document(doc.clone());
            if store.snapshot().executor_image == "gantry/executor:v2" {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(store.snapshot().executor_image, "gantry/executor:v2");

        // An invalid update is rejected and the previous config survives.
        doc.data
            .insert(CONFIG_DATA_KEY.into(), "namespace: batch\n".into());
        cluster.put_config_document(doc);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(store.snapshot().executor_image, "gantry/executor:v2");

        shutdown_tx.send(true).unwrap();
        let _ = handle.await;
    }
}
