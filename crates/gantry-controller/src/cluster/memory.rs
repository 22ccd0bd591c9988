//! In-memory cluster implementation for testing.
//!
//! [`InMemoryCluster`] keeps workflows, pods and configuration documents in
//! process memory and fans watch events out to subscribers whose selector
//! matches.
//!
//! ## Limitations
//!
//! - **NOT suitable for production**: no durability, no cross-process state
//! - **Bounded watch buffers**: a subscriber that stops draining its channel
//!   loses events once the buffer fills; tests should keep consuming
//! - **Write counters**: updates, creates and label patches are counted so
//!   tests can assert the controller produced no redundant writes

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::mpsc;

use gantry_core::pod::Pod;
use gantry_core::workflow::Workflow;

use super::{ClusterClient, ConfigDocument, Selector, WatchEvent, WatchStream};
use crate::error::{Error, Result};

const WATCH_BUFFER: usize = 256;

#[derive(Debug)]
struct Subscription<T> {
    selector: Selector,
    tx: mpsc::Sender<WatchEvent<T>>,
}

#[derive(Debug, Default)]
struct ClusterState {
    workflows: BTreeMap<(String, String), Workflow>,
    pods: BTreeMap<(String, String), Pod>,
    configs: BTreeMap<(String, String), ConfigDocument>,
    workflow_watchers: Vec<Subscription<Workflow>>,
    pod_watchers: Vec<Subscription<Pod>>,
    config_watchers: Vec<((String, String), mpsc::Sender<WatchEvent<ConfigDocument>>)>,
    workflow_updates: u64,
    pod_creates: u64,
    pod_label_patches: u64,
    fail_workflow_updates: bool,
    fail_pod_label_patches: bool,
}

/// In-memory cluster for tests.
#[derive(Debug, Default)]
pub struct InMemoryCluster {
    state: Mutex<ClusterState>,
}

impl InMemoryCluster {
    /// Creates an empty cluster.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces a workflow and notifies matching watchers.
    pub fn put_workflow(&self, workflow: Workflow) {
        let mut state = self.lock();
        let key = object_key(&workflow.metadata.namespace, &workflow.metadata.name);
        let existed = state.workflows.insert(key, workflow.clone()).is_some();
        notify_workflow_watchers(&mut state, &workflow, existed);
    }

    /// Inserts or replaces a pod and notifies matching watchers.
    pub fn put_pod(&self, pod: Pod) {
        let mut state = self.lock();
        let key = object_key(&pod.metadata.namespace, &pod.metadata.name);
        let existed = state.pods.insert(key, pod.clone()).is_some();
        notify_pod_watchers(&mut state, &pod, existed);
    }

    /// Inserts or replaces a configuration document and notifies watchers.
    pub fn put_config_document(&self, document: ConfigDocument) {
        let mut state = self.lock();
        let key = object_key(&document.namespace, &document.name);
        let existed = state.configs.insert(key.clone(), document.clone()).is_some();
        let event = if existed {
            WatchEvent::Modified(document)
        } else {
            WatchEvent::Added(document)
        };
        state.config_watchers.retain(|(watched, tx)| {
            if tx.is_closed() {
                return false;
            }
            if *watched == key {
                let _ = tx.try_send(event.clone());
            }
            true
        });
    }

    /// Reads a pod directly, bypassing selectors.
    pub fn pod(&self, namespace: &str, name: &str) -> Option<Pod> {
        self.lock().pods.get(&object_key(namespace, name)).cloned()
    }

    /// Reads a workflow directly, bypassing selectors.
    pub fn workflow(&self, namespace: &str, name: &str) -> Option<Workflow> {
        self.lock()
            .workflows
            .get(&object_key(namespace, name))
            .cloned()
    }

    /// Number of workflow updates performed through the client.
    pub fn workflow_update_count(&self) -> u64 {
        self.lock().workflow_updates
    }

    /// Number of pods created through the client.
    pub fn pod_create_count(&self) -> u64 {
        self.lock().pod_creates
    }

    /// Number of pod label patches performed through the client.
    pub fn pod_label_patch_count(&self) -> u64 {
        self.lock().pod_label_patches
    }

    /// Makes subsequent workflow updates fail, to exercise error paths.
    pub fn fail_workflow_updates(&self, fail: bool) {
        self.lock().fail_workflow_updates = fail;
    }

    /// Makes subsequent pod label patches fail, to exercise error paths.
    pub fn fail_pod_label_patches(&self, fail: bool) {
        self.lock().fail_pod_label_patches = fail;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ClusterState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn object_key(namespace: &str, name: &str) -> (String, String) {
    (namespace.to_string(), name.to_string())
}

fn notify_workflow_watchers(state: &mut ClusterState, workflow: &Workflow, existed: bool) {
    state.workflow_watchers.retain(|sub| {
        if sub.tx.is_closed() {
            return false;
        }
        if sub
            .selector
            .matches(&workflow.metadata.namespace, &workflow.metadata.labels)
        {
            let event = if existed {
                WatchEvent::Modified(workflow.clone())
            } else {
                WatchEvent::Added(workflow.clone())
            };
            // A full buffer drops the event, not the subscription.
            let _ = sub.tx.try_send(event);
        }
        true
    });
}

fn notify_pod_watchers(state: &mut ClusterState, pod: &Pod, existed: bool) {
    state.pod_watchers.retain(|sub| {
        if sub.tx.is_closed() {
            return false;
        }
        if sub.selector.matches_pod(pod) {
            let event = if existed {
                WatchEvent::Modified(pod.clone())
            } else {
                WatchEvent::Added(pod.clone())
            };
            let _ = sub.tx.try_send(event);
        }
        true
    });
}

#[async_trait]
impl ClusterClient for InMemoryCluster {
    async fn list_workflows(&self, selector: &Selector) -> Result<Vec<Workflow>> {
        let state = self.lock();
        Ok(state
            .workflows
            .values()
            .filter(|wf| selector.matches(&wf.metadata.namespace, &wf.metadata.labels))
            .cloned()
            .collect())
    }

    async fn watch_workflows(&self, selector: &Selector) -> Result<WatchStream<Workflow>> {
        let (tx, rx) = mpsc::channel(WATCH_BUFFER);
        self.lock().workflow_watchers.push(Subscription {
            selector: selector.clone(),
            tx,
        });
        Ok(rx)
    }

    async fn get_workflow(&self, namespace: &str, name: &str) -> Result<Option<Workflow>> {
        Ok(self
            .lock()
            .workflows
            .get(&object_key(namespace, name))
            .cloned())
    }

    async fn update_workflow(&self, workflow: &Workflow) -> Result<Workflow> {
        let mut state = self.lock();
        if state.fail_workflow_updates {
            return Err(Error::cluster("injected workflow update failure"));
        }
        let key = object_key(&workflow.metadata.namespace, &workflow.metadata.name);
        if !state.workflows.contains_key(&key) {
            return Err(Error::NotFound {
                kind: "workflow",
                name: workflow.metadata.name.clone(),
            });
        }
        state.workflows.insert(key, workflow.clone());
        state.workflow_updates += 1;
        notify_workflow_watchers(&mut state, workflow, true);
        Ok(workflow.clone())
    }

    async fn list_pods(&self, selector: &Selector) -> Result<Vec<Pod>> {
        let state = self.lock();
        Ok(state
            .pods
            .values()
            .filter(|pod| selector.matches_pod(pod))
            .cloned()
            .collect())
    }

    async fn watch_pods(&self, selector: &Selector) -> Result<WatchStream<Pod>> {
        let (tx, rx) = mpsc::channel(WATCH_BUFFER);
        self.lock().pod_watchers.push(Subscription {
            selector: selector.clone(),
            tx,
        });
        Ok(rx)
    }

    async fn create_pod(&self, pod: &Pod) -> Result<Pod> {
        let mut state = self.lock();
        let key = object_key(&pod.metadata.namespace, &pod.metadata.name);
        if state.pods.contains_key(&key) {
            return Err(Error::AlreadyExists {
                kind: "pod",
                name: pod.metadata.name.clone(),
            });
        }
        state.pods.insert(key, pod.clone());
        state.pod_creates += 1;
        notify_pod_watchers(&mut state, pod, false);
        Ok(pod.clone())
    }

    async fn patch_pod_label(
        &self,
        namespace: &str,
        name: &str,
        key: &str,
        value: &str,
    ) -> Result<()> {
        let mut state = self.lock();
        if state.fail_pod_label_patches {
            return Err(Error::cluster("injected pod label patch failure"));
        }
        let pod = state
            .pods
            .get_mut(&object_key(namespace, name))
            .ok_or_else(|| Error::NotFound {
                kind: "pod",
                name: name.to_string(),
            })?;
        pod.metadata.labels.insert(key.to_string(), value.to_string());
        let pod = pod.clone();
        state.pod_label_patches += 1;
        notify_pod_watchers(&mut state, &pod, true);
        Ok(())
    }

    async fn get_config_document(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ConfigDocument>> {
        Ok(self
            .lock()
            .configs
            .get(&object_key(namespace, name))
            .cloned())
    }

    async fn watch_config_documents(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<WatchStream<ConfigDocument>> {
        let (tx, rx) = mpsc::channel(WATCH_BUFFER);
        self.lock()
            .config_watchers
            .push((object_key(namespace, name), tx));
        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gantry_core::contract::LABEL_KEY_COMPLETED;
    use gantry_core::pod::PodPhase;

    fn pod(namespace: &str, name: &str, phase: PodPhase) -> Pod {
        let mut pod = Pod::default();
        pod.metadata.name = name.into();
        pod.metadata.namespace = namespace.into();
        pod.metadata
            .labels
            .insert(LABEL_KEY_COMPLETED.into(), "false".into());
        pod.status.phase = phase;
        pod
    }

    #[tokio::test]
    async fn watch_delivers_only_matching_pods() {
        let cluster = InMemoryCluster::new();
        let selector = Selector::new()
            .label_equals(LABEL_KEY_COMPLETED, "false")
            .exclude_phase(PodPhase::Pending);

        let mut stream = cluster.watch_pods(&selector).await.unwrap();

        cluster.put_pod(pod("batch", "filtered", PodPhase::Pending));
        cluster.put_pod(pod("batch", "delivered", PodPhase::Running));

        let event = stream.recv().await.unwrap();
        assert_eq!(event.object().metadata.name, "delivered");
        assert!(stream.try_recv().is_err());
    }

    #[tokio::test]
    async fn update_requires_existing_workflow() {
        let cluster = InMemoryCluster::new();
        let wf = Workflow::new("missing", "batch");
        let err = cluster.update_workflow(&wf).await.unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
        assert_eq!(cluster.workflow_update_count(), 0);
    }

    #[tokio::test]
    async fn create_pod_twice_reports_already_exists() {
        let cluster = InMemoryCluster::new();
        let p = pod("batch", "wf-step", PodPhase::Running);
        cluster.create_pod(&p).await.unwrap();
        let err = cluster.create_pod(&p).await.unwrap_err();
        assert!(err.is_already_exists());
        assert_eq!(cluster.pod_create_count(), 1);
    }

    #[tokio::test]
    async fn label_patch_stops_delivery_for_completed_selector() {
        let cluster = InMemoryCluster::new();
        let selector = Selector::new().label_equals(LABEL_KEY_COMPLETED, "false");
        let mut stream = cluster.watch_pods(&selector).await.unwrap();

        cluster.put_pod(pod("batch", "wf-step", PodPhase::Running));
        assert_eq!(stream.recv().await.unwrap().object().metadata.name, "wf-step");

        cluster
            .patch_pod_label("batch", "wf-step", LABEL_KEY_COMPLETED, "true")
            .await
            .unwrap();
        // The labelled pod no longer matches the selector.
        assert!(stream.try_recv().is_err());
        assert_eq!(cluster.pod_label_patch_count(), 1);
    }

    #[tokio::test]
    async fn config_watch_is_scoped_to_one_document() {
        let cluster = InMemoryCluster::new();
        let mut stream = cluster
            .watch_config_documents("gantry-system", "workflow-controller")
            .await
            .unwrap();

        cluster.put_config_document(ConfigDocument::new("other", "gantry-system"));
        cluster.put_config_document(ConfigDocument::new("workflow-controller", "gantry-system"));

        let event = stream.recv().await.unwrap();
        assert_eq!(event.object().name, "workflow-controller");
        assert!(stream.try_recv().is_err());
    }
}
