//! The controller: wiring and the single-consumer dispatch loop.
//!
//! [`WorkflowController::run`] resolves the initial configuration, starts
//! the three event sources, the cache sweeper and the stats ticker, then
//! drains the two bounded queues from a single task. Single-threaded
//! dispatch gives a total order over observed events, so the operator and
//! the reconciler never race each other on workflow status.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tracing::Instrument;

use gantry_core::observability::{pod_span, workflow_span};

use crate::cache::{CompletedPodCache, DEFAULT_SWEEP_INTERVAL, DEFAULT_TTL};
use crate::cluster::ClusterClient;
use crate::config::{ConfigStore, controller_namespace};
use crate::error::{Error, Result};
use crate::operator::{PodFactory, WorkflowOperator};
use crate::reconciler::PodReconciler;
use crate::sources;
use crate::stats::{self, DEFAULT_STATS_INTERVAL, QueueDepth};

/// Iterations between queue-depth telemetry emissions from the loop.
const QUEUE_TELEMETRY_INTERVAL: u64 = 100;

/// The workflow controller.
pub struct WorkflowController {
    client: Arc<dyn ClusterClient>,
    config: Arc<ConfigStore>,
    completed_pods: Arc<CompletedPodCache>,
    config_document: String,
    config_namespace: String,
    pod_factory: Option<Arc<dyn PodFactory>>,
    stats_interval: Duration,
}

impl WorkflowController {
    /// Creates a controller that reads its configuration from the named
    /// document in the controller's own namespace (resolved from the
    /// environment).
    #[must_use]
    pub fn new(client: Arc<dyn ClusterClient>, config_document: impl Into<String>) -> Self {
        Self {
            client,
            config: Arc::new(ConfigStore::new()),
            completed_pods: Arc::new(CompletedPodCache::new(DEFAULT_TTL)),
            config_document: config_document.into(),
            config_namespace: controller_namespace(),
            pod_factory: None,
            stats_interval: DEFAULT_STATS_INTERVAL,
        }
    }

    /// Overrides the namespace the configuration document is read from.
    #[must_use]
    pub fn with_config_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.config_namespace = namespace.into();
        self
    }

    /// Substitutes the pod factory used by the operator.
    #[must_use]
    pub fn with_pod_factory(mut self, factory: Arc<dyn PodFactory>) -> Self {
        self.pod_factory = Some(factory);
        self
    }

    /// Shortens the stats ticker interval (mainly for tests).
    #[must_use]
    pub fn with_stats_interval(mut self, interval: Duration) -> Self {
        self.stats_interval = interval;
        self
    }

    /// The live configuration store.
    #[must_use]
    pub fn config(&self) -> Arc<ConfigStore> {
        Arc::clone(&self.config)
    }

    /// Reloads the controller configuration from the cluster.
    ///
    /// # Errors
    ///
    /// Returns an error when the document is absent or invalid. Used at
    /// startup, where a missing configuration is fatal; afterwards the
    /// config watch keeps the store current.
    pub async fn resync_config(&self) -> Result<()> {
        let document = self
            .client
            .get_config_document(&self.config_namespace, &self.config_document)
            .await?
            .ok_or_else(|| {
                Error::configuration(format!(
                    "config document '{}' not found in namespace '{}'",
                    self.config_document, self.config_namespace
                ))
            })?;
        self.config.update(&document)
    }

    /// Runs the controller until `shutdown` fires.
    ///
    /// # Errors
    ///
    /// Returns an error only for startup failures (initial configuration
    /// resolve). Nothing in the reconciliation path is fatal after that.
    pub async fn run(self, shutdown: watch::Receiver<bool>) -> Result<()> {
        self.resync_config().await?;

        let (workflow_tx, mut workflow_rx) =
            mpsc::channel(sources::WORKFLOW_QUEUE_CAPACITY);
        let (pod_tx, mut pod_rx) = mpsc::channel(sources::POD_QUEUE_CAPACITY);

        tracing::info!(
            document = %self.config_document,
            namespace = %self.config_namespace,
            "watching controller config document"
        );
        let config_source = sources::spawn_config_source(
            Arc::clone(&self.client),
            self.config_namespace.clone(),
            self.config_document.clone(),
            Arc::clone(&self.config),
            shutdown.clone(),
        );

        tracing::info!("watching workflow objects");
        let workflow_source = sources::spawn_workflow_source(
            Arc::clone(&self.client),
            Arc::clone(&self.config),
            workflow_tx.clone(),
            shutdown.clone(),
        );

        tracing::info!("watching workflow pods");
        let pod_source = sources::spawn_pod_source(
            Arc::clone(&self.client),
            Arc::clone(&self.config),
            pod_tx.clone(),
            shutdown.clone(),
        );

        let sweeper = self.completed_pods.spawn_sweeper(DEFAULT_SWEEP_INTERVAL);
        let stats_ticker = stats::spawn_stats_ticker(
            self.stats_interval,
            workflow_tx.clone(),
            pod_tx.clone(),
            Arc::clone(&self.completed_pods),
            shutdown.clone(),
        );

        let operator = match &self.pod_factory {
            Some(factory) => WorkflowOperator::with_pod_factory(
                Arc::clone(&self.client),
                Arc::clone(&self.config),
                Arc::clone(factory),
            ),
            None => WorkflowOperator::new(Arc::clone(&self.client), Arc::clone(&self.config)),
        };
        let reconciler =
            PodReconciler::new(Arc::clone(&self.client), Arc::clone(&self.completed_pods));

        let mut shutdown = shutdown;
        let mut iterations: u64 = 0;
        loop {
            if iterations % QUEUE_TELEMETRY_INTERVAL == 0 {
                let workflows = QueueDepth::sample(&workflow_tx);
                let pods = QueueDepth::sample(&pod_tx);
                stats::record_queue_depths(workflows, pods);
                let wf_queue = format!("{}/{}", workflows.depth, workflows.capacity);
                let pod_queue = format!("{}/{}", pods.depth, pods.capacity);
                tracing::debug!(wf_queue = %wf_queue, pod_queue = %pod_queue, "dispatch queues");
            }
            iterations += 1;

            tokio::select! {
                _ = shutdown.changed() => break,
                workflow = workflow_rx.recv() => {
                    let Some(workflow) = workflow else { break };
                    let span = workflow_span(
                        "operate",
                        &workflow.metadata.namespace,
                        &workflow.metadata.name,
                    );
                    operator.operate(workflow).instrument(span).await;
                }
                pod = pod_rx.recv() => {
                    let Some(pod) = pod else { break };
                    let span = pod_span(
                        "reconcile",
                        &pod.metadata.namespace,
                        &pod.metadata.name,
                    );
                    reconciler.handle_pod_update(pod).instrument(span).await;
                }
            }
        }

        tracing::info!("dispatch loop stopped");
        for handle in [config_source, workflow_source, pod_source, sweeper, stats_ticker] {
            handle.abort();
        }
        Ok(())
    }
}
