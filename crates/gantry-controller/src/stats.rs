//! Periodic instrumentation tick.
//!
//! Purely observational: the ticker samples queue depths and cache size on
//! its own task and never blocks the dispatch loop.

use std::sync::Arc;
use std::time::Duration;

use metrics::gauge;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use gantry_core::pod::Pod;
use gantry_core::workflow::Workflow;

use crate::cache::CompletedPodCache;
use crate::metrics::{labels as metrics_labels, names as metrics_names};

/// Default interval between stats emissions.
pub const DEFAULT_STATS_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Point-in-time occupancy of one bounded queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueDepth {
    /// Events currently waiting.
    pub depth: usize,
    /// Total capacity.
    pub capacity: usize,
}

impl QueueDepth {
    /// Samples a queue through one of its senders.
    #[must_use]
    pub fn sample<T>(tx: &mpsc::Sender<T>) -> Self {
        let capacity = tx.max_capacity();
        Self {
            depth: capacity.saturating_sub(tx.capacity()),
            capacity,
        }
    }
}

/// Publishes both queue depths as gauges.
#[allow(clippy::cast_precision_loss)]
pub fn record_queue_depths(workflows: QueueDepth, pods: QueueDepth) {
    gauge!(metrics_names::QUEUE_DEPTH, metrics_labels::QUEUE => "workflows")
        .set(workflows.depth as f64);
    gauge!(metrics_names::QUEUE_CAPACITY, metrics_labels::QUEUE => "workflows")
        .set(workflows.capacity as f64);
    gauge!(metrics_names::QUEUE_DEPTH, metrics_labels::QUEUE => "pods").set(pods.depth as f64);
    gauge!(metrics_names::QUEUE_CAPACITY, metrics_labels::QUEUE => "pods")
        .set(pods.capacity as f64);
}

/// Starts the stats ticker.
#[allow(clippy::cast_precision_loss)]
pub fn spawn_stats_ticker(
    interval: Duration,
    workflow_tx: mpsc::Sender<Workflow>,
    pod_tx: mpsc::Sender<Pod>,
    completed_pods: Arc<CompletedPodCache>,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = shutdown.changed() => return,
                _ = ticker.tick() => {}
            }

            let workflows = QueueDepth::sample(&workflow_tx);
            let pods = QueueDepth::sample(&pod_tx);
            record_queue_depths(workflows, pods);
            gauge!(metrics_names::COMPLETED_POD_CACHE_SIZE).set(completed_pods.len() as f64);

            let wf_queue = format!("{}/{}", workflows.depth, workflows.capacity);
            let pod_queue = format!("{}/{}", pods.depth, pods.capacity);
            tracing::info!(
                wf_queue = %wf_queue,
                pod_queue = %pod_queue,
                completed_pod_cache = completed_pods.len(),
                "controller stats"
            );
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn queue_depth_tracks_buffered_events() {
        let (tx, mut rx) = mpsc::channel::<u32>(8);
        assert_eq!(QueueDepth::sample(&tx), QueueDepth { depth: 0, capacity: 8 });

        tx.send(1).await.unwrap();
        tx.send(2).await.unwrap();
        assert_eq!(QueueDepth::sample(&tx).depth, 2);

        rx.recv().await.unwrap();
        assert_eq!(QueueDepth::sample(&tx).depth, 1);
    }

    #[tokio::test]
    async fn ticker_stops_on_shutdown() {
        let (wf_tx, _wf_rx) = mpsc::channel::<Workflow>(4);
        let (pod_tx, _pod_rx) = mpsc::channel::<Pod>(4);
        let cache = Arc::new(CompletedPodCache::default());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = spawn_stats_ticker(
            Duration::from_millis(10),
            wf_tx,
            pod_tx,
            cache,
            shutdown_rx,
        );

        tokio::time::sleep(Duration::from_millis(30)).await;
        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("ticker should exit on shutdown")
            .unwrap();
    }
}
