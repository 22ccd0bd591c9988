//! Observability metrics for the controller.
//!
//! Prometheus-compatible metrics exported through the `metrics` facade.
//!
//! ## Metrics Exported
//!
//! | Metric | Type | Labels | Description |
//! |--------|------|--------|-------------|
//! | `gantry_pod_reconciles_total` | Counter | `outcome` | Pod observations by reconcile outcome |
//! | `gantry_pod_reconcile_seconds` | Histogram | - | Pod reconcile duration |
//! | `gantry_workflow_operations_total` | Counter | `outcome` | Operator invocations by outcome |
//! | `gantry_config_reloads_total` | Counter | `status` | Config reload attempts |
//! | `gantry_queue_depth` | Gauge | `queue` | Events waiting in a dispatch queue |
//! | `gantry_queue_capacity` | Gauge | `queue` | Capacity of a dispatch queue |
//! | `gantry_completed_pod_cache_size` | Gauge | - | Entries in the completed-pod cache |
//!
//! ## Integration
//!
//! Metrics are exposed via the `metrics` crate facade; install any
//! compatible recorder (e.g. `metrics-exporter-prometheus`) in the host
//! process to export them.

use std::time::{Duration, Instant};

/// Metric names as constants for consistency.
pub mod names {
    /// Counter: pod observations by reconcile outcome.
    pub const POD_RECONCILES_TOTAL: &str = "gantry_pod_reconciles_total";
    /// Histogram: pod reconcile duration in seconds.
    pub const POD_RECONCILE_SECONDS: &str = "gantry_pod_reconcile_seconds";
    /// Counter: operator invocations by outcome.
    pub const WORKFLOW_OPERATIONS_TOTAL: &str = "gantry_workflow_operations_total";
    /// Counter: config reload attempts by status.
    pub const CONFIG_RELOADS_TOTAL: &str = "gantry_config_reloads_total";
    /// Gauge: events waiting in a dispatch queue.
    pub const QUEUE_DEPTH: &str = "gantry_queue_depth";
    /// Gauge: capacity of a dispatch queue.
    pub const QUEUE_CAPACITY: &str = "gantry_queue_capacity";
    /// Gauge: entries in the completed-pod cache.
    pub const COMPLETED_POD_CACHE_SIZE: &str = "gantry_completed_pod_cache_size";
}

/// Label keys used across metrics.
pub mod labels {
    /// Reconcile or operate outcome (updated, noop, skipped, error).
    pub const OUTCOME: &str = "outcome";
    /// Config reload status (applied, rejected).
    pub const STATUS: &str = "status";
    /// Queue name (workflows, pods).
    pub const QUEUE: &str = "queue";
}

/// Records elapsed time when dropped.
///
/// Wrap a reconcile body in a guard so the duration is recorded on every
/// exit path, including early returns.
pub struct TimingGuard<F>
where
    F: Fn(Duration),
{
    start: Instant,
    record: F,
}

impl<F> TimingGuard<F>
where
    F: Fn(Duration),
{
    /// Creates a guard that calls `record` with the elapsed time on drop.
    #[must_use]
    pub fn new(record: F) -> Self {
        Self {
            start: Instant::now(),
            record,
        }
    }
}

impl<F> Drop for TimingGuard<F>
where
    F: Fn(Duration),
{
    fn drop(&mut self) {
        (self.record)(self.start.elapsed());
    }
}
