//! Logging initialization and span helpers.
//!
//! Structured logging with consistent spans across gantry components. Call
//! [`init_logging`] once at startup; span helpers keep field names uniform
//! so log pipelines can correlate workflow activity.

use std::sync::Once;

use tracing::Span;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

static INIT: Once = Once::new();

/// Log output format.
#[derive(Debug, Clone, Copy, Default)]
pub enum LogFormat {
    /// JSON structured logs (for production).
    Json,
    /// Pretty-printed logs (for development).
    #[default]
    Pretty,
}

/// Initializes the logging subsystem.
///
/// Call once at application startup. Safe to call multiple times; subsequent
/// calls are no-ops.
///
/// # Environment Variables
///
/// - `RUST_LOG`: Controls log levels (e.g., `info`, `gantry_controller=debug`)
pub fn init_logging(format: LogFormat) {
    INIT.call_once(|| {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        match format {
            LogFormat::Json => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(fmt::layer().json())
                    .init();
            }
            LogFormat::Pretty => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(fmt::layer().pretty())
                    .init();
            }
        }
    });
}

/// Creates a span for operations on one workflow.
#[must_use]
pub fn workflow_span(operation: &str, namespace: &str, workflow: &str) -> Span {
    tracing::info_span!(
        "workflow",
        op = operation,
        namespace = namespace,
        workflow = workflow,
    )
}

/// Creates a span for the reconciliation of one pod observation.
#[must_use]
pub fn pod_span(operation: &str, namespace: &str, pod: &str) -> Span {
    tracing::info_span!("pod", op = operation, namespace = namespace, pod = pod)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_logging_is_idempotent() {
        init_logging(LogFormat::Pretty);
        init_logging(LogFormat::Pretty);
    }

    #[test]
    fn span_helpers_create_spans() {
        let span = workflow_span("operate", "batch", "pipeline");
        let _guard = span.enter();
        tracing::info!("message inside workflow span");

        let span = pod_span("reconcile", "batch", "pipeline-extract");
        let _guard = span.enter();
        tracing::info!("message inside pod span");
    }
}
