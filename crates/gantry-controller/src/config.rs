//! Hot-reloadable controller configuration.
//!
//! The controller derives its behaviour from a configuration document stored
//! in the cluster at a well-known namespace and name. The document is read
//! once at startup and re-applied on every change event; an invalid update
//! never replaces the configuration already in effect.

use std::collections::BTreeMap;
use std::sync::RwLock;

use metrics::counter;
use serde::{Deserialize, Serialize};

use gantry_core::contract::{
    CONFIG_DATA_KEY, DEFAULT_CONTROLLER_NAMESPACE, ENV_CONTROLLER_NAMESPACE,
};

use crate::cluster::ConfigDocument;
use crate::error::{Error, Result};
use crate::metrics::{labels as metrics_labels, names as metrics_names};

/// Controller behaviour derived from the configuration document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControllerConfig {
    /// Image of the executor sidecar injected into every workflow pod.
    /// Required; an update without it is rejected.
    #[serde(default)]
    pub executor_image: String,

    /// Where the executor stores artifacts. Opaque to the controller core;
    /// passed through to pod rendering.
    #[serde(default)]
    pub artifact_repository: ArtifactRepository,

    /// Namespace the watches are scoped to. Empty means all namespaces.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,

    /// Additional conjunctive label selectors applied to all watches.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub match_labels: BTreeMap<String, String>,
}

/// An artifact repository the executor stores artifacts in.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactRepository {
    /// S3-compatible repository.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s3: Option<S3ArtifactRepository>,
    // Future artifact repository backends slot in here.
}

/// An S3-compatible artifact repository.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct S3ArtifactRepository {
    /// Bucket name.
    pub bucket: String,

    /// Endpoint of the S3-compatible service.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub endpoint: String,

    /// Prefix under which the controller stores artifacts in the bucket.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub key_prefix: String,
}

/// Holds the live controller configuration, replaceable atomically.
///
/// Readers observe a consistent snapshot per read; the single writer is the
/// config event stream. An invalid update leaves the previous configuration
/// in effect.
#[derive(Debug)]
pub struct ConfigStore {
    current: RwLock<ControllerConfig>,
}

impl Default for ConfigStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigStore {
    /// Creates an empty store. The initial configuration must be applied via
    /// [`ConfigStore::update`] before the controller starts operating.
    #[must_use]
    pub fn new() -> Self {
        Self {
            current: RwLock::new(ControllerConfig::default()),
        }
    }

    /// Returns a consistent snapshot of the current configuration.
    ///
    /// # Panics
    ///
    /// Panics if the lock is poisoned, which cannot happen: no code path
    /// panics while holding it.
    #[must_use]
    pub fn snapshot(&self) -> ControllerConfig {
        self.current.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Applies a configuration document.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when the document lacks the payload
    /// key, the payload fails to parse, or `executorImage` is missing. The
    /// previous configuration remains in effect in every error case.
    pub fn update(&self, document: &ConfigDocument) -> Result<()> {
        let result = self.try_update(document);
        let status = if result.is_ok() { "applied" } else { "rejected" };
        counter!(
            metrics_names::CONFIG_RELOADS_TOTAL,
            metrics_labels::STATUS => status,
        )
        .increment(1);
        result
    }

    fn try_update(&self, document: &ConfigDocument) -> Result<()> {
        let payload = document.data.get(CONFIG_DATA_KEY).ok_or_else(|| {
            Error::configuration(format!(
                "config document '{}' does not have key '{CONFIG_DATA_KEY}'",
                document.name
            ))
        })?;

        let config: ControllerConfig = serde_yaml::from_str(payload).map_err(|e| {
            Error::configuration(format!(
                "config document '{}' is unparsable: {e}",
                document.name
            ))
        })?;

        if config.executor_image.is_empty() {
            return Err(Error::configuration(format!(
                "config document '{}' does not have executorImage",
                document.name
            )));
        }

        tracing::info!(
            document = %document.name,
            executor_image = %config.executor_image,
            "controller configuration updated"
        );
        *self.current.write().unwrap_or_else(|e| e.into_inner()) = config;
        Ok(())
    }
}

/// Resolves the controller's own namespace from the process environment.
///
/// Falls back to [`DEFAULT_CONTROLLER_NAMESPACE`] when the variable is unset
/// or empty.
#[must_use]
pub fn controller_namespace() -> String {
    controller_namespace_from(|key| std::env::var(key).ok())
}

/// Resolves the controller namespace with a custom environment source.
///
/// Test-friendly entry point accepting a key lookup function.
#[must_use]
pub fn controller_namespace_from<F>(get_env: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    match get_env(ENV_CONTROLLER_NAMESPACE) {
        Some(ns) if !ns.is_empty() => ns,
        _ => DEFAULT_CONTROLLER_NAMESPACE.to_string(),
    }
}
