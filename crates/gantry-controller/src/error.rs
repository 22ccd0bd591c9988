//! Error types for the controller.

/// The result type used throughout gantry-controller.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in controller operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The controller configuration is missing or invalid.
    #[error("configuration error: {message}")]
    Configuration {
        /// Description of the problem.
        message: String,
    },

    /// A cluster read or write failed.
    #[error("cluster error: {message}")]
    Cluster {
        /// Description of the failure.
        message: String,
        /// The underlying cause, if any.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A resource required by the operation does not exist.
    #[error("{kind} not found: {name}")]
    NotFound {
        /// Resource kind (workflow, pod, config document).
        kind: &'static str,
        /// Resource name.
        name: String,
    },

    /// A resource being created already exists.
    #[error("{kind} already exists: {name}")]
    AlreadyExists {
        /// Resource kind.
        kind: &'static str,
        /// Resource name.
        name: String,
    },

    /// A serialization or deserialization error occurred.
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of the failure.
        message: String,
    },

    /// The workflow spec cannot be executed as declared.
    #[error("invalid workflow: {message}")]
    InvalidWorkflow {
        /// Description of the problem.
        message: String,
    },
}

impl Error {
    /// Creates a new configuration error.
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Creates a new cluster error.
    #[must_use]
    pub fn cluster(message: impl Into<String>) -> Self {
        Self::Cluster {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a new cluster error with a source.
    #[must_use]
    pub fn cluster_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Cluster {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Creates a new serialization error.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Creates a new invalid-workflow error.
    #[must_use]
    pub fn invalid_workflow(message: impl Into<String>) -> Self {
        Self::InvalidWorkflow {
            message: message.into(),
        }
    }

    /// Returns true if this error reports a create of an existing resource.
    #[must_use]
    pub const fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists { .. })
    }
}
