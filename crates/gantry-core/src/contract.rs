//! Wire contract shared with the executor sidecar and the cluster.
//!
//! The label keys, annotation keys and container names below are read and
//! written by processes outside this repository (the executor sidecar, the
//! submission CLI, other controllers). They are frozen: renaming any of them
//! breaks pods already running in a cluster.

/// Label applied to pods to indicate the workflow that owns them.
///
/// Pods without this label are not part of any workflow and are ignored by
/// the controller.
pub const LABEL_KEY_WORKFLOW: &str = "workflows.argoproj.io/workflow";

/// Label applied to workflows and pods once their outcome has been recorded.
///
/// A pod carrying `completed=true` is excluded from the pod watch; a workflow
/// carrying it is excluded from the workflow watch.
pub const LABEL_KEY_COMPLETED: &str = "workflows.argoproj.io/completed";

/// Annotation holding the JSON-encoded template the pod was created from.
///
/// The reconciler consults it to decide daemon semantics for running pods.
pub const ANNOTATION_KEY_TEMPLATE: &str = "workflows.argoproj.io/template";

/// Annotation in which the executor sidecar publishes JSON-encoded outputs.
pub const ANNOTATION_KEY_OUTPUTS: &str = "workflows.argoproj.io/outputs";

/// Annotation carrying an out-of-band node message set by the executor.
pub const ANNOTATION_KEY_NODE_MESSAGE: &str = "workflows.argoproj.io/node-message";

/// Name of the container running the user's workload.
pub const MAIN_CONTAINER_NAME: &str = "main";

/// Name of the executor sidecar container that saves artifacts.
pub const WAIT_CONTAINER_NAME: &str = "wait";

/// Key under which the controller configuration document stores its payload.
pub const CONFIG_DATA_KEY: &str = "config";

/// Environment variable naming the namespace the controller runs in.
pub const ENV_CONTROLLER_NAMESPACE: &str = "GANTRY_NAMESPACE";

/// Namespace assumed when [`ENV_CONTROLLER_NAMESPACE`] is unset or empty.
pub const DEFAULT_CONTROLLER_NAMESPACE: &str = "gantry-system";

/// Environment variable through which the wait sidecar receives the
/// artifact repository configuration.
pub const ENV_ARTIFACT_REPOSITORY: &str = "GANTRY_ARTIFACT_REPOSITORY";
