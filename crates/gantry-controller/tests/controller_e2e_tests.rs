//! Whole-controller scenarios: config resolve, event sources, dispatch loop
//! and both reconcilers running against the in-memory cluster.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;

use gantry_core::contract::{
    CONFIG_DATA_KEY, LABEL_KEY_COMPLETED, LABEL_KEY_WORKFLOW,
};
use gantry_core::pod::{
    ContainerState, ContainerStateTerminated, ContainerStatus, Pod, PodPhase,
};
use gantry_core::workflow::{NodePhase, Template, Workflow};

use gantry_controller::cluster::memory::InMemoryCluster;
use gantry_controller::cluster::{ClusterClient, ConfigDocument};
use gantry_controller::controller::WorkflowController;

const NAMESPACE: &str = "batch";
const CONTROLLER_NAMESPACE: &str = "gantry-system";
const CONFIG_DOCUMENT: &str = "workflow-controller";

fn seed_config(cluster: &InMemoryCluster) {
    let mut doc = ConfigDocument::new(CONFIG_DOCUMENT, CONTROLLER_NAMESPACE);
    doc.data.insert(
        CONFIG_DATA_KEY.into(),
        "executorImage: gantry/executor:v1\n".into(),
    );
    cluster.put_config_document(doc);
}

fn one_step_workflow(name: &str) -> Workflow {
    let mut workflow = Workflow::new(name, NAMESPACE);
    workflow.spec.templates.push(Template {
        name: "step".into(),
        container: Some(gantry_core::pod::Container {
            name: String::new(),
            image: "busybox:1.36".into(),
            command: vec!["sh".into(), "-c".into(), "true".into()],
            ..gantry_core::pod::Container::default()
        }),
        ..Template::default()
    });
    workflow
}

fn succeeded_pod(workflow: &str, name: &str) -> Pod {
    let mut pod = Pod::default();
    pod.metadata.name = name.into();
    pod.metadata.namespace = NAMESPACE.into();
    pod.metadata
        .labels
        .insert(LABEL_KEY_WORKFLOW.into(), workflow.into());
    pod.metadata
        .labels
        .insert(LABEL_KEY_COMPLETED.into(), "false".into());
    pod.status.phase = PodPhase::Succeeded;
    pod.status.container_statuses.push(ContainerStatus {
        name: "main".into(),
        ready: false,
        state: ContainerState {
            terminated: Some(ContainerStateTerminated {
                exit_code: 0,
                message: String::new(),
                finished_at: Some(Utc::now()),
            }),
        },
    });
    pod
}

/// Polls until the condition holds or the deadline passes.
async fn wait_for<F>(what: &str, mut condition: F)
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {what}"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn controller_drives_a_workflow_to_completion() {
    let cluster = Arc::new(InMemoryCluster::new());
    seed_config(&cluster);

    let controller = WorkflowController::new(
        cluster.clone() as Arc<dyn ClusterClient>,
        CONFIG_DOCUMENT,
    )
    .with_config_namespace(CONTROLLER_NAMESPACE)
    .with_stats_interval(Duration::from_millis(50));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let run = tokio::spawn(controller.run(shutdown_rx));

    // Submitting the workflow wakes the operator through the watch.
    cluster.put_workflow(one_step_workflow("demo"));

    // The operator materialises the node's pod.
    {
        let cluster = Arc::clone(&cluster);
        wait_for("pod creation", move || {
            cluster.pod(NAMESPACE, "demo-step").is_some()
        })
        .await;
    }

    // The pod finishes; the reconciler and operator close the loop. By now
    // the pod watch is registered (it preceded the dispatch work above), so
    // a single event suffices.
    cluster.put_pod(succeeded_pod("demo", "demo-step"));
    {
        let cluster = Arc::clone(&cluster);
        wait_for("workflow completion", move || {
            cluster.workflow(NAMESPACE, "demo").unwrap().status.phase == NodePhase::Succeeded
        })
        .await;
    }

    // Workflow terminal state is fully recorded.
    {
        let cluster = Arc::clone(&cluster);
        wait_for("workflow label", move || {
            cluster
                .workflow(NAMESPACE, "demo")
                .unwrap()
                .is_labelled_completed()
        })
        .await;
    }
    let wf = cluster.workflow(NAMESPACE, "demo").unwrap();
    assert_eq!(wf.status.nodes["demo-step"].phase, NodePhase::Succeeded);
    assert!(wf.status.finished_at.is_some());

    // The pod was labelled out of the watch.
    {
        let cluster = Arc::clone(&cluster);
        wait_for("pod label", move || {
            cluster
                .pod(NAMESPACE, "demo-step")
                .unwrap()
                .metadata
                .has_label(LABEL_KEY_COMPLETED, "true")
        })
        .await;
    }

    shutdown_tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(5), run)
        .await
        .expect("controller should stop on shutdown")
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn configuration_hot_reloads_while_running() {
    let cluster = Arc::new(InMemoryCluster::new());
    seed_config(&cluster);

    let controller = WorkflowController::new(
        cluster.clone() as Arc<dyn ClusterClient>,
        CONFIG_DOCUMENT,
    )
    .with_config_namespace(CONTROLLER_NAMESPACE);
    let store = controller.config();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let run = tokio::spawn(controller.run(shutdown_rx));

    {
        let store = store.clone();
        wait_for("initial config", move || {
            store.snapshot().executor_image == "gantry/executor:v1"
        })
        .await;
    }

    // A valid update is picked up by the config watch.
    let mut doc = ConfigDocument::new(CONFIG_DOCUMENT, CONTROLLER_NAMESPACE);
    doc.data.insert(
        CONFIG_DATA_KEY.into(),
        "executorImage: gantry/executor:v2\n".into(),
    );
    {
        let cluster = Arc::clone(&cluster);
        let store = store.clone();
        let doc = doc.clone();
        wait_for("config reload", move || {
            cluster.put_config_document(doc.clone());
            store.snapshot().executor_image == "gantry/executor:v2"
        })
        .await;
    }

    // An invalid update is rejected and the live config survives.
    doc.data
        .insert(CONFIG_DATA_KEY.into(), "namespace: elsewhere\n".into());
    cluster.put_config_document(doc);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(store.snapshot().executor_image, "gantry/executor:v2");

    shutdown_tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(5), run)
        .await
        .expect("controller should stop on shutdown")
        .unwrap()
        .unwrap();
}
