//! End-to-end reconciliation passes against the in-memory stores.

use std::sync::Arc;

use app_restart_controller::{
    apply,
    classify::{TriggerMode, is_opted_in},
    constants::{RESTART_LABEL_KEY, RESTARTED_AT_ANNOTATION_KEY},
    key::ObjectKey,
    metrics::Metrics,
    reconcile::{Context, Error, reconcile},
    signal::Cancellation,
    store::{InMemoryStore, StoreError, memory::Operation},
};
use k8s_openapi::api::{apps::v1::Deployment, core::v1::ConfigMap};
use kube::runtime::controller::Action;
use serde_json::json;

struct Harness {
    deployments: Arc<InMemoryStore<Deployment>>,
    metrics: Metrics,
    ctx: Context,
}

impl Harness {
    fn new(
        mode: TriggerMode,
        config_maps: impl IntoIterator<Item = ConfigMap>,
        deployments: impl IntoIterator<Item = Deployment>,
    ) -> Self {
        let config_maps = Arc::new(InMemoryStore::new(config_maps));
        let deployments = Arc::new(InMemoryStore::new(deployments));
        let metrics = Metrics::new().unwrap();
        let ctx = Context::new(
            config_maps,
            deployments.clone(),
            Arc::new(metrics.clone()),
            mode,
        );

        Self {
            deployments,
            metrics,
            ctx,
        }
    }

    async fn reconcile(&self, namespace: &str, name: &str) -> Result<Action, Error> {
        reconcile(&ObjectKey::new(namespace, name), &self.ctx).await
    }

    async fn deployment(&self, name: &str) -> Deployment {
        self.deployments
            .snapshot(&ObjectKey::new("default", name))
            .await
            .unwrap()
    }
}

fn config_map(name: &str) -> ConfigMap {
    serde_json::from_value(json!({
        "apiVersion": "v1",
        "kind": "ConfigMap",
        "metadata": { "name": name, "namespace": "default" },
        "data": { "LOG_LEVEL": "debug" },
    }))
    .unwrap()
}

fn deployment(name: &str, config_map: Option<&str>) -> Deployment {
    let env_from = config_map.map(|name| json!([{ "configMapRef": { "name": name } }]));
    serde_json::from_value(json!({
        "apiVersion": "apps/v1",
        "kind": "Deployment",
        "metadata": { "name": name, "namespace": "default" },
        "spec": {
            "replicas": 1,
            "selector": { "matchLabels": { "app": name } },
            "template": {
                "metadata": { "labels": { "app": name } },
                "spec": {
                    "containers": [{ "name": "test", "image": "nginx", "envFrom": env_from }],
                },
            },
        },
    }))
    .unwrap()
}

fn opted_in(mut deployment: Deployment) -> Deployment {
    deployment
        .metadata
        .labels
        .get_or_insert_with(Default::default)
        .insert(RESTART_LABEL_KEY.to_owned(), "true".to_owned());
    deployment
}

fn restarted_at(deployment: &Deployment) -> Option<&str> {
    deployment
        .spec
        .as_ref()?
        .template
        .metadata
        .as_ref()?
        .annotations
        .as_ref()?
        .get(RESTARTED_AT_ANNOTATION_KEY)
        .map(String::as_str)
}

fn request_error() -> StoreError {
    StoreError::Request {
        source: "the server is currently unable to handle the request".into(),
    }
}

/// Strips what legitimately differs between two restarts of the same object.
fn without_restart_marker(mut deployment: Deployment) -> Deployment {
    deployment.metadata.resource_version = None;
    if let Some(annotations) = deployment
        .spec
        .as_mut()
        .and_then(|spec| spec.template.metadata.as_mut())
        .and_then(|metadata| metadata.annotations.as_mut())
    {
        annotations.remove(RESTARTED_AT_ANNOTATION_KEY);
    }
    deployment
}

#[tokio::test]
async fn config_map_change_restarts_consumer() {
    let harness = Harness::new(
        TriggerMode::ConfigMap,
        [config_map("my-config")],
        [deployment("restart-me", Some("my-config"))],
    );

    let action = harness.reconcile("default", "my-config").await.unwrap();

    assert_eq!(action, Action::await_change());
    let restarted = harness.deployment("restart-me").await;
    assert!(restarted_at(&restarted).is_some_and(|value| !value.is_empty()));
    assert_eq!(harness.metrics.restarts(), 1);
}

#[tokio::test]
async fn unlabelled_deployment_is_left_alone() {
    let harness = Harness::new(TriggerMode::Label, [], [deployment("no-restart", None)]);

    harness.reconcile("default", "no-restart").await.unwrap();

    let unchanged = harness.deployment("no-restart").await;
    let template_annotations = unchanged
        .spec
        .and_then(|spec| spec.template.metadata)
        .and_then(|metadata| metadata.annotations);
    assert_eq!(template_annotations, None);
    assert_eq!(harness.deployments.replace_count().await, 0);
    assert_eq!(harness.metrics.restarts(), 0);
}

#[tokio::test]
async fn already_annotated_deployment_consumes_label() {
    let mut already_annotated = opted_in(deployment("already-annotated", None));
    if let Some(metadata) = already_annotated
        .spec
        .as_mut()
        .and_then(|spec| spec.template.metadata.as_mut())
    {
        metadata.annotations = Some(
            [(
                RESTARTED_AT_ANNOTATION_KEY.to_owned(),
                "2020-01-01T00:00:00Z".to_owned(),
            )]
            .into(),
        );
    }
    let harness = Harness::new(TriggerMode::Label, [], [already_annotated]);

    harness.reconcile("default", "already-annotated").await.unwrap();

    let restarted = harness.deployment("already-annotated").await;
    assert!(!is_opted_in(&restarted));
    assert!(
        !restarted
            .metadata
            .labels
            .as_ref()
            .is_some_and(|labels| labels.contains_key(RESTART_LABEL_KEY))
    );
    assert!(restarted_at(&restarted).is_some_and(|value| !value.is_empty()));
    assert_eq!(harness.metrics.restarts(), 1);
}

#[tokio::test]
async fn repeated_reconciliation_only_moves_the_timestamp() {
    let harness = Harness::new(
        TriggerMode::ConfigMap,
        [config_map("my-config")],
        [deployment("restart-me", Some("my-config"))],
    );

    harness.reconcile("default", "my-config").await.unwrap();
    let first = harness.deployment("restart-me").await;
    harness.reconcile("default", "my-config").await.unwrap();
    let second = harness.deployment("restart-me").await;

    assert!(restarted_at(&second).is_some());
    assert_eq!(without_restart_marker(first), without_restart_marker(second));
    assert_eq!(harness.metrics.restarts(), 2);
}

#[tokio::test]
async fn unreferenced_config_map_writes_nothing() {
    let harness = Harness::new(
        TriggerMode::ConfigMap,
        [config_map("not-used")],
        [
            deployment("restart-me", Some("my-config")),
            deployment("no-env", None),
        ],
    );

    let action = harness.reconcile("default", "not-used").await.unwrap();

    assert_eq!(action, Action::await_change());
    assert_eq!(harness.deployments.replace_count().await, 0);
    assert_eq!(harness.metrics.restarts(), 0);
}

#[tokio::test]
async fn deleted_config_map_is_a_no_op() {
    let harness = Harness::new(
        TriggerMode::ConfigMap,
        [],
        [deployment("restart-me", Some("my-config"))],
    );

    harness.reconcile("default", "my-config").await.unwrap();

    assert_eq!(harness.deployments.replace_count().await, 0);
}

#[tokio::test]
async fn consumers_in_other_namespaces_are_ignored() {
    let mut elsewhere = deployment("elsewhere", Some("my-config"));
    elsewhere.metadata.namespace = Some("other".to_owned());
    let harness = Harness::new(
        TriggerMode::ConfigMap,
        [config_map("my-config")],
        [deployment("restart-me", Some("my-config")), elsewhere],
    );

    harness.reconcile("default", "my-config").await.unwrap();

    let untouched = harness
        .deployments
        .snapshot(&ObjectKey::new("other", "elsewhere"))
        .await
        .unwrap();
    assert_eq!(restarted_at(&untouched), None);
    assert_eq!(harness.metrics.restarts(), 1);
}

#[tokio::test]
async fn opt_in_label_triggers_once() {
    let harness = Harness::new(
        TriggerMode::Label,
        [],
        [opted_in(deployment("restart-me", None))],
    );

    harness.reconcile("default", "restart-me").await.unwrap();
    let restarted = harness.deployment("restart-me").await;
    assert!(!is_opted_in(&restarted));

    // The label is gone, so the edit the controller itself made does not trigger again
    harness.reconcile("default", "restart-me").await.unwrap();
    assert_eq!(harness.deployments.replace_count().await, 1);
    assert_eq!(harness.metrics.restarts(), 1);

    // Labelling it again asks for another restart
    harness.deployments.insert(opted_in(restarted)).await.unwrap();
    harness.reconcile("default", "restart-me").await.unwrap();
    assert!(!is_opted_in(&harness.deployment("restart-me").await));
    assert_eq!(harness.metrics.restarts(), 2);
}

#[tokio::test(start_paused = true)]
async fn concurrent_edit_is_kept() {
    let harness = Harness::new(
        TriggerMode::ConfigMap,
        [config_map("my-config")],
        [deployment("restart-me", Some("my-config"))],
    );
    harness
        .deployments
        .interfere_before_next_replace(|deployment: &mut Deployment| {
            deployment
                .metadata
                .labels
                .get_or_insert_with(Default::default)
                .insert("team".to_owned(), "payments".to_owned());
        })
        .await;

    harness.reconcile("default", "my-config").await.unwrap();

    let restarted = harness.deployment("restart-me").await;
    assert_eq!(
        restarted
            .metadata
            .labels
            .as_ref()
            .and_then(|labels| labels.get("team"))
            .map(String::as_str),
        Some("payments")
    );
    assert!(restarted_at(&restarted).is_some());
    assert_eq!(harness.deployments.replace_count().await, 1);
    assert_eq!(harness.metrics.restarts(), 1);
}

#[tokio::test(start_paused = true)]
async fn persistent_conflicts_fail_the_pass() {
    let harness = Harness::new(
        TriggerMode::ConfigMap,
        [config_map("my-config")],
        [deployment("restart-me", Some("my-config"))],
    );
    for _ in 0..10 {
        harness
            .deployments
            .interfere_before_next_replace(|deployment: &mut Deployment| {
                let generation = deployment.metadata.generation.unwrap_or(0);
                deployment.metadata.generation = Some(generation + 1);
            })
            .await;
    }

    let error = harness.reconcile("default", "my-config").await.unwrap_err();

    assert!(matches!(
        error,
        Error::RestartDeployment {
            source: apply::Error::ConflictRetriesExhausted { attempts: 4, .. },
            ..
        }
    ));
    assert_eq!(harness.deployments.replace_count().await, 0);
    assert_eq!(harness.metrics.restarts(), 0);
}

#[tokio::test]
async fn deployment_deleted_after_scan_is_skipped() {
    let harness = Harness::new(
        TriggerMode::ConfigMap,
        [config_map("my-config")],
        [
            deployment("a-deleted", Some("my-config")),
            deployment("b-kept", Some("my-config")),
        ],
    );
    harness.deployments.delete_before_next_replace().await;

    let action = harness.reconcile("default", "my-config").await.unwrap();

    assert_eq!(action, Action::await_change());
    assert!(
        harness
            .deployments
            .snapshot(&ObjectKey::new("default", "a-deleted"))
            .await
            .is_none()
    );
    assert!(restarted_at(&harness.deployment("b-kept").await).is_some());
    assert_eq!(harness.deployments.replace_count().await, 1);
    assert_eq!(harness.metrics.restarts(), 1);
}

#[tokio::test(start_paused = true)]
async fn label_removed_by_concurrent_writer_cancels_restart() {
    let harness = Harness::new(
        TriggerMode::Label,
        [],
        [opted_in(deployment("restart-me", None))],
    );
    harness
        .deployments
        .interfere_before_next_replace(|deployment: &mut Deployment| {
            if let Some(labels) = deployment.metadata.labels.as_mut() {
                labels.remove(RESTART_LABEL_KEY);
            }
        })
        .await;

    harness.reconcile("default", "restart-me").await.unwrap();

    let current = harness.deployment("restart-me").await;
    assert!(!is_opted_in(&current));
    assert_eq!(restarted_at(&current), None);
    assert_eq!(harness.deployments.replace_count().await, 0);
    assert_eq!(harness.metrics.restarts(), 0);
}

#[tokio::test(start_paused = true)]
async fn reference_removed_by_concurrent_writer_cancels_restart() {
    let harness = Harness::new(
        TriggerMode::ConfigMap,
        [config_map("my-config")],
        [deployment("restart-me", Some("my-config"))],
    );
    harness
        .deployments
        .interfere_before_next_replace(|deployment: &mut Deployment| {
            if let Some(pod_spec) = deployment
                .spec
                .as_mut()
                .and_then(|spec| spec.template.spec.as_mut())
            {
                for container in &mut pod_spec.containers {
                    container.env_from = None;
                }
            }
        })
        .await;

    harness.reconcile("default", "my-config").await.unwrap();

    assert_eq!(restarted_at(&harness.deployment("restart-me").await), None);
    assert_eq!(harness.deployments.replace_count().await, 0);
    assert_eq!(harness.metrics.restarts(), 0);
}

#[tokio::test]
async fn update_failure_is_not_retried() {
    let harness = Harness::new(
        TriggerMode::Label,
        [],
        [opted_in(deployment("restart-me", None))],
    );
    harness
        .deployments
        .fail_next(Operation::Replace, request_error())
        .await;

    let error = harness.reconcile("default", "restart-me").await.unwrap_err();

    assert!(matches!(
        error,
        Error::RestartDeployment {
            source: apply::Error::Update { .. },
            ..
        }
    ));
    assert!(is_opted_in(&harness.deployment("restart-me").await));
    assert_eq!(harness.metrics.restarts(), 0);
}

#[tokio::test]
async fn failed_pass_is_completed_by_redelivery() {
    let harness = Harness::new(
        TriggerMode::ConfigMap,
        [config_map("my-config")],
        [
            deployment("a-first", Some("my-config")),
            deployment("b-second", Some("my-config")),
            deployment("c-third", Some("my-config")),
        ],
    );
    harness
        .deployments
        .fail_next_on(
            Operation::Replace,
            ObjectKey::new("default", "b-second"),
            request_error(),
        )
        .await;

    let error = harness.reconcile("default", "my-config").await.unwrap_err();

    let Error::RestartDeployment {
        deployment,
        restarted,
        ..
    } = &error
    else {
        panic!("expected a restart failure, got {error:?}");
    };
    assert_eq!(deployment, &ObjectKey::new("default", "b-second"));
    assert_eq!(*restarted, 1);
    assert!(restarted_at(&harness.deployment("a-first").await).is_some());
    assert!(restarted_at(&harness.deployment("c-third").await).is_none());

    harness.reconcile("default", "my-config").await.unwrap();

    for name in ["a-first", "b-second", "c-third"] {
        assert!(restarted_at(&harness.deployment(name).await).is_some());
    }
    assert_eq!(harness.metrics.restarts(), 4);
}

#[tokio::test]
async fn list_failure_surfaces() {
    let harness = Harness::new(
        TriggerMode::ConfigMap,
        [config_map("my-config")],
        [deployment("restart-me", Some("my-config"))],
    );
    harness
        .deployments
        .fail_next(Operation::List, request_error())
        .await;

    let error = harness.reconcile("default", "my-config").await.unwrap_err();

    assert!(matches!(error, Error::ListDeployments { .. }));
    assert_eq!(harness.deployments.replace_count().await, 0);
}

#[tokio::test]
async fn cancellation_stops_the_pass() {
    let mut harness = Harness::new(
        TriggerMode::ConfigMap,
        [config_map("my-config")],
        [deployment("restart-me", Some("my-config"))],
    );
    let (trigger, cancellation) = Cancellation::new();
    harness.ctx.cancellation = cancellation;
    trigger.cancel();

    let error = harness.reconcile("default", "my-config").await.unwrap_err();

    assert!(error.is_cancellation());
    assert_eq!(harness.deployments.replace_count().await, 0);
}
