//! Wires [`reconcile`] into a [`kube::runtime::Controller`].
//!
//! The runtime owns watching, queueing and deduplication of keys. In ConfigMap mode it watches
//! ConfigMaps, in label mode only Deployments carrying the opt-in label.

use std::{fmt::Debug, sync::Arc};

use futures::StreamExt;
use k8s_openapi::{
    NamespaceResourceScope,
    api::{apps::v1::Deployment, core::v1::ConfigMap},
};
use kube::{
    Api, Client, Resource,
    runtime::{
        Controller,
        controller::{self, Action},
        watcher,
    },
};
use serde::de::DeserializeOwned;

use crate::{
    classify::TriggerMode,
    constants::{CONTROLLER_NAME, RESTART_LABEL_SELECTOR},
    key::ObjectKey,
    logging::report_controller_reconciled,
    namespace::WatchNamespace,
    reconcile::{Context, Error, reconcile},
};

/// Runs the controller for `ctx.mode` until `shutdown` completes and in-flight reconciliations
/// have finished.
pub async fn run<F>(client: Client, namespace: &WatchNamespace, ctx: Arc<Context>, shutdown: F)
where
    F: Future<Output = ()> + Send + Sync + 'static,
{
    tracing::info!(mode = %ctx.mode, ?namespace, "starting controller");

    match ctx.mode {
        TriggerMode::ConfigMap => {
            let api: Api<ConfigMap> = namespace.get_api(&client);
            run_for(api, watcher::Config::default(), ctx, shutdown).await;
        }
        TriggerMode::Label => {
            let api: Api<Deployment> = namespace.get_api(&client);
            let watcher_config = watcher::Config::default().labels(RESTART_LABEL_SELECTOR);
            run_for(api, watcher_config, ctx, shutdown).await;
        }
    }

    tracing::info!("controller stopped");
}

async fn run_for<K, F>(api: Api<K>, watcher_config: watcher::Config, ctx: Arc<Context>, shutdown: F)
where
    K: Resource<DynamicType = (), Scope = NamespaceResourceScope>
        + Clone
        + Debug
        + DeserializeOwned
        + Send
        + Sync
        + 'static,
    F: Future<Output = ()> + Send + Sync + 'static,
{
    Controller::new(api, watcher_config)
        .with_config(controller::Config::default().concurrency(1))
        .graceful_shutdown_on(shutdown)
        .run(reconcile_object, error_policy, ctx)
        .for_each(|result| async move {
            report_controller_reconciled(CONTROLLER_NAME, &result);
        })
        .await;
}

async fn reconcile_object<K>(object: Arc<K>, ctx: Arc<Context>) -> Result<Action, Error>
where
    K: Resource,
{
    let Some(key) = ObjectKey::from_resource(object.as_ref()) else {
        // Only namespaced kinds are watched, the runtime never hands out objects without a name
        return Ok(Action::await_change());
    };

    reconcile(&key, &ctx).await
}

fn error_policy<K>(_object: Arc<K>, error: &Error, ctx: Arc<Context>) -> Action {
    if error.is_cancellation() {
        Action::await_change()
    } else {
        Action::requeue(ctx.error_requeue_delay)
    }
}
