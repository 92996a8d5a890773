//! The reconciliation entry point, invoked once per delivered key.
//!
//! A pass classifies the key, finds the affected Deployments and restarts them one after the
//! other through [`with_conflict_retry`]. The first failure ends the pass; re-delivery of the
//! same key re-scans and restarts everything that still applies.

use std::{sync::Arc, time::Duration};

use k8s_openapi::api::{apps::v1::Deployment, core::v1::ConfigMap};
use kube::{
    core::DynamicObject,
    runtime::{controller::Action, reflector::ObjectRef},
};
use snafu::Snafu;
use strum::{EnumDiscriminants, IntoStaticStr};

use crate::{
    apply::{self, Applied, ConflictRetryPolicy, with_conflict_retry},
    classify::{self, Trigger, TriggerMode, classify},
    key::ObjectKey,
    logging::ReconcilerError,
    metrics::RestartSink,
    plan::{RestartCause, RestartTimestamp, desired_restart},
    scan::{self, find_dependents},
    signal::Cancellation,
    store::{Store, StoreError},
};

/// Everything a reconciliation needs, shared by all invocations.
pub struct Context {
    pub config_maps: Arc<dyn Store<ConfigMap>>,
    pub deployments: Arc<dyn Store<Deployment>>,
    pub restarts: Arc<dyn RestartSink>,
    pub mode: TriggerMode,
    pub conflict_retry: ConflictRetryPolicy,
    pub cancellation: Cancellation,

    /// How long a failed key waits before it is reconciled again.
    pub error_requeue_delay: Duration,
}

impl Context {
    /// Creates a context with the default conflict retry policy and a cancellation that never
    /// fires.
    pub fn new(
        config_maps: Arc<dyn Store<ConfigMap>>,
        deployments: Arc<dyn Store<Deployment>>,
        restarts: Arc<dyn RestartSink>,
        mode: TriggerMode,
    ) -> Self {
        Self {
            config_maps,
            deployments,
            restarts,
            mode,
            conflict_retry: ConflictRetryPolicy::default(),
            cancellation: Cancellation::never(),
            error_requeue_delay: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Snafu, EnumDiscriminants)]
#[strum_discriminants(derive(IntoStaticStr))]
pub enum Error {
    #[snafu(display("failed to get ConfigMap {config_map}"))]
    GetConfigMap {
        source: StoreError,
        config_map: ObjectKey,
    },

    #[snafu(display("failed to get Deployment {deployment}"))]
    GetDeployment {
        source: StoreError,
        deployment: ObjectKey,
    },

    #[snafu(display("failed to list Deployments in namespace {namespace:?}"))]
    ListDeployments {
        source: StoreError,
        namespace: String,
    },

    #[snafu(display(
        "failed to restart Deployment {deployment} ({restarted} restarted before it in this pass)"
    ))]
    RestartDeployment {
        source: apply::Error,
        deployment: ObjectKey,
        restarted: usize,
    },

    #[snafu(display("reconciliation of {key} was cancelled"))]
    Cancelled { key: ObjectKey },
}

impl Error {
    /// Returns `true` if the pass was abandoned because of shutdown rather than a failure.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    fn from_classify(error: classify::Error, key: &ObjectKey) -> Self {
        match error {
            classify::Error::GetConfigMap { source, config_map } => {
                Self::GetConfigMap { source, config_map }
            }
            classify::Error::GetDeployment { source, deployment } => {
                Self::GetDeployment { source, deployment }
            }
            classify::Error::Cancelled { .. } => Self::Cancelled { key: key.clone() },
        }
    }

    fn from_scan(error: scan::Error, key: &ObjectKey) -> Self {
        match error {
            scan::Error::ListDeployments { source, namespace } => {
                Self::ListDeployments { source, namespace }
            }
            scan::Error::Cancelled { .. } => Self::Cancelled { key: key.clone() },
        }
    }

    fn from_apply(
        error: apply::Error,
        key: &ObjectKey,
        deployment: ObjectKey,
        restarted: usize,
    ) -> Self {
        match error {
            apply::Error::Cancelled { .. } => Self::Cancelled { key: key.clone() },
            source => Self::RestartDeployment {
                source,
                deployment,
                restarted,
            },
        }
    }
}

impl ReconcilerError for Error {
    fn category(&self) -> &'static str {
        ErrorDiscriminants::from(self).into()
    }

    fn secondary_object(&self) -> Option<ObjectRef<DynamicObject>> {
        match self {
            Self::RestartDeployment { deployment, .. } => Some(
                ObjectRef::<Deployment>::new(&deployment.name)
                    .within(&deployment.namespace)
                    .erase(),
            ),
            Self::GetConfigMap { .. }
            | Self::GetDeployment { .. }
            | Self::ListDeployments { .. }
            | Self::Cancelled { .. } => None,
        }
    }
}

/// Reconciles the object named by `key` according to `ctx.mode`.
///
/// Keys that match nothing succeed without writing anything. Success never asks for a requeue,
/// the next change to a watched object delivers the key again.
#[tracing::instrument(skip(ctx), fields(mode = %ctx.mode))]
pub async fn reconcile(key: &ObjectKey, ctx: &Context) -> Result<Action, Error> {
    let trigger = classify(
        ctx.mode,
        key,
        ctx.config_maps.as_ref(),
        ctx.deployments.as_ref(),
        &ctx.cancellation,
    )
    .await
    .map_err(|error| Error::from_classify(error, key))?;

    let Some(trigger) = trigger else {
        return Ok(Action::await_change());
    };

    let restarted_at = RestartTimestamp::now();
    match trigger {
        Trigger::ConfigChanged { config_map } => {
            let dependents =
                find_dependents(ctx.deployments.as_ref(), &config_map, &ctx.cancellation)
                    .await
                    .map_err(|error| Error::from_scan(error, key))?;

            let cause = RestartCause::ConfigMapChanged {
                name: config_map.name.clone(),
            };
            let matched = dependents.len();
            let mut restarted = 0;
            for deployment in dependents {
                let deployment_key =
                    ObjectKey::from_resource_in(&deployment, &config_map.namespace);
                let result =
                    restart(ctx, &deployment_key, Some(deployment), &cause, &restarted_at).await;

                match result {
                    Ok(true) => restarted += 1,
                    Ok(false) => {}
                    Err(error) => {
                        tracing::warn!(
                            %config_map,
                            deployment = %deployment_key,
                            restarted,
                            matched,
                            "aborting restart pass, remaining Deployments wait for the next delivery"
                        );
                        return Err(Error::from_apply(error, key, deployment_key, restarted));
                    }
                }
            }

            tracing::debug!(%config_map, matched, restarted, "finished restart pass");
        }
        Trigger::OptIn { deployment } => {
            restart(
                ctx,
                key,
                Some(*deployment),
                &RestartCause::OptInLabel,
                &restarted_at,
            )
            .await
            .map_err(|error| Error::from_apply(error, key, key.clone(), 0))?;
        }
    }

    Ok(Action::await_change())
}

/// Restarts a single Deployment, returning whether a write happened.
async fn restart(
    ctx: &Context,
    deployment: &ObjectKey,
    first: Option<Deployment>,
    cause: &RestartCause,
    restarted_at: &RestartTimestamp,
) -> Result<bool, apply::Error> {
    let applied = with_conflict_retry(
        ctx.deployments.as_ref(),
        deployment,
        first,
        |latest: &Deployment| desired_restart(latest, cause, restarted_at),
        &ctx.conflict_retry,
        &ctx.cancellation,
    )
    .await?;

    match applied {
        Applied::Updated(_) => {
            ctx.restarts.record_restart(deployment);
            tracing::info!(%deployment, %restarted_at, "restarted Deployment");
            Ok(true)
        }
        Applied::Unchanged | Applied::Gone => Ok(false),
    }
}
