//! Decides whether an invocation key needs any work, and of which kind.

use k8s_openapi::api::{apps::v1::Deployment, core::v1::ConfigMap};
use snafu::{OptionExt, ResultExt, Snafu};

use crate::{
    constants::{RESTART_LABEL_KEY, RESTART_LABEL_VALUE},
    key::ObjectKey,
    signal::Cancellation,
    store::{Store, StoreError},
};

#[derive(Debug, Snafu)]
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

    #[snafu(display("cancelled while classifying {key}"))]
    Cancelled { key: ObjectKey },
}

/// What kind of object the controller is invoked for. Fixed for the lifetime of the process.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, clap::ValueEnum, strum::Display)]
#[strum(serialize_all = "kebab-case")]
pub enum TriggerMode {
    /// Keys name ConfigMaps. Every Deployment consuming a changed ConfigMap is restarted.
    #[default]
    ConfigMap,

    /// Keys name Deployments. Deployments labelled `restart=true` are restarted once.
    Label,
}

/// A unit of work produced by [`classify`].
#[derive(Debug)]
pub enum Trigger {
    /// The ConfigMap exists; its consumers still have to be found.
    ConfigChanged { config_map: ObjectKey },

    /// The Deployment exists and carries the opt-in label.
    OptIn { deployment: Box<Deployment> },
}

/// Returns `true` if `deployment` is labelled `restart=true`, compared exactly.
pub fn is_opted_in(deployment: &Deployment) -> bool {
    deployment
        .metadata
        .labels
        .as_ref()
        .and_then(|labels| labels.get(RESTART_LABEL_KEY))
        .is_some_and(|value| value == RESTART_LABEL_VALUE)
}

/// Fetches the object named by `key` and decides whether a restart is due.
///
/// A missing object is not an error: it has been deleted since the notification and there is
/// nothing left to do.
pub async fn classify(
    mode: TriggerMode,
    key: &ObjectKey,
    config_maps: &dyn Store<ConfigMap>,
    deployments: &dyn Store<Deployment>,
    cancellation: &Cancellation,
) -> Result<Option<Trigger>, Error> {
    match mode {
        TriggerMode::ConfigMap => {
            let config_map = cancellation
                .run(config_maps.get(key))
                .await
                .context(CancelledSnafu { key: key.clone() })?
                .context(GetConfigMapSnafu {
                    config_map: key.clone(),
                })?;

            if config_map.is_none() {
                tracing::debug!(config_map = %key, "ConfigMap no longer exists, nothing to do");
                return Ok(None);
            }

            Ok(Some(Trigger::ConfigChanged {
                config_map: key.clone(),
            }))
        }
        TriggerMode::Label => {
            let deployment = cancellation
                .run(deployments.get(key))
                .await
                .context(CancelledSnafu { key: key.clone() })?
                .context(GetDeploymentSnafu {
                    deployment: key.clone(),
                })?;

            let Some(deployment) = deployment else {
                tracing::debug!(deployment = %key, "Deployment no longer exists, nothing to do");
                return Ok(None);
            };

            if !is_opted_in(&deployment) {
                tracing::debug!(deployment = %key, "Deployment has not opted in to a restart");
                return Ok(None);
            }

            Ok(Some(Trigger::OptIn {
                deployment: Box::new(deployment),
            }))
        }
    }
}
