//! Finds the Deployments consuming a ConfigMap.

use k8s_openapi::api::apps::v1::Deployment;
use snafu::{OptionExt, ResultExt, Snafu};

use crate::{
    key::ObjectKey,
    signal::Cancellation,
    store::{Store, StoreError},
};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to list Deployments in namespace {namespace:?}"))]
    ListDeployments {
        source: StoreError,
        namespace: String,
    },

    #[snafu(display("cancelled while listing Deployments in namespace {namespace:?}"))]
    Cancelled { namespace: String },
}

/// Returns `true` if any container of the Pod template pulls in the ConfigMap `name` through
/// `envFrom`.
///
/// The first match is enough: the whole Pod template is restarted as a unit.
pub fn references_config_map(deployment: &Deployment, name: &str) -> bool {
    let Some(pod_spec) = deployment
        .spec
        .as_ref()
        .and_then(|spec| spec.template.spec.as_ref())
    else {
        return false;
    };

    pod_spec
        .containers
        .iter()
        .flat_map(|container| container.env_from.iter().flatten())
        .filter_map(|env_from| env_from.config_map_ref.as_ref())
        .any(|config_map_ref| config_map_ref.name == name)
}

/// Lists the Deployments in the ConfigMap's namespace and keeps those referencing it, in the
/// order the store returned them.
///
/// ConfigMaps cannot be referenced across namespaces, so a single namespaced list suffices.
pub async fn find_dependents(
    deployments: &dyn Store<Deployment>,
    config_map: &ObjectKey,
    cancellation: &Cancellation,
) -> Result<Vec<Deployment>, Error> {
    let namespace = &config_map.namespace;
    let candidates = cancellation
        .run(deployments.list(namespace))
        .await
        .context(CancelledSnafu { namespace })?
        .context(ListDeploymentsSnafu { namespace })?;

    let scanned = candidates.len();
    let dependents: Vec<_> = candidates
        .into_iter()
        .filter(|deployment| references_config_map(deployment, &config_map.name))
        .collect();

    tracing::debug!(
        %config_map,
        scanned,
        matched = dependents.len(),
        "scanned Deployments for ConfigMap references"
    );

    Ok(dependents)
}
