//! Computes the mutation that makes a Deployment roll out, without touching any store.

use std::fmt::{self, Display};

use jiff::Timestamp;
use k8s_openapi::api::apps::v1::Deployment;

use crate::{
    classify::{TriggerMode, is_opted_in},
    constants::{RESTART_LABEL_KEY, RESTARTED_AT_ANNOTATION_KEY},
    scan::references_config_map,
};

/// The value written into the restart annotation.
///
/// Formatted as RFC 3339 in UTC with second precision, e.g. `2025-03-24T17:22:58Z`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RestartTimestamp(String);

impl RestartTimestamp {
    const FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

    pub fn now() -> Self {
        Self::from(Timestamp::now())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<Timestamp> for RestartTimestamp {
    fn from(timestamp: Timestamp) -> Self {
        Self(timestamp.strftime(Self::FORMAT).to_string())
    }
}

impl Display for RestartTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Why a Deployment is being restarted. Carries what is needed to re-check the reason against a
/// freshly fetched copy.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RestartCause {
    /// The named ConfigMap, in the Deployment's namespace, changed.
    ConfigMapChanged { name: String },

    /// The Deployment carries the opt-in label.
    OptInLabel,
}

impl RestartCause {
    pub fn mode(&self) -> TriggerMode {
        match self {
            Self::ConfigMapChanged { .. } => TriggerMode::ConfigMap,
            Self::OptInLabel => TriggerMode::Label,
        }
    }

    /// Returns `true` if the cause still applies to `deployment`.
    pub fn applies_to(&self, deployment: &Deployment) -> bool {
        match self {
            Self::ConfigMapChanged { name } => references_config_map(deployment, name),
            Self::OptInLabel => is_opted_in(deployment),
        }
    }
}

/// Returns a copy of `deployment` with the restart annotation set to `restarted_at`.
///
/// Any previous annotation value is overwritten; a changed value is what triggers the rollout.
/// In [`TriggerMode::Label`] the opt-in label is removed as well so that it is acted on once.
/// Nothing else is modified.
pub fn plan_restart(
    deployment: &Deployment,
    mode: TriggerMode,
    restarted_at: &RestartTimestamp,
) -> Deployment {
    let mut planned = deployment.clone();

    let template_metadata = planned
        .spec
        .get_or_insert_with(Default::default)
        .template
        .metadata
        .get_or_insert_with(Default::default);
    template_metadata
        .annotations
        .get_or_insert_with(Default::default)
        .insert(
            RESTARTED_AT_ANNOTATION_KEY.to_owned(),
            restarted_at.as_str().to_owned(),
        );

    if mode == TriggerMode::Label {
        if let Some(labels) = planned.metadata.labels.as_mut() {
            labels.remove(RESTART_LABEL_KEY);
        }
    }

    planned
}

/// Re-checks `cause` against `latest` and plans the restart only if it still applies.
///
/// This is the function the applier re-runs on every attempt, so it must only depend on its
/// arguments.
pub fn desired_restart(
    latest: &Deployment,
    cause: &RestartCause,
    restarted_at: &RestartTimestamp,
) -> Option<Deployment> {
    cause
        .applies_to(latest)
        .then(|| plan_restart(latest, cause.mode(), restarted_at))
}
