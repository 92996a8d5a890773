//! Command line arguments of the controller binary. Every flag can also be set through the
//! environment variable of the same name in upper snake case.

use std::net::SocketAddr;

use app_restart_telemetry::TelemetryOptions;
use clap::{Args, Parser};

use crate::{
    apply::ConflictRetryPolicy,
    classify::TriggerMode,
    constants::{CONTROLLER_NAME, DEFAULT_METRICS_BIND_ADDRESS},
    namespace::WatchNamespace,
};

#[derive(Debug, PartialEq, Eq, Parser)]
#[command(
    name = "app-restart-controller",
    author,
    version,
    about = "Restarts Deployments when a ConfigMap they consume changes"
)]
pub struct Opts {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, PartialEq, Eq, Parser)]
pub enum Command {
    /// Run the controller.
    Run(RunArguments),
}

#[derive(Debug, PartialEq, Eq, Args)]
#[command(long_about = "")]
pub struct RunArguments {
    /// What kind of object triggers a restart: a changed ConfigMap, or a Deployment labelled
    /// `restart=true`.
    #[arg(long, env, value_enum, default_value_t)]
    pub trigger_mode: TriggerMode,

    /// Namespace to watch. Watches all namespaces if empty.
    #[arg(long, env, default_value = "")]
    pub watch_namespace: WatchNamespace,

    /// Address the `/metrics` and `/healthz` endpoints are served on.
    #[arg(long, env, default_value = DEFAULT_METRICS_BIND_ADDRESS)]
    pub metrics_bind_address: SocketAddr,

    /// Field manager recorded for every update made by the controller.
    #[arg(long, env, default_value = CONTROLLER_NAME)]
    pub field_manager: String,

    /// Attempts per Deployment update before a version conflict fails the reconciliation.
    #[arg(long, env, default_value_t = 4, value_parser = clap::value_parser!(u32).range(1..))]
    pub conflict_retry_max_attempts: u32,

    /// Upper bound on the time spent retrying a single conflicting update.
    #[arg(long, env, default_value = "10s")]
    pub conflict_retry_max_elapsed: humantime::Duration,

    /// Delay before a failed reconciliation is retried.
    #[arg(long, env, default_value = "10s")]
    pub error_requeue_delay: humantime::Duration,

    #[command(flatten)]
    pub telemetry: TelemetryOptions,
}

impl RunArguments {
    pub fn conflict_retry_policy(&self) -> ConflictRetryPolicy {
        ConflictRetryPolicy {
            max_attempts: self.conflict_retry_max_attempts,
            max_elapsed_time: Some(*self.conflict_retry_max_elapsed),
            ..ConflictRetryPolicy::default()
        }
    }
}
