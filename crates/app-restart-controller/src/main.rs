use std::sync::Arc;

use app_restart_controller::{
    cli::{Command, Opts, RunArguments},
    constants::CONTROLLER_NAME,
    controller,
    metrics::{self, Metrics, server::MetricsServer},
    reconcile::Context,
    signal::{SignalError, SignalWatcher},
    store::KubeStore,
};
use app_restart_telemetry::Tracing;
use clap::Parser;
use k8s_openapi::api::{apps::v1::Deployment, core::v1::ConfigMap};
use snafu::{ResultExt, Snafu};

#[derive(Debug, Snafu)]
enum Error {
    #[snafu(display("failed to initialize tracing"))]
    InitTracing {
        source: app_restart_telemetry::tracing::Error,
    },

    #[snafu(display("failed to watch for shutdown signals"))]
    WatchSignals { source: SignalError },

    #[snafu(display("failed to create Kubernetes client"))]
    CreateClient { source: kube::Error },

    #[snafu(display("failed to set up metrics"))]
    CreateMetrics { source: metrics::Error },

    #[snafu(display("failed to serve metrics"))]
    ServeMetrics { source: metrics::server::Error },
}

#[snafu::report]
#[tokio::main]
async fn main() -> Result<(), Error> {
    let opts = Opts::parse();
    match opts.command {
        Command::Run(args) => run(args).await,
    }
}

async fn run(args: RunArguments) -> Result<(), Error> {
    let conflict_retry = args.conflict_retry_policy();
    let RunArguments {
        trigger_mode,
        watch_namespace,
        metrics_bind_address,
        field_manager,
        error_requeue_delay,
        telemetry,
        ..
    } = args;

    // Dropping the guard flushes and shuts down the exporters
    let _tracing_guard = Tracing::pre_configured(CONTROLLER_NAME, telemetry)
        .init()
        .context(InitTracingSnafu)?;

    let signal_watcher = SignalWatcher::terminate_or_interrupt().context(WatchSignalsSnafu)?;
    let client = kube::Client::try_default()
        .await
        .context(CreateClientSnafu)?;

    let metrics = Metrics::new().context(CreateMetricsSnafu)?;
    let metrics_server = MetricsServer::bind(metrics_bind_address, metrics.clone())
        .await
        .context(ServeMetricsSnafu)?;

    let ctx = Arc::new(Context {
        config_maps: Arc::new(KubeStore::<ConfigMap>::new(client.clone(), &field_manager)),
        deployments: Arc::new(KubeStore::<Deployment>::new(client.clone(), &field_manager)),
        restarts: Arc::new(metrics),
        mode: trigger_mode,
        conflict_retry,
        cancellation: signal_watcher.cancellation(),
        error_requeue_delay: *error_requeue_delay,
    });

    let (served, ()) = tokio::join!(
        metrics_server.run(signal_watcher.handle()),
        controller::run(client, &watch_namespace, ctx, signal_watcher.handle()),
    );
    served.context(ServeMetricsSnafu)
}
