//! A small HTTP server exposing `/metrics` for scraping and `/healthz` for probes.

use std::net::SocketAddr;

use axum::{
    Router,
    extract::State,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use snafu::{ResultExt, Snafu};
use tokio::net::TcpListener;

use crate::metrics::Metrics;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to create TCP listener by binding to socket address {socket_addr:?}"))]
    BindTcpListener {
        source: std::io::Error,
        socket_addr: SocketAddr,
    },

    #[snafu(display("failed to run the metrics server"))]
    RunServer { source: std::io::Error },
}

pub fn router(metrics: Metrics) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/healthz", get(|| async { "ok" }))
        .with_state(metrics)
}

/// The metrics endpoint, bound but not yet serving.
pub struct MetricsServer {
    listener: TcpListener,
    metrics: Metrics,
}

impl MetricsServer {
    /// Binds `socket_addr` right away so that an unusable address fails start-up.
    pub async fn bind(socket_addr: SocketAddr, metrics: Metrics) -> Result<Self, Error> {
        let listener = TcpListener::bind(socket_addr)
            .await
            .context(BindTcpListenerSnafu { socket_addr })?;

        Ok(Self { listener, metrics })
    }

    /// Serves [`router`] until `shutdown` completes.
    pub async fn run<F>(self, shutdown: F) -> Result<(), Error>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if let Ok(socket_addr) = self.listener.local_addr() {
            tracing::info!(%socket_addr, "serving metrics");
        }

        axum::serve(self.listener, router(self.metrics))
            .with_graceful_shutdown(shutdown)
            .await
            .context(RunServerSnafu)
    }
}

async fn metrics_handler(State(metrics): State<Metrics>) -> Response {
    match metrics.encode() {
        Ok(body) => ([(header::CONTENT_TYPE, prometheus::TEXT_FORMAT)], body).into_response(),
        Err(error) => {
            tracing::warn!(
                error = &error as &dyn std::error::Error,
                "failed to encode metrics"
            );
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
