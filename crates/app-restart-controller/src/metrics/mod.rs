//! Restart accounting and its Prometheus exposition.

use prometheus::{Encoder, IntCounter, Opts, Registry, TextEncoder};
use snafu::{ResultExt, Snafu};

use crate::key::ObjectKey;

pub mod server;

const RESTARTS_TOTAL_NAME: &str = "apprestart_restarts_total";
const RESTARTS_TOTAL_HELP: &str = "Number of Deployments restarted by the controller";

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to create the restart counter"))]
    CreateCounter { source: prometheus::Error },

    #[snafu(display("failed to register the restart counter"))]
    RegisterCounter { source: prometheus::Error },

    #[snafu(display("failed to encode metrics in the text exposition format"))]
    Encode { source: prometheus::Error },

    #[snafu(display("encoded metrics are not valid UTF-8"))]
    EncodingNotUtf8 { source: std::string::FromUtf8Error },
}

/// Receives one notification per Deployment that was actually restarted.
pub trait RestartSink: Send + Sync {
    fn record_restart(&self, deployment: &ObjectKey);
}

/// Prometheus-backed [`RestartSink`].
///
/// Owns its own [`Registry`] rather than the process-global default one. Clones share the
/// same counter.
#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    restarts: IntCounter,
}

impl Metrics {
    pub fn new() -> Result<Self, Error> {
        let registry = Registry::new();
        let restarts = IntCounter::with_opts(Opts::new(RESTARTS_TOTAL_NAME, RESTARTS_TOTAL_HELP))
            .context(CreateCounterSnafu)?;
        registry
            .register(Box::new(restarts.clone()))
            .context(RegisterCounterSnafu)?;

        Ok(Self { registry, restarts })
    }

    /// The number of restarts recorded since start-up.
    pub fn restarts(&self) -> u64 {
        self.restarts.get()
    }

    /// Renders all metrics in the Prometheus text exposition format.
    pub fn encode(&self) -> Result<String, Error> {
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&self.registry.gather(), &mut buffer)
            .context(EncodeSnafu)?;
        String::from_utf8(buffer).context(EncodingNotUtf8Snafu)
    }
}

impl RestartSink for Metrics {
    fn record_restart(&self, deployment: &ObjectKey) {
        self.restarts.inc();
        tracing::trace!(%deployment, total = self.restarts.get(), "recorded restart");
    }
}
