//! Process shutdown signalling and the cancellation handle handed to reconciliations.

use snafu::{ResultExt, Snafu};
use tokio::{
    signal::unix::{SignalKind, signal},
    sync::watch,
};

#[derive(Debug, Snafu)]
#[snafu(display("failed to construct signal watcher"))]
pub struct SignalError {
    source: std::io::Error,
}

/// Watches for `SIGTERM` or `SIGINT` and multiplies it by notifying all acquired handles.
pub struct SignalWatcher {
    watch_rx: watch::Receiver<bool>,
}

impl SignalWatcher {
    /// Watches `SIGTERM` and `SIGINT`, whichever arrives first.
    pub fn terminate_or_interrupt() -> Result<Self, SignalError> {
        let mut sigterm = signal(SignalKind::terminate()).context(SignalSnafu)?;
        let mut sigint = signal(SignalKind::interrupt()).context(SignalSnafu)?;
        let (watch_tx, watch_rx) = watch::channel(false);

        tokio::spawn(async move {
            tokio::select! {
                _ = sigterm.recv() => tracing::info!("received SIGTERM, shutting down"),
                _ = sigint.recv() => tracing::info!("received SIGINT, shutting down"),
            }
            watch_tx.send_replace(true);
        });

        Ok(Self { watch_rx })
    }

    /// Acquire a new handle which will complete once the signal is received.
    ///
    /// This handle can be cheaply cloned to be able to gracefully shutdown multiple concurrent
    /// tasks.
    pub fn handle(&self) -> impl Future<Output = ()> + Send + Sync + 'static {
        wait_until_signalled(self.watch_rx.clone())
    }

    /// Acquire a [`Cancellation`] tied to the same signal.
    pub fn cancellation(&self) -> Cancellation {
        Cancellation {
            watch_rx: self.watch_rx.clone(),
        }
    }
}

/// A cloneable, read-only view of a cancellation signal.
#[derive(Clone, Debug)]
pub struct Cancellation {
    watch_rx: watch::Receiver<bool>,
}

impl Cancellation {
    /// Creates a cancellation together with the trigger that fires it.
    pub fn new() -> (CancellationTrigger, Self) {
        let (watch_tx, watch_rx) = watch::channel(false);
        (CancellationTrigger { watch_tx }, Self { watch_rx })
    }

    /// A cancellation that never fires.
    pub fn never() -> Self {
        Self::new().1
    }

    /// Runs `future` to completion unless cancellation is requested first, returning [`None`]
    /// in that case. An already requested cancellation wins over a ready future.
    pub async fn run<F: Future>(&self, future: F) -> Option<F::Output> {
        tokio::select! {
            biased;
            () = self.cancelled() => None,
            output = future => Some(output),
        }
    }

    /// Completes once cancellation has been requested. Never completes if the trigger was
    /// dropped without firing.
    pub async fn cancelled(&self) {
        wait_until_signalled(self.watch_rx.clone()).await;
    }
}

async fn wait_until_signalled(mut watch_rx: watch::Receiver<bool>) {
    while !*watch_rx.borrow_and_update() {
        if watch_rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Fires a [`Cancellation`].
#[derive(Debug)]
pub struct CancellationTrigger {
    watch_tx: watch::Sender<bool>,
}

impl CancellationTrigger {
    pub fn cancel(&self) {
        self.watch_tx.send_replace(true);
    }
}
