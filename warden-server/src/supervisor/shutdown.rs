//! Shutdown signalling

use std::sync::Arc;

use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use warden_utils::Result;

/// Process-wide shutdown trigger.
///
/// Backed by a watch channel, so a trigger that happens before anyone waits
/// is still observed.
#[derive(Clone)]
pub struct Shutdown {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Request shutdown
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }

    /// Wait until shutdown is requested
    pub async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        // Only fails when the sender is gone, and we hold it
        let _ = rx.wait_for(|triggered| *triggered).await;
    }
}

/// Termination signals the process reacts to
pub struct TerminationSignals {
    interrupt: tokio::signal::unix::Signal,
    terminate: tokio::signal::unix::Signal,
}

impl TerminationSignals {
    /// Install SIGINT and SIGTERM handlers
    pub fn install() -> Result<Self> {
        Ok(Self {
            interrupt: signal(SignalKind::interrupt())?,
            terminate: signal(SignalKind::terminate())?,
        })
    }

    /// Wait for the next SIGINT or SIGTERM
    pub async fn recv(&mut self) -> &'static str {
        let name = tokio::select! {
            _ = self.interrupt.recv() => "SIGINT",
            _ = self.terminate.recv() => "SIGTERM",
        };
        info!(signal = name, "Received termination signal");
        name
    }
}

/// Install a SIGHUP handler
pub fn hangup_signal() -> Result<tokio::signal::unix::Signal> {
    Ok(signal(SignalKind::hangup())?)
}

/// Turn SIGINT and SIGTERM into an orderly shutdown request.
///
/// The handlers stay installed after the first signal, so repeated signals
/// never kill the process mid-dispose.
pub fn route_signals_to(shutdown: Shutdown) -> Result<JoinHandle<()>> {
    let mut signals = TerminationSignals::install()?;
    Ok(tokio::spawn(async move {
        loop {
            let name = signals.recv().await;
            if shutdown.is_triggered() {
                warn!(signal = name, "Already shutting down");
            } else {
                shutdown.trigger();
            }
        }
    }))
}
