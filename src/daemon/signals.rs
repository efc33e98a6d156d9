// Unix signal handling for graceful loop shutdown

use crate::error::{GlueError, Result};
use tokio::signal::unix::{signal, Signal, SignalKind};
use tokio::sync::watch;

/// Signals the daemon reacts to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceivedSignal {
    Terminate,
    Interrupt,
    Hangup,
}

/// Listens for SIGTERM, SIGINT and SIGHUP
pub struct SignalHandler {
    sigterm: Signal,
    sigint: Signal,
    sighup: Signal,
}

impl SignalHandler {
    pub fn new() -> Result<Self> {
        Ok(Self {
            sigterm: install(SignalKind::terminate(), "SIGTERM")?,
            sigint: install(SignalKind::interrupt(), "SIGINT")?,
            sighup: install(SignalKind::hangup(), "SIGHUP")?,
        })
    }

    /// Wait for any of the handled signals
    pub async fn wait(&mut self) -> ReceivedSignal {
        tokio::select! {
            _ = self.sigterm.recv() => ReceivedSignal::Terminate,
            _ = self.sigint.recv() => ReceivedSignal::Interrupt,
            _ = self.sighup.recv() => ReceivedSignal::Hangup,
        }
    }

    /// Flip `shutdown` to true on the first signal received
    pub fn forward_to(mut self, shutdown: watch::Sender<bool>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let received = self.wait().await;
            tracing::info!("Received {:?}, finishing current event and shutting down", received);
            let _ = shutdown.send(true);
        })
    }
}

fn install(kind: SignalKind, name: &str) -> Result<Signal> {
    signal(kind).map_err(|e| GlueError::Io {
        source: e,
        context: format!("Failed to setup {} handler", name),
    })
}
