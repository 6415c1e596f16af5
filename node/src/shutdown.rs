//! Stop signal shared by the node's background tasks.
//!
//! The event pump holds a receiver and exits when [`ShutdownController::shutdown`]
//! fires. The daemon additionally waits on OS signals through
//! [`ShutdownController::wait_for_signal`].

use std::fmt;

use tokio::signal;
use tokio::sync::broadcast;

/// What ended [`ShutdownController::wait_for_signal`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopReason {
    Interrupt,
    Terminate,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Interrupt => "SIGINT",
            Self::Terminate => "SIGTERM",
        })
    }
}

pub struct ShutdownController {
    tx: broadcast::Sender<()>,
}

impl ShutdownController {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.tx.subscribe()
    }

    /// Notify every subscriber. Harmless when nobody is listening.
    pub fn shutdown(&self) {
        let _ = self.tx.send(());
    }

    /// Block until SIGINT or SIGTERM, notify subscribers, and report which
    /// signal arrived.
    pub async fn wait_for_signal(&self) -> StopReason {
        let reason = tokio::select! {
            _ = signal::ctrl_c() => StopReason::Interrupt,
            _ = terminate() => StopReason::Terminate,
        };
        tracing::info!(signal = %reason, "shutdown requested");
        self.shutdown();
        reason
    }
}

impl Default for ShutdownController {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(unix)]
async fn terminate() {
    match signal::unix::signal(signal::unix::SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(e) => {
            tracing::warn!(error = %e, "SIGTERM handler unavailable, waiting for SIGINT only");
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn terminate() {
    std::future::pending::<()>().await;
}
