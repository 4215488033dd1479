//! Termination signals that start the drain.
//!
//! SIGTERM and SIGINT both trigger the shutdown sequence. Handlers are
//! installed before the command starts so that an early signal is never lost
//! to the default disposition.
use tokio::signal::unix::{Signal, SignalKind, signal};
use tracing::{debug, info};

pub struct ShutdownSignals {
    sigterm: Signal,
    sigint: Signal,
}

impl ShutdownSignals {
    pub fn install() -> std::io::Result<Self> {
        Ok(Self {
            sigterm: signal(SignalKind::terminate())?,
            sigint: signal(SignalKind::interrupt())?,
        })
    }

    /// Blocks until a shutdown signal is received and returns its name.
    pub async fn recv(&mut self) -> &'static str {
        tokio::select! {
            _ = self.sigterm.recv() => "SIGTERM",
            _ = self.sigint.recv() => "SIGINT",
        }
    }

    /// Resolves on the first signal, then keeps swallowing later ones in the background.
    pub async fn first(mut self) {
        let name = self.recv().await;
        info!(signal = name, "received signal");
        tokio::spawn(async move {
            loop {
                let name = self.recv().await;
                debug!(signal = name, "already shutting down, ignoring signal");
            }
        });
    }
}
