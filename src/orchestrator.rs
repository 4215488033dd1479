//! Shutdown sequencing.
//!
//! ```text
//! STARTING -> RUNNING -> DRAINING -> TERMINATING_CHILD -> STOPPING_LISTENER -> STOPPED
//! ```
//!
//! The run leaves `RUNNING` on the first termination signal or when the
//! command fails on its own. Either way the proxy starts failing health checks
//! immediately, the command keeps serving for the configured delay so load
//! balancers can deregister the instance, and only then is it asked to stop.
//! Once draining has started there is no way back.

use crate::config::ShutdownConfig;
use crate::drain::DrainSwitch;
use crate::error::DelthError;
use crate::proxy::DrainableProxy;
use crate::server::{HealthServer, ListenerShutdownError};
use crate::signal::ShutdownSignals;
use crate::supervisor::Supervisor;
use std::future::Future;
use std::net::SocketAddr;
use tokio::sync::{oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Starting,
    Running,
    Draining,
    TerminatingChild,
    StoppingListener,
    Stopped,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Phase::Starting => "starting",
            Phase::Running => "running",
            Phase::Draining => "draining",
            Phase::TerminatingChild => "terminating child",
            Phase::StoppingListener => "stopping listener",
            Phase::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

pub struct Orchestrator {
    config: ShutdownConfig,
    server: HealthServer,
    proxy: DrainableProxy,
    drain: DrainSwitch,
    phase: watch::Sender<Phase>,
}

impl Orchestrator {
    /// Prepares the proxy and binds its listener. Nothing is served and no
    /// command is started until [`Orchestrator::run`].
    pub async fn bind(config: ShutdownConfig) -> Result<Self, DelthError> {
        let drain = DrainSwitch::new();
        let proxy = DrainableProxy::build(config.backend.clone(), drain.clone(), &config.backend_client)
            .map_err(DelthError::Client)?;
        let server = HealthServer::bind(&config.listen, config.route.clone())
            .await
            .map_err(|source| DelthError::Bind {
                addr: config.listen.to_string(),
                source,
            })?;
        let (phase, _) = watch::channel(Phase::Starting);

        Ok(Self {
            config,
            server,
            proxy,
            drain,
            phase,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.server.local_addr()
    }

    pub fn drain_switch(&self) -> DrainSwitch {
        self.drain.clone()
    }

    /// Observes phase transitions.
    pub fn phases(&self) -> watch::Receiver<Phase> {
        self.phase.subscribe()
    }

    /// Runs until `SIGTERM`/`SIGINT` or an unexpected command failure.
    pub async fn run(self) -> Result<(), DelthError> {
        let signals = ShutdownSignals::install().map_err(DelthError::Signals)?;
        self.run_until(signals.first()).await
    }

    /// Runs until `trigger` resolves or the command fails unexpectedly.
    pub async fn run_until<F>(self, trigger: F) -> Result<(), DelthError>
    where
        F: Future<Output = ()>,
    {
        let Self {
            config,
            server,
            proxy,
            drain,
            phase,
        } = self;

        let enter = |next: Phase| {
            info!(phase = %next, "orchestrator phase");
            phase.send_replace(next);
        };

        let run = CancellationToken::new();
        let (failed_tx, mut failed_rx) = oneshot::channel();

        let listener = server.spawn(proxy);

        let mut supervisor = Supervisor::new(config.command.clone(), run.clone()).on_failure({
            let run = run.clone();
            move |exit| {
                let _ = failed_tx.send(exit);
                run.cancel();
            }
        });

        if let Err(e) = supervisor.start() {
            run.cancel();
            if let Err(e) = listener.shutdown(config.listener_shutdown_timeout).await {
                warn!(error = %e, "health-check proxy did not shut down cleanly");
            }
            enter(Phase::Stopped);
            return Err(e.into());
        }
        enter(Phase::Running);

        tokio::select! {
            _ = trigger => {
                info!("shutdown requested");
                run.cancel();
            }
            _ = run.cancelled() => {
                info!("command failed, shutting down");
            }
        }

        enter(Phase::Draining);
        drain.drain();
        info!(delay = ?config.drain_delay, "failing health checks before terminating command");
        tokio::time::sleep(config.drain_delay).await;

        enter(Phase::TerminatingChild);
        match supervisor.stop().await {
            Ok(status) => info!(%status, "command stopped"),
            Err(e) => error!(error = %e, "failed to stop command"),
        }

        enter(Phase::StoppingListener);
        match listener.shutdown(config.listener_shutdown_timeout).await {
            Ok(()) => debug!("health-check proxy stopped"),
            Err(e @ ListenerShutdownError::Timeout(_)) => {
                warn!(error = %e, "gave up waiting for in-flight health checks")
            }
            Err(e) => error!(error = %e, "health-check proxy did not shut down cleanly"),
        }

        enter(Phase::Stopped);

        match failed_rx.try_recv() {
            Ok(exit) => Err(DelthError::CommandFailed(exit)),
            Err(_) => Ok(()),
        }
    }
}
