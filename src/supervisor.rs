//! Lifecycle management for the single wrapped command.
//!
//! The [`Supervisor`] spawns the command in its own session, observes its exit
//! from a background task and terminates it on request. Signals delivered to
//! delth itself never reach the child directly: the orchestrator decides when
//! (and whether) to forward a `SIGTERM`.
//!
//! This relies on POSIX sessions (`setsid`). Other platforms are not supported.

use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::os::unix::process::ExitStatusExt;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use thiserror::Error;
use tokio::process::Command;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Outcome of waiting on the child, shared with every reader of the exit channel.
pub type ExitOutcome = Result<ExitStatus, Arc<std::io::Error>>;

type FailureHandler = Box<dyn FnOnce(UnexpectedExit) + Send + 'static>;

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("invalid command: {0}")]
    InvalidCommand(String),

    #[error("failed to launch `{program}`: {source}")]
    Launch {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("command has already been started")]
    AlreadyStarted,

    #[error("no process has been started")]
    NoProcess,

    #[error("failed to signal command: {0}")]
    SignalDelivery(#[source] Errno),

    #[error("failed waiting for command: {0}")]
    Wait(#[source] Arc<std::io::Error>),

    #[error("exit observer stopped before recording an outcome")]
    WaiterLost,
}

/// A command exited unsuccessfully while nobody asked it to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("command exited with {status}")]
pub struct UnexpectedExit {
    pub status: ExitStatus,
}

impl UnexpectedExit {
    /// Exit code delth should report for this failure.
    ///
    /// Mirrors shell conventions: the child's own code, or `128 + signal`.
    pub fn exit_code(&self) -> u8 {
        if let Some(code) = self.status.code() {
            code as u8
        } else if let Some(signal) = self.status.signal() {
            (128 + signal) as u8
        } else {
            1
        }
    }
}

/// Program and arguments of the wrapped command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellCommand {
    program: String,
    args: Vec<String>,
}

impl ShellCommand {
    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }
}

impl TryFrom<Vec<String>> for ShellCommand {
    type Error = SupervisorError;

    fn try_from(mut argv: Vec<String>) -> Result<Self, Self::Error> {
        if argv.is_empty() {
            return Err(SupervisorError::InvalidCommand(
                "no command to supervise was given".to_string(),
            ));
        }
        let program = argv.remove(0);
        if program.trim().is_empty() {
            return Err(SupervisorError::InvalidCommand(
                "command program is empty".to_string(),
            ));
        }
        Ok(Self {
            program,
            args: argv,
        })
    }
}

impl std::fmt::Display for ShellCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Owns exactly one child process.
///
/// The exit outcome is published once on a single-slot `watch` channel, so
/// [`Supervisor::wait`] and [`Supervisor::stop`] can be called any number of
/// times and always observe the same recorded outcome.
pub struct Supervisor {
    command: ShellCommand,
    /// Cancelled once the enclosing run is shutting down. Exits observed after
    /// that point are expected and never reported as failures.
    run: CancellationToken,
    on_failure: Option<FailureHandler>,
    target: Option<Pid>,
    exit_rx: Option<watch::Receiver<Option<ExitOutcome>>>,
}

impl Supervisor {
    pub fn new(command: ShellCommand, run: CancellationToken) -> Self {
        Self {
            command,
            run,
            on_failure: None,
            target: None,
            exit_rx: None,
        }
    }

    /// Registers the handler invoked when the child fails unexpectedly.
    ///
    /// It runs on the exit observer, before the outcome is published.
    pub fn on_failure<F>(mut self, handler: F) -> Self
    where
        F: FnOnce(UnexpectedExit) + Send + 'static,
    {
        self.on_failure = Some(Box::new(handler));
        self
    }

    pub fn command(&self) -> &ShellCommand {
        &self.command
    }

    /// OS pid of the child, once started.
    pub fn id(&self) -> Option<u32> {
        self.target.map(|pid| pid.as_raw() as u32)
    }

    /// Recorded outcome, if the child has already exited.
    pub fn outcome(&self) -> Option<ExitOutcome> {
        self.exit_rx.as_ref().and_then(|rx| rx.borrow().clone())
    }

    pub fn start(&mut self) -> Result<(), SupervisorError> {
        if self.exit_rx.is_some() {
            return Err(SupervisorError::AlreadyStarted);
        }

        let mut command = Command::new(self.command.program());
        command
            .args(self.command.args())
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            // Killing is handled explicitly in stop() and Drop
            .kill_on_drop(false);

        // SAFETY: setsid is async-signal-safe and touches no state shared with the parent.
        unsafe {
            command.pre_exec(|| {
                nix::unistd::setsid()
                    .map(|_| ())
                    .map_err(std::io::Error::from)
            });
        }

        let mut child = command.spawn().map_err(|source| SupervisorError::Launch {
            program: self.command.program().to_string(),
            source,
        })?;

        let pid = child.id().map(|id| Pid::from_raw(id as i32));
        info!(cmd = %self.command, pid = ?pid, "command started");
        self.target = pid;

        let (tx, rx) = watch::channel(None);
        self.exit_rx = Some(rx);

        let run = self.run.clone();
        let on_failure = self.on_failure.take();

        tokio::spawn(async move {
            let outcome: ExitOutcome = child.wait().await.map_err(Arc::new);
            let cancelled = run.is_cancelled();
            debug!(?outcome, ignore_failures = cancelled, "command exited");

            match &outcome {
                Ok(status) if !status.success() && !cancelled => {
                    error!(%status, "command failed");
                    if let Some(handler) = on_failure {
                        handler(UnexpectedExit { status: *status });
                    }
                }
                Ok(_) => {}
                Err(e) => error!(error = %e, "failed to wait on command"),
            }

            tx.send_replace(Some(outcome));
        });

        Ok(())
    }

    /// Waits for the exit outcome without signalling the child.
    pub async fn wait(&mut self) -> Result<ExitStatus, SupervisorError> {
        let rx = self.exit_rx.as_mut().ok_or(SupervisorError::NoProcess)?;
        let outcome = rx
            .wait_for(Option::is_some)
            .await
            .map_err(|_| SupervisorError::WaiterLost)?
            .clone();

        match outcome {
            Some(Ok(status)) => Ok(status),
            Some(Err(e)) => Err(SupervisorError::Wait(e)),
            None => Err(SupervisorError::WaiterLost),
        }
    }

    /// Requests graceful termination with `SIGTERM` and blocks until the exit is observed.
    pub async fn stop(&mut self) -> Result<ExitStatus, SupervisorError> {
        let pid = self.target.ok_or(SupervisorError::NoProcess)?;

        if self.outcome().is_some() {
            debug!("command already exited, nothing to signal");
            return self.wait().await;
        }

        debug!(%pid, "signaling command");
        match signal::kill(pid, Signal::SIGTERM) {
            Ok(()) => {}
            // Reaped between the check above and the kill; the outcome is on its way.
            Err(Errno::ESRCH) => debug!(%pid, "command vanished before SIGTERM"),
            Err(e) => return Err(SupervisorError::SignalDelivery(e)),
        }

        debug!("waiting for command to exit");
        let status = self.wait().await?;
        debug!(%status, "command has exited");
        Ok(status)
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        // Last resort: never leave an orphaned workload behind.
        if let Some(pid) = self.target
            && self.outcome().is_none()
        {
            debug!(%pid, "supervisor dropped with live command, sending SIGKILL");
            let _ = signal::kill(pid, Signal::SIGKILL);
        }
    }
}
