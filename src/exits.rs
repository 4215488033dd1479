use delth::config::ConfigError;
use delth::error::DelthError;
use delth::supervisor::SupervisorError;
use std::process::{ExitCode, Termination};

#[derive(Debug)]
pub struct DelthExitCode(pub DelthError);

impl Termination for DelthExitCode {
    fn report(self) -> ExitCode {
        let code = self.exit_code();
        tracing::error!(exit_code = code, "{}", self.0);
        ExitCode::from(code)
    }
}

impl DelthExitCode {
    fn exit_code(&self) -> u8 {
        match &self.0 {
            DelthError::CommandFailed(exit) => exit.exit_code(),
            DelthError::Supervisor(e) => Self::supervisor_exit_code(e),
            DelthError::Config(e) => match e {
                ConfigError::Io { .. } => sysexits::ExitCode::NoInput.into(),
                ConfigError::Parse(_) => sysexits::ExitCode::Config.into(),
                ConfigError::Validation(_) => sysexits::ExitCode::Config.into(),
                ConfigError::Supervisor(e) => Self::supervisor_exit_code(e),
            },
            DelthError::Client(_) => sysexits::ExitCode::Config.into(),
            DelthError::Bind { .. } => sysexits::ExitCode::OsErr.into(),
            DelthError::Signals(_) => sysexits::ExitCode::OsErr.into(),
            DelthError::Logging(_) => sysexits::ExitCode::Config.into(),
        }
    }

    fn supervisor_exit_code(e: &SupervisorError) -> u8 {
        match e {
            SupervisorError::InvalidCommand(_) => sysexits::ExitCode::Config.into(),
            SupervisorError::Launch { source, .. } => match source.kind() {
                std::io::ErrorKind::NotFound => 127,
                std::io::ErrorKind::PermissionDenied => 126,
                _ => sysexits::ExitCode::IoErr.into(),
            },
            SupervisorError::SignalDelivery(_) => sysexits::ExitCode::OsErr.into(),
            SupervisorError::Wait(_) => sysexits::ExitCode::OsErr.into(),
            SupervisorError::AlreadyStarted
            | SupervisorError::NoProcess
            | SupervisorError::WaiterLost => sysexits::ExitCode::Software.into(),
        }
    }
}
