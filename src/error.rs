use crate::{
    config::ConfigError,
    logging::LoggingError,
    supervisor::{SupervisorError, UnexpectedExit},
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DelthError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Supervisor(#[from] SupervisorError),

    #[error("command has failed: {0}")]
    CommandFailed(#[from] UnexpectedExit),

    #[error("failed to build backend HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("failed to listen on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to install signal handlers: {0}")]
    Signals(#[source] std::io::Error),

    #[error(transparent)]
    Logging(#[from] LoggingError),
}
