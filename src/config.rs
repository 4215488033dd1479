//! Layered configuration.
//!
//! Values are resolved from, in increasing precedence: built-in defaults, an
//! optional TOML file, environment variables and command-line flags. Every
//! layer is a partial [`RunArgs`]; layers are merged with [`Overlay`] and the
//! result is validated into a [`ShutdownConfig`].
use crate::error::DelthError;
use clap::Args;
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub mod run;
pub mod types;

pub use run::{BackendArgs, ExecArgs, ProxyArgs, RunArgs, ShutdownConfig};
pub use types::DurationArg;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse TOML configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("{0}")]
    Validation(String),

    #[error(transparent)]
    Supervisor(#[from] crate::supervisor::SupervisorError),
}

/// Trait for merging two partial structs.
pub trait Overlay {
    /// self is the base layer, over is the top layer.
    fn overlay(self, over: Self) -> Self;
}

// If top layer exists, use it. Otherwise keep base.
impl<T> Overlay for Option<T> {
    fn overlay(self, over: Self) -> Self {
        over.or(self)
    }
}

impl<T> Overlay for Vec<T> {
    fn overlay(self, over: Self) -> Self {
        if over.is_empty() { self } else { over }
    }
}

#[derive(Args, Debug, Clone)]
pub struct LayeredArgs<T: Args> {
    /// Path to configuration file
    #[arg(long, env = "DELTH_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(flatten)]
    pub inner: T,
}

impl<T> LayeredArgs<T>
where
    T: Args,
{
    pub fn load<C>(self) -> Result<C, DelthError>
    where
        T: Layered<C>,
    {
        self.inner.resolve(self.config.as_deref())
    }
}

pub trait Layered<C>: Overlay + DeserializeOwned + Default + Sized {
    fn resolve(self, config_path: Option<&Path>) -> Result<C, DelthError>;
}

impl<T, C> Layered<C> for T
where
    T: Overlay + DeserializeOwned + Default,
    T: TryInto<C>,
    <T as TryInto<C>>::Error: Into<DelthError>,
{
    fn resolve(self, config_path: Option<&Path>) -> Result<C, DelthError> {
        let base = match config_path {
            Some(path) => {
                let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                })?;
                toml::from_str::<Self>(&content).map_err(ConfigError::Parse)?
            }
            None => Self::default(),
        };

        let merged = base.overlay(self);

        merged.try_into().map_err(Into::into)
    }
}
