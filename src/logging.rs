use clap::{Args, ValueEnum};
use serde::Deserialize;
use thiserror::Error;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

use crate::config::Overlay;

#[derive(Debug, Error)]
#[error("failed to initialize logging: {0}")]
pub struct LoggingError(String);

#[derive(Default, Copy, Clone, Debug, PartialEq, Eq, ValueEnum, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Default, Copy, Clone, Debug, PartialEq, Eq, ValueEnum, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// Resolved logging configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Logger {
    pub format: LogFormat,
    pub level: LogLevel,
}

impl Logger {
    pub fn init(&self) -> Result<(), LoggingError> {
        let filter = EnvFilter::try_new(self.level.as_str()).unwrap_or_else(|_| EnvFilter::new("info"));
        let registry = tracing_subscriber::registry().with(filter);
        match self.format {
            LogFormat::Json => registry
                .with(fmt::layer().json().with_current_span(false))
                .try_init(),
            LogFormat::Text => registry.with(fmt::layer().with_target(false)).try_init(),
        }
        .map_err(|e| LoggingError(e.to_string()))
    }
}

#[derive(Args, Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct LoggerArgs {
    /// Log format
    #[arg(long, env = "DELTH_LOG_FORMAT", value_enum)]
    pub log_format: Option<LogFormat>,

    /// Log level
    #[arg(long, env = "DELTH_LOG_LEVEL", value_enum)]
    pub log_level: Option<LogLevel>,

    /// Enable debug mode, shorthand for `--log-level debug`
    #[arg(
        short = 'd',
        long,
        env = "DELTH_DEBUG",
        num_args = 0..=1,
        default_missing_value = "true",
        require_equals = true,
    )]
    pub debug: Option<bool>,
}

impl Overlay for LoggerArgs {
    fn overlay(self, over: Self) -> Self {
        Self {
            log_format: self.log_format.overlay(over.log_format),
            log_level: self.log_level.overlay(over.log_level),
            debug: self.debug.overlay(over.debug),
        }
    }
}

impl From<LoggerArgs> for Logger {
    fn from(args: LoggerArgs) -> Self {
        let level = if args.debug.unwrap_or(false) {
            LogLevel::Debug
        } else {
            args.log_level.unwrap_or_default()
        };
        Logger {
            format: args.log_format.unwrap_or_default(),
            level,
        }
    }
}
