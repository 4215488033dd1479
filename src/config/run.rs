use super::{ConfigError, DurationArg, Overlay};
use crate::logging::{Logger, LoggerArgs};
use crate::proxy::{BackendClientOptions, BackendScheme, BackendTarget};
use crate::server::ListenAddress;
use crate::supervisor::ShellCommand;
use clap::Args;
use serde::Deserialize;
use std::time::Duration;

pub const DEFAULT_BACKEND_HOST: &str = "localhost";
pub const DEFAULT_BACKEND_TIMEOUT: DurationArg = DurationArg::from_secs(30);
pub const DEFAULT_ROUTE: &str = "/health";
pub const DEFAULT_DRAIN_DELAY: DurationArg = DurationArg::from_secs(30);
pub const DEFAULT_LISTENER_SHUTDOWN_TIMEOUT: DurationArg = DurationArg::from_secs(3);

/// Validated, immutable configuration consumed by the orchestrator.
#[derive(Debug, Clone)]
pub struct ShutdownConfig {
    pub command: ShellCommand,
    pub backend: BackendTarget,
    pub backend_client: BackendClientOptions,
    pub listen: ListenAddress,
    /// Path the proxy answers on.
    pub route: String,
    /// Time between announcing the drain and terminating the command.
    pub drain_delay: Duration,
    /// Time in-flight probes get to finish once the command is gone.
    pub listener_shutdown_timeout: Duration,
    pub logger: Logger,
}

impl ShutdownConfig {
    pub fn new(command: ShellCommand, backend: BackendTarget) -> Self {
        Self {
            command,
            backend,
            backend_client: BackendClientOptions {
                timeout: DEFAULT_BACKEND_TIMEOUT.into(),
                tls_insecure_skip_verify: false,
            },
            listen: ListenAddress::default(),
            route: DEFAULT_ROUTE.to_string(),
            drain_delay: DEFAULT_DRAIN_DELAY.into(),
            listener_shutdown_timeout: DEFAULT_LISTENER_SHUTDOWN_TIMEOUT.into(),
            logger: Logger::default(),
        }
    }

    pub fn with_listen(mut self, listen: ListenAddress) -> Self {
        self.listen = listen;
        self
    }

    pub fn with_drain_delay(mut self, delay: Duration) -> Self {
        self.drain_delay = delay;
        self
    }

    pub fn with_listener_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.listener_shutdown_timeout = timeout;
        self
    }
}

#[derive(Args, Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct BackendArgs {
    /// Path of the workload's own health endpoint
    #[arg(id = "backend.path", long = "backend.path", env = "DELTH_BACKEND_HEALTHCHECK_PATH")]
    pub path: Option<String>,

    /// Port of the workload's own health endpoint
    #[arg(id = "backend.port", long = "backend.port", env = "DELTH_BACKEND_HEALTHCHECK_PORT")]
    pub port: Option<u16>,

    /// Scheme used to reach the backend [default: http]
    #[arg(
        id = "backend.scheme",
        long = "backend.scheme",
        env = "DELTH_BACKEND_HEALTHCHECK_SCHEME",
        value_enum
    )]
    pub scheme: Option<BackendScheme>,

    /// Host used to reach the backend [default: localhost]
    #[arg(id = "backend.host", long = "backend.host", env = "DELTH_BACKEND_HEALTHCHECK_HOST")]
    pub host: Option<String>,

    /// Skip TLS certificate verification when the backend uses https
    #[arg(
        id = "backend.tls-insecure-skip-verify",
        long = "backend.tls-insecure-skip-verify",
        env = "DELTH_BACKEND_HEALTHCHECK_TLS_INSECURE_SKIP_VERIFY",
        num_args = 0..=1,
        default_missing_value = "true",
        require_equals = true,
    )]
    pub tls_insecure_skip_verify: Option<bool>,

    /// Timeout of a single backend health check [default: 30s]
    ///
    /// Unitless numbers are interpreted as seconds.
    #[arg(id = "backend.timeout", long = "backend.timeout", env = "DELTH_BACKEND_HEALTHCHECK_TIMEOUT")]
    pub timeout: Option<DurationArg>,
}

impl Overlay for BackendArgs {
    fn overlay(self, over: Self) -> Self {
        Self {
            path: self.path.overlay(over.path),
            port: self.port.overlay(over.port),
            scheme: self.scheme.overlay(over.scheme),
            host: self.host.overlay(over.host),
            tls_insecure_skip_verify: self
                .tls_insecure_skip_verify
                .overlay(over.tls_insecure_skip_verify),
            timeout: self.timeout.overlay(over.timeout),
        }
    }
}

#[derive(Args, Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ProxyArgs {
    /// Address the health-check proxy listens on [default: :8069]
    #[arg(
        id = "proxy.listen-addr",
        long = "proxy.listen-addr",
        env = "DELTH_HEALTHCHECK_PROXY_LISTEN_ADDR"
    )]
    pub listen_addr: Option<ListenAddress>,

    /// Path the health-check proxy answers on [default: /health]
    #[arg(id = "proxy.path", long = "proxy.path", env = "DELTH_HEALTHCHECK_PROXY_PATH")]
    pub path: Option<String>,

    /// Time in-flight health checks get to complete once the command has exited [default: 3s]
    ///
    /// Unitless numbers are interpreted as seconds.
    #[arg(
        id = "proxy.shutdown-timeout",
        long = "proxy.shutdown-timeout",
        env = "DELTH_HEALTHCHECK_PROXY_SHUTDOWN_TIMEOUT"
    )]
    pub shutdown_timeout: Option<DurationArg>,
}

impl Overlay for ProxyArgs {
    fn overlay(self, over: Self) -> Self {
        Self {
            listen_addr: self.listen_addr.overlay(over.listen_addr),
            path: self.path.overlay(over.path),
            shutdown_timeout: self.shutdown_timeout.overlay(over.shutdown_timeout),
        }
    }
}

#[derive(Args, Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ExecArgs {
    /// Delay between failing health checks and terminating the command [default: 30s]
    ///
    /// Gives load balancers time to take the instance out of rotation.
    /// Unitless numbers are interpreted as seconds.
    #[arg(long, env = "DELTH_CMD_EXEC_SHUTDOWN_DELAY")]
    pub shutdown_delay: Option<DurationArg>,
}

impl Overlay for ExecArgs {
    fn overlay(self, over: Self) -> Self {
        Self {
            shutdown_delay: self.shutdown_delay.overlay(over.shutdown_delay),
        }
    }
}

#[derive(Args, Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RunArgs {
    #[command(flatten, next_help_heading = "Backend Health Check")]
    #[serde(default, rename = "backend-healthcheck")]
    pub backend: BackendArgs,

    #[command(flatten, next_help_heading = "Health-Check Proxy")]
    #[serde(default, rename = "healthcheck-proxy")]
    pub proxy: ProxyArgs,

    #[command(flatten)]
    #[serde(default, rename = "cmd-exec")]
    pub exec: ExecArgs,

    /// Logging configuration
    #[command(flatten)]
    #[serde(flatten)]
    pub logger: LoggerArgs,

    /// Command to supervise
    ///
    /// Must be the last argument(s), following a `--` separator.
    ///
    /// Example: `delth --backend.path /healthz --backend.port 8080 -- my-server --flag`
    #[arg(trailing_var_arg = true, value_name = "COMMAND")]
    #[serde(default)]
    pub command: Vec<String>,
}

impl Overlay for RunArgs {
    fn overlay(self, over: Self) -> Self {
        Self {
            backend: self.backend.overlay(over.backend),
            proxy: self.proxy.overlay(over.proxy),
            exec: self.exec.overlay(over.exec),
            logger: self.logger.overlay(over.logger),
            command: self.command.overlay(over.command),
        }
    }
}

fn absolute_path(value: Option<String>, what: &str, flag: &str) -> Result<String, ConfigError> {
    let path = value
        .filter(|p| !p.is_empty())
        .ok_or_else(|| ConfigError::Validation(format!("{what} is required ({flag})")))?;
    if !path.starts_with('/') {
        return Err(ConfigError::Validation(format!(
            "{what} must start with '/', got `{path}`"
        )));
    }
    Ok(path)
}

impl TryFrom<RunArgs> for ShutdownConfig {
    type Error = ConfigError;

    fn try_from(args: RunArgs) -> Result<Self, Self::Error> {
        let RunArgs {
            backend,
            proxy,
            exec,
            logger,
            command,
        } = args;

        let path = absolute_path(backend.path, "backend health check path", "--backend.path")?;
        let port = backend.port.filter(|p| *p != 0).ok_or_else(|| {
            ConfigError::Validation("backend health check port is required (--backend.port)".into())
        })?;
        let route = absolute_path(
            Some(proxy.path.unwrap_or_else(|| DEFAULT_ROUTE.to_string())),
            "proxy path",
            "--proxy.path",
        )?;
        let command = ShellCommand::try_from(command)?;

        Ok(ShutdownConfig {
            command,
            backend: BackendTarget {
                scheme: backend.scheme.unwrap_or_default(),
                host: backend
                    .host
                    .unwrap_or_else(|| DEFAULT_BACKEND_HOST.to_string()),
                port,
                path,
            },
            backend_client: BackendClientOptions {
                timeout: backend.timeout.unwrap_or(DEFAULT_BACKEND_TIMEOUT).into(),
                tls_insecure_skip_verify: backend.tls_insecure_skip_verify.unwrap_or(false),
            },
            listen: proxy.listen_addr.unwrap_or_default(),
            route,
            drain_delay: exec.shutdown_delay.unwrap_or(DEFAULT_DRAIN_DELAY).into(),
            listener_shutdown_timeout: proxy
                .shutdown_timeout
                .unwrap_or(DEFAULT_LISTENER_SHUTDOWN_TIMEOUT)
                .into(),
            logger: logger.into(),
        })
    }
}
