use assert_fs::TempDir;
use assert_fs::prelude::*;
use clap::Parser;
use delth::cli::Cli;
use delth::config::{ConfigError, ShutdownConfig};
use delth::error::DelthError;
use delth::logging::LogLevel;
use delth::proxy::BackendScheme;
use std::time::Duration;

fn load(argv: &[&str]) -> Result<ShutdownConfig, DelthError> {
    let cli = Cli::try_parse_from(std::iter::once("delth").chain(argv.iter().copied()))
        .expect("arguments should parse");
    cli.run.load()
}

#[test]
fn flags_only() {
    let cfg = load(&[
        "--backend.path",
        "/healthz",
        "--backend.port",
        "8080",
        "--shutdown-delay",
        "5",
        "--",
        "my-server",
        "--listen",
        ":8080",
    ])
    .unwrap();

    assert_eq!(cfg.backend.to_string(), "http://localhost:8080/healthz");
    assert_eq!(cfg.drain_delay, Duration::from_secs(5));
    assert_eq!(cfg.command.program(), "my-server");
    assert_eq!(
        cfg.command.args(),
        ["--listen".to_string(), ":8080".to_string()]
    );
}

#[test]
fn boolean_switches_take_no_value() {
    let cfg = load(&[
        "--backend.path",
        "/healthz",
        "--backend.port",
        "8443",
        "--backend.scheme",
        "https",
        "--backend.tls-insecure-skip-verify",
        "-d",
        "--",
        "sleep",
        "30",
    ])
    .unwrap();

    assert_eq!(cfg.backend.scheme, BackendScheme::Https);
    assert!(cfg.backend_client.tls_insecure_skip_verify);
    assert_eq!(cfg.logger.level, LogLevel::Debug);
}

#[test]
fn file_layer_with_flag_overrides() {
    let tmp = TempDir::new().unwrap();
    let file = tmp.child("delth.toml");
    file.write_str(
        r#"
            command = ["from-file", "--serve"]

            [backend-healthcheck]
            path = "/ready"
            port = 8080
            timeout = "2s"

            [healthcheck-proxy]
            listen-addr = "127.0.0.1:9000"
            path = "/lb/health"

            [cmd-exec]
            shutdown-delay = "45s"
        "#,
    )
    .unwrap();
    let path = file.path().to_str().unwrap();

    let cfg = load(&["--config", path, "--backend.port", "9090"]).unwrap();
    assert_eq!(cfg.backend.to_string(), "http://localhost:9090/ready");
    assert_eq!(cfg.backend_client.timeout, Duration::from_secs(2));
    assert_eq!(cfg.listen.as_str(), "127.0.0.1:9000");
    assert_eq!(cfg.route, "/lb/health");
    assert_eq!(cfg.drain_delay, Duration::from_secs(45));
    assert_eq!(cfg.command.program(), "from-file");

    // A command on the command line replaces the one from the file.
    let cfg = load(&["--config", path, "--", "from-cli"]).unwrap();
    assert_eq!(cfg.command.program(), "from-cli");
    assert!(cfg.command.args().is_empty());
}

#[test]
fn missing_required_backend_settings() {
    let err = load(&["--backend.path", "/healthz", "--", "sleep", "30"]).unwrap_err();
    assert!(matches!(
        err,
        DelthError::Config(ConfigError::Validation(_))
    ));

    let err = load(&["--backend.port", "8080", "--", "sleep", "30"]).unwrap_err();
    assert!(matches!(
        err,
        DelthError::Config(ConfigError::Validation(_))
    ));
}

#[test]
fn missing_config_file_is_an_error() {
    let tmp = TempDir::new().unwrap();
    let missing = tmp.child("absent.toml");
    let err = load(&[
        "--config",
        missing.path().to_str().unwrap(),
        "--backend.path",
        "/healthz",
        "--backend.port",
        "8080",
        "--",
        "sleep",
        "30",
    ])
    .unwrap_err();
    assert!(matches!(err, DelthError::Config(ConfigError::Io { .. })));
}

#[test]
fn malformed_config_file_is_an_error() {
    let tmp = TempDir::new().unwrap();
    let file = tmp.child("delth.toml");
    file.write_str("[backend-healthcheck]\nport = \"not a number\"\n")
        .unwrap();
    let err = load(&["--config", file.path().to_str().unwrap()]).unwrap_err();
    assert!(matches!(err, DelthError::Config(ConfigError::Parse(_))));
}

#[test]
fn invalid_durations_are_rejected_by_the_parser() {
    let parsed = Cli::try_parse_from([
        "delth",
        "--shutdown-delay",
        "soon",
        "--",
        "sleep",
        "30",
    ]);
    assert!(parsed.is_err());
}
