mod exits;

use clap::Parser;
use delth::cli::Cli;
use delth::config::ShutdownConfig;
use delth::error::DelthError;
use delth::logging::Logger;
use delth::orchestrator::Orchestrator;
use exits::DelthExitCode;
use std::process::{ExitCode, Termination};
use tracing::{debug, info};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let config: ShutdownConfig = match cli.run.load() {
        Ok(config) => config,
        Err(e) => {
            let _ = Logger::default().init();
            return DelthExitCode(e).report();
        }
    };

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => DelthExitCode(e).report(),
    }
}

async fn run(config: ShutdownConfig) -> Result<(), DelthError> {
    config.logger.init()?;
    info!("Starting delth v{}", env!("CARGO_PKG_VERSION"));
    debug!("effective config: {:#?}", config);

    Orchestrator::bind(config).await?.run().await
}
