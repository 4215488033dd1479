use crate::config::{LayeredArgs, RunArgs};
use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "delth")]
#[command(
    version,
    about = "Graceful-shutdown sidecar: fail health checks, wait, then stop the command",
    long_about = None
)]
pub struct Cli {
    #[command(flatten)]
    pub run: LayeredArgs<RunArgs>,
}
