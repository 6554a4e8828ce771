//! ghquick CLI binary entry point.
//!
//! Parses command-line arguments with clap, initializes tracing, and
//! dispatches to the selected subcommand via [`Cli::run`].

mod cli;
mod logging;

use anyhow::Result;
use clap::Parser;

use crate::cli::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Held until exit so the file writer flushes.
    let _guard = logging::init_tracing(cli.debug, cli.log_file.as_deref())?;

    cli.run().await
}
