//! Ophiron CLI entry point.
//!
//! Parses arguments, loads configuration, initializes logging, and
//! dispatches to a command handler. Errors map to exit codes via
//! [`error::CliError::exit_code`].

mod cli;
mod commands;
mod error;
mod logging;
mod output;

use clap::Parser;
use colored::Colorize;

use cli::{Cli, Commands};
use commands::ConfigSource;
use error::CliError;
use output::OutputWriter;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("{} {}", "error:".red().bold(), e);
        std::process::exit(e.exit_code());
    }
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let source = ConfigSource::resolve(cli.config.as_deref());
    let loaded = source.load().await;

    // `config validate` must still run when loading fails, so logging
    // falls back to defaults instead of aborting here.
    let mut general = loaded
        .as_ref()
        .map(|c| c.general.clone())
        .unwrap_or_default();
    if let Some(level) = cli.log_level {
        general.log_level = level;
    }
    logging::init_tracing(&general).map_err(|e| CliError::Config(e.to_string()))?;

    tracing::debug!(config = %source.describe(), "ophiron starting");
    ophiron_core::metrics::describe_all();

    let writer = OutputWriter::new(cli.output);
    match cli.command {
        Commands::Config(args) => commands::config::execute(args, &source, &writer).await,
        Commands::Scan(args) => commands::scan::execute(args, &loaded?, &writer).await,
        Commands::Container(args) => commands::container::execute(args, &loaded?, &writer).await,
        Commands::Detect => commands::detect::execute(&loaded?, &writer).await,
    }
}
