// ABOUTME: Entry point for the dockr CLI application.
// ABOUTME: Parses arguments and dispatches to appropriate command handlers.

mod cli;
mod commands;

use clap::Parser;
use cli::{Cli, Commands};
use dockr::config::{self, CONFIG_FILENAME, Config};
use dockr::error::Result;
use dockr::output::{Output, OutputMode};
use std::env;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize tracing subscriber based on verbose flag
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("warn")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let mode = if cli.json {
        OutputMode::Json
    } else if cli.quiet {
        OutputMode::Quiet
    } else {
        OutputMode::Normal
    };

    if let Err(e) = run(cli.command, mode).await {
        Output::new(mode).error(&e.to_string());
        std::process::exit(1);
    }
}

async fn run(command: Commands, mode: OutputMode) -> Result<()> {
    let cwd = env::current_dir()?;
    let output = Output::new(mode);

    match command {
        Commands::Init { unit, force } => {
            config::init_config(&cwd, unit.as_deref(), force)?;
            output.success(&format!("Created {}", CONFIG_FILENAME));
            Ok(())
        }
        Commands::Plan => commands::plan(&Config::discover(&cwd)?, &cwd, output),
        Commands::Apply { force_unlock } => {
            let config = Config::discover(&cwd)?;
            commands::apply(config, &cwd, force_unlock, cancel_on_interrupt(), output).await
        }
        Commands::Destroy { force_unlock } => {
            let config = Config::discover(&cwd)?;
            commands::destroy(config, &cwd, force_unlock, cancel_on_interrupt(), output).await
        }
        Commands::Status => commands::status(&Config::discover(&cwd)?, &cwd, output).await,
    }
}

/// Ctrl-C stops the run after the in-flight operation.
fn cancel_on_interrupt() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupted; stopping after the in-flight operation");
            trigger.cancel();
        }
    });
    token
}
