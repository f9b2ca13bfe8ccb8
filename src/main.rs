use anyhow::Result;
use clap::Parser;

use tooldeck::cli::{Cli, Commands};
use tooldeck::commands;
use tooldeck::logging;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize structured logging
    logging::init();

    // Parse CLI arguments
    let cli = Cli::parse();

    // Dispatch to appropriate command handler
    match cli.command {
        Commands::Run(args) => commands::run::run(&args).await,
        Commands::Preflight(args) => commands::preflight::run(&args),
        Commands::Cache(args) => commands::cache::run(&args),
        Commands::Doctor(args) => commands::doctor::run(&args),
    }
}
