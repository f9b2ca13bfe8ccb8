use clap::{Args, Parser, Subcommand};

/// Maintenance tool launcher for the back-office product
#[derive(Parser)]
#[command(name = "tooldeck", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Fetch, validate, and execute a maintenance tool
    Run(RunArgs),
    /// Run the pre-flight battery for a tool and print the report
    Preflight(PreflightArgs),
    /// Inspect or maintain the local artifact cache
    Cache(CacheArgs),
    /// Check the local environment and configuration
    Doctor(DoctorArgs),
}

#[derive(Args)]
pub struct RunArgs {
    /// Repository-relative script path (e.g., scripts/db/reindex.ps1)
    pub script: String,

    /// Tool identifier recorded in the history ledger (defaults to the script path)
    #[arg(long)]
    pub id: Option<String>,

    /// Named parameter passed to the script (repeatable)
    #[arg(long = "param", value_name = "NAME=VALUE")]
    pub params: Vec<String>,

    /// The tool requires elevated privileges
    #[arg(long)]
    pub needs_elevation: bool,

    /// The tool requires a live data endpoint
    #[arg(long)]
    pub needs_endpoint: bool,

    /// Module dependency the script imports (repeatable)
    #[arg(long = "dep", value_name = "KEY")]
    pub dependencies: Vec<String>,

    /// Execute even when pre-flight checks fail
    #[arg(long)]
    pub force: bool,

    /// Path to tooldeck.toml (discovered from the working directory when omitted)
    #[arg(long)]
    pub config: Option<String>,
}

#[derive(Args)]
pub struct PreflightArgs {
    /// Repository-relative script path to validate
    pub script: String,

    /// The tool requires elevated privileges
    #[arg(long)]
    pub needs_elevation: bool,

    /// The tool requires a live data endpoint
    #[arg(long)]
    pub needs_endpoint: bool,

    /// Module dependency the script imports (repeatable)
    #[arg(long = "dep", value_name = "KEY")]
    pub dependencies: Vec<String>,

    /// Path to tooldeck.toml (discovered from the working directory when omitted)
    #[arg(long)]
    pub config: Option<String>,
}

#[derive(Args)]
pub struct CacheArgs {
    #[command(subcommand)]
    pub command: CacheCommand,

    /// Path to tooldeck.toml (discovered from the working directory when omitted)
    #[arg(long)]
    pub config: Option<String>,
}

#[derive(Subcommand)]
pub enum CacheCommand {
    /// Show cached file count and total size
    Stats,
    /// Delete every cached artifact and all metadata
    Clear,
    /// Delete only artifacts whose TTL has expired
    Sweep,
}

#[derive(Args)]
pub struct DoctorArgs {
    /// Show additional detail
    #[arg(long, short)]
    pub verbose: bool,

    /// Path to tooldeck.toml (discovered from the working directory when omitted)
    #[arg(long)]
    pub config: Option<String>,
}
