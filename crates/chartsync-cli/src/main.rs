//! ChartSync CLI - command-line interface for the offline-first record queue
//!
//! Provides commands for:
//! - Caching login credentials for offline authentication
//! - Inspecting queue depths, dead letters, and drain history
//! - Draining queued records to the remote on demand
//! - Controlling the background agent over D-Bus
//! - Viewing and validating configuration

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use chartsync_core::config::Config;

mod commands;
mod output;

use commands::{
    agent::AgentCommand,
    auth::{LoginCommand, LogoutCommand},
    completions::CompletionsCommand,
    config::ConfigCommand,
    history::HistoryCommand,
    queue::{QueueCommand, RedriveCommand},
    status::StatusCommand,
    sync::SyncCommand,
};
use output::OutputFormat;

#[derive(Debug, Parser)]
#[command(
    name = "chartsync",
    version,
    about = "Offline-first sync for clinical records"
)]
pub struct Cli {
    /// Output in JSON format
    #[arg(long, global = true)]
    json: bool,

    /// Verbose output (can be repeated: -v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Use alternate config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Cache login credentials for offline authentication
    Login(LoginCommand),
    /// Clear cached credentials
    Logout(LogoutCommand),
    /// Show queue depths, credentials, and the last drain
    Status(StatusCommand),
    /// Drain queued records to the remote now
    Sync(SyncCommand),
    /// Inspect and feed the pending queues
    #[command(subcommand)]
    Queue(QueueCommand),
    /// Move a dead-lettered record back into its queue
    Redrive(RedriveCommand),
    /// Show recent drain runs
    History(HistoryCommand),
    /// Control the running chartsyncd agent
    #[command(subcommand)]
    Agent(AgentCommand),
    /// View and validate configuration
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Generate shell completions
    Completions(CompletionsCommand),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup tracing
    let filter = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();

    let format = if cli.json {
        OutputFormat::Json
    } else {
        OutputFormat::Human
    };

    let config_path = cli.config.unwrap_or_else(Config::default_path);

    match cli.command {
        Commands::Login(cmd) => cmd.execute(format, &config_path).await,
        Commands::Logout(cmd) => cmd.execute(format, &config_path).await,
        Commands::Status(cmd) => cmd.execute(format, &config_path).await,
        Commands::Sync(cmd) => cmd.execute(format, &config_path).await,
        Commands::Queue(cmd) => cmd.execute(format, &config_path).await,
        Commands::Redrive(cmd) => cmd.execute(format, &config_path).await,
        Commands::History(cmd) => cmd.execute(format, &config_path).await,
        Commands::Agent(cmd) => cmd.execute(format).await,
        Commands::Config(cmd) => cmd.execute(format, &config_path).await,
        Commands::Completions(cmd) => cmd.execute(format).await,
    }
}
