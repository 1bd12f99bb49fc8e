use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Top-level CLI interface for the logger service
#[derive(Debug, Parser)]
#[command(
    name = "logger-service",
    version,
    about = "Log ingestion and query service"
)]
pub struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, env = "LOGGER_CONFIG_PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Subcommands of the `logger-service` binary.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the HTTP API and the ingestion consumer (default)
    Serve,

    /// Create the logs table if it does not exist
    Migrate,

    /// Publish one log event onto the ingestion topic
    Publish {
        #[arg(short, long)]
        level: String,
        #[arg(short, long)]
        source: String,
        #[arg(short, long)]
        message: String,
    },
}

impl Cli {
    /// The requested subcommand, `serve` when none was given.
    pub fn into_parts(self) -> (Option<PathBuf>, Command) {
        (self.config, self.command.unwrap_or(Command::Serve))
    }
}
