//! Command-line entry points: `run` the orchestrator, `validate` configuration without
//! starting anything, or `status` a running orchestrator via its HTTP surface.

use clap::{Parser, Subcommand};

/// MCP orchestrator command-line interface.
#[derive(Parser, Debug)]
#[command(name = "orchd", about = "Supervises a fleet of MCP server subprocesses")]
pub struct Cli {
    /// Subcommand to run.
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level subcommands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the orchestrator and run until SIGTERM/SIGINT.
    Run,
    /// Load and validate configuration, then exit without starting anything.
    Validate,
    /// Query a running orchestrator's HTTP surface and render a status table.
    Status {
        /// Base URL of the orchestrator's HTTP control surface.
        #[arg(long, default_value = "http://127.0.0.1:8080")]
        url: String,
    },
}
