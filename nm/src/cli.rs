//! Command-line interface

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Nuum - embedded conversational agent with continuous memory
#[derive(Debug, Parser)]
#[command(name = "nuum", version, about)]
pub struct Cli {
    /// Config file (YAML)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Store path override (also AGENT_DB)
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,

    /// Log level: trace|debug|info|warn|error
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run as a stdio-embedded engine (newline-delimited JSON)
    Run,

    /// Interactive chat
    Repl {
        /// Optional first prompt
        initial: Option<String>,
    },

    /// Print the agent's present state and background tasks
    Status,
}

/// Log file directory under the platform data dir
pub fn log_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("nuum")
        .join("logs")
}
