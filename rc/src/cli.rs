//! CLI command definitions and subcommands

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// relaychat - broadcast chat through a central coordinator
#[derive(Parser)]
#[command(
    name = "rc",
    about = "Broadcast chat: every message goes to every other registered peer",
    version
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[arg(
        short = 'l',
        long = "log-level",
        global = true,
        help = "Log level (TRACE, DEBUG, INFO, WARN, ERROR)"
    )]
    pub log_level: Option<String>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run a coordinator in the foreground
    Serve {
        /// Well-known name to publish under
        #[arg(short, long)]
        name: Option<String>,
    },

    /// Join the chat interactively
    Join {
        /// Handle to register as
        handle: String,

        /// Name of the coordinator to join
        #[arg(short, long)]
        name: Option<String>,
    },

    /// Send one message without joining
    Send {
        /// Handle to send as
        handle: String,

        /// Message text
        message: String,

        /// Name of the coordinator to send through
        #[arg(short, long)]
        name: Option<String>,
    },

    /// Check that a coordinator is alive
    Ping {
        /// Name of the coordinator to ping
        #[arg(short, long)]
        name: Option<String>,
    },
}

impl Command {
    /// Coordinator name override given on the command line
    pub fn name(&self) -> Option<&str> {
        match self {
            Command::Serve { name }
            | Command::Join { name, .. }
            | Command::Send { name, .. }
            | Command::Ping { name } => name.as_deref(),
        }
    }
}

/// Get the log file path
pub fn get_log_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("relaychat")
        .join("logs")
        .join("relaychat.log")
}
