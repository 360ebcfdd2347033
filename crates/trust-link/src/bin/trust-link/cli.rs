//! CLI definitions for trust-link.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(
    name = "trust-link",
    version,
    about = "Connect to Structured Text runtimes and watch their variables",
    after_help = "Examples:\n  trust-link status --config trust-link.toml\n  trust-link watch --config trust-link.toml --program main.st --seconds 30\n  trust-link check main.st"
)]
pub struct Cli {
    /// Enable debug logging.
    #[arg(long, short, global = true)]
    pub verbose: bool,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Connect to every configured controller and print their state.
    Status {
        /// Controller configuration file.
        #[arg(long, default_value = "trust-link.toml")]
        config: PathBuf,
        /// Connect timeout override in milliseconds.
        #[arg(long)]
        timeout_ms: Option<u64>,
        /// Time to wait for a first status update after connecting, in milliseconds.
        #[arg(long, default_value = "500")]
        settle_ms: u64,
    },
    /// Subscribe to variables and print history records as they arrive.
    Watch {
        /// Controller configuration file.
        #[arg(long, default_value = "trust-link.toml")]
        config: PathBuf,
        /// Only connect this controller (default: all).
        #[arg(long)]
        controller: Option<String>,
        /// Structured Text file whose program variables are watched.
        #[arg(long)]
        program: Option<PathBuf>,
        /// Extra variable to watch (repeatable).
        #[arg(long = "var")]
        vars: Vec<String>,
        /// Namespace tag (defaults to the program file name).
        #[arg(long)]
        namespace: Option<String>,
        /// Stop after this many seconds (0 = until interrupted).
        #[arg(long, default_value = "10")]
        seconds: u64,
        /// Connect timeout override in milliseconds.
        #[arg(long)]
        timeout_ms: Option<u64>,
        /// History ring size override.
        #[arg(long)]
        history: Option<usize>,
    },
    /// Validate a Structured Text file and list its watchable variables.
    Check {
        /// Structured Text source file.
        file: PathBuf,
    },
}
