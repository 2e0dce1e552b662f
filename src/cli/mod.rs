//! CLI module for MarketScout
//!
//! Provides command-line interface parsing for the marketscout-server binary.
//! Uses clap for argument parsing and owo-colors for colored terminal output.

pub mod init;
pub mod output;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::types::Strategy;

/// MarketScout - multi-agent market research server
///
/// Turns one research prompt into a cited business memo, streaming every
/// step as an ordered event log.
#[derive(Parser, Debug)]
#[command(
    name = "marketscout-server",
    author = "Dirmacs <build@dirmacs.com>",
    version,
    about = "MarketScout - multi-agent market research server",
    long_about = "Turns one research prompt into a cited business memo by coordinating\n\
                  news research, financial analysis and memo writing agents.\n\n\
                  Run without arguments to start the server, or use 'init' to scaffold a new project.",
    after_help = "EXAMPLES:\n    \
                  marketscout-server init                      # Scaffold marketscout.toml\n    \
                  marketscout-server                           # Start the server\n    \
                  marketscout-server run --prompt \"About Acme (ACME)\" --strategy hierarchical\n    \
                  marketscout-server --config my.toml serve    # Use a custom config file"
)]
pub struct Cli {
    /// Path to the configuration file
    #[arg(short, long, default_value = "marketscout.toml", global = true)]
    pub config: PathBuf,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available CLI subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the HTTP server (default)
    Serve,

    /// Run one session in-process and print its events
    ///
    /// Uses an in-memory store; nothing is persisted.
    Run {
        /// Research prompt
        #[arg(short, long)]
        prompt: String,

        /// Execution strategy
        #[arg(short, long, default_value = "sequential", value_parser = parse_strategy)]
        strategy: Strategy,
    },

    /// Write a default marketscout.toml
    Init {
        /// Directory to initialize (defaults to current directory)
        #[arg(default_value = ".")]
        path: PathBuf,

        /// Overwrite existing files
        #[arg(short, long)]
        force: bool,
    },
}

fn parse_strategy(value: &str) -> Result<Strategy, String> {
    value.parse().map_err(|e: crate::types::AppError| e.to_string())
}

impl Cli {
    /// Parse CLI arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
