//! CLI module for canvass.
//!
//! Provides command-line argument parsing for the canvass binary. Uses
//! clap for parsing and owo-colors for colored terminal output.

pub mod output;

pub use output::Output;

use clap::Parser;
use std::path::PathBuf;

/// canvass - multi-agent query orchestrator
///
/// Polls every enabled agent with the configured query list, captures
/// timing and quality metrics, and records each response once per run.
#[derive(Parser, Debug)]
#[command(
    name = "canvass",
    author = "Dirmacs <build@dirmacs.com>",
    version,
    about = "Canvass - multi-agent query orchestrator",
    long_about = "Polls conversational web agents (browser-session chatbots and an LLM API)\n\
                  with a fixed query list, bounds concurrency against the shared session\n\
                  ceiling, retries transient failures, and records every response exactly\n\
                  once per run.",
    after_help = "EXAMPLES:\n    \
                  canvass                       # One pass over the query list (requires canvass.toml)\n    \
                  canvass --runs 3              # Repeat the full pass three times\n    \
                  canvass --config my.toml      # Use a custom config file\n    \
                  canvass --verbose             # Debug-level logging"
)]
pub struct Cli {
    /// Path to the configuration file
    #[arg(short, long, default_value = "canvass.toml")]
    pub config: PathBuf,

    /// How many times to execute the full query list
    #[arg(short, long, default_value_t = 1)]
    pub runs: u32,

    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,

    /// Disable colored output
    #[arg(long)]
    pub no_color: bool,
}
