//! CLI interface for scalp-engine
//!
//! Provides subcommands for:
//! - `run`: Start the engine against the configured gateway
//! - `status`: Show the last diagnostics snapshot and trade summary
//! - `config`: Show the effective configuration

mod run;
mod status;

pub use run::RunArgs;
pub use status::StatusArgs;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "scalp-engine")]
#[command(about = "Risk-gated position lifecycle engine for short-horizon trading")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    pub config: String,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the engine
    Run(RunArgs),
    /// Show current state
    Status(StatusArgs),
    /// Show effective configuration
    Config,
}
