//! CLI interface for perpbot
//!
//! Provides subcommands for:
//! - `run`: Start the trading engine
//! - `status`: Show persisted engine state
//! - `config`: Show the resolved configuration

mod run;

pub use run::RunArgs;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "perpbot")]
#[command(about = "Autonomous rule-based trading engine for perpetual futures")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Override the LOG_LEVEL environment setting
    #[arg(long)]
    pub log_level: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the trading engine
    Run(RunArgs),
    /// Show persisted engine state
    Status,
    /// Show the resolved configuration
    Config,
}
