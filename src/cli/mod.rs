//! CLI module for CompressX
//!
//! This module handles command-line argument parsing and command execution.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

pub mod args;
pub mod commands;

pub use args::{CompressArgs, ConfigArgs, InspectArgs, PlanArgs, StrategyArgs};

/// CompressX adaptive video compressor
///
/// Picks a lower resolution and bitrate tier for each input and re-encodes the
/// video track, copying audio unchanged. Inputs already at the quality floor are
/// copied byte for byte.
#[derive(Parser, Debug)]
#[command(name = "compressor")]
#[command(about = "CompressX - Adaptive video compression")]
#[command(version)]
#[command(long_about = None)]
pub struct Cli {
    /// Configuration file (TOML)
    #[arg(long, global = true, env = "COMPRESSX_CONFIG")]
    pub config: Option<PathBuf>,

    /// Logging level (error, warn, info, debug, trace)
    #[arg(long, global = true, env = "COMPRESSX_LOG_LEVEL")]
    pub log_level: Option<String>,

    /// Log format (pretty, compact, json)
    #[arg(long, global = true, env = "COMPRESSX_LOG_FORMAT")]
    pub log_format: Option<String>,

    /// The command to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Compress a video file or every video in a directory
    Compress(CompressArgs),
    /// Probe a video and show what compressing it would do
    Inspect(InspectArgs),
    /// Show the decision for explicit source parameters
    Plan(PlanArgs),
    /// Print the effective configuration as TOML
    Config(ConfigArgs),
}

impl Commands {
    /// Strategy overrides given on the command line, if the command takes any
    pub fn strategy_args(&self) -> Option<&StrategyArgs> {
        match self {
            Commands::Compress(args) => Some(&args.strategy),
            Commands::Inspect(args) => Some(&args.strategy),
            Commands::Plan(args) => Some(&args.strategy),
            Commands::Config(_) => None,
        }
    }
}
