//! Command-line argument definitions

use std::path::PathBuf;

use clap::Args;

/// Strategy selection shared by the compress, inspect and plan commands
#[derive(Args, Debug, Clone, Default)]
pub struct StrategyArgs {
    /// Quality strategy (low-quality, fixed-target)
    #[arg(long)]
    pub strategy: Option<String>,

    /// Highest tier kept by the fixed-target strategy (360p, 480p, 720p, 1080p)
    #[arg(long)]
    pub target_tier: Option<String>,

    /// Bits per weighted pixel used by the fixed-target strategy
    #[arg(long)]
    pub target_ratio: Option<f64>,
}

/// Arguments for the compress command
#[derive(Args, Debug)]
pub struct CompressArgs {
    /// Input video file, directory or URI
    #[arg(short, long)]
    pub input: String,

    /// Output directory (default: next to the input)
    #[arg(short, long)]
    pub output_dir: Option<PathBuf>,

    /// Output file name, single input only (default: <name>_compressed.mp4)
    #[arg(short, long)]
    pub name: Option<String>,

    /// Walk sub-directories when the input is a directory
    #[arg(short, long)]
    pub recursive: bool,

    /// Jobs running at the same time
    #[arg(short, long)]
    pub jobs: Option<usize>,

    /// Print job events as JSON lines
    #[arg(long)]
    pub json: bool,

    #[command(flatten)]
    pub strategy: StrategyArgs,
}

/// Arguments for the inspect command
#[derive(Args, Debug)]
pub struct InspectArgs {
    /// Input video file path or URI
    #[arg(short, long)]
    pub input: String,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,

    #[command(flatten)]
    pub strategy: StrategyArgs,
}

/// Arguments for the plan command
#[derive(Args, Debug)]
pub struct PlanArgs {
    /// Source width in pixels
    #[arg(long)]
    pub width: u32,

    /// Source height in pixels
    #[arg(long)]
    pub height: u32,

    /// Source bitrate in bits per second
    #[arg(long)]
    pub bitrate: u64,

    /// Clockwise display rotation in degrees
    #[arg(long, default_value_t = 0)]
    pub rotation: u32,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,

    #[command(flatten)]
    pub strategy: StrategyArgs,
}

/// Arguments for the config command
#[derive(Args, Debug)]
pub struct ConfigArgs {
    /// Also write the effective configuration to this file
    #[arg(long)]
    pub save: Option<PathBuf>,
}
