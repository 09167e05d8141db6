//! CompressX command-line compressor
//!
//! # Usage
//!
//! ```bash
//! compressor compress --input holiday.mov
//! compressor compress --input videos/ --recursive --output-dir small/
//! compressor inspect --input holiday.mov --json
//! compressor plan --width 1920 --height 1080 --bitrate 6220800
//! compressor config
//! ```

use anyhow::Result;
use clap::Parser;
use tracing::info;

use compressx_cli::cli::{commands, Cli, Commands};
use compressx_cli::config_initialization::initialize_configuration;
use compressx_cli::utils::logging::init_logging;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = initialize_configuration(&cli)?;
    init_logging(&config.logging);

    info!("Starting CompressX {}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Commands::Compress(args) => commands::compress(args, &config).await,
        Commands::Inspect(args) => commands::inspect(args, &config),
        Commands::Plan(args) => commands::plan(args, &config),
        Commands::Config(args) => commands::show_config(args, &config),
    }
}
