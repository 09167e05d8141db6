//! Configuration initialization and hierarchy management

use anyhow::{anyhow, Context, Result};
use tracing::{debug, info};

use crate::adapters::toml_config::{AppConfig, TomlConfigAdapter};
use crate::cli::{Cli, Commands, StrategyArgs};
use crate::domain::model::ResolutionTier;
use crate::domain::rules::StrategyKind;
use crate::utils::logging::{LogFormat, LogLevel};

/// Prefix of environment overrides
pub const ENV_PREFIX: &str = "COMPRESSX_";

/// Build the effective configuration following precedence: CLI > Env > File > Defaults
pub fn initialize_configuration(cli: &Cli) -> Result<AppConfig> {
    let adapter = TomlConfigAdapter::default();

    match &cli.config {
        Some(path) => adapter
            .load_config(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
        None => {
            let base = std::env::current_dir().context("Failed to read working directory")?;
            match adapter.load_default_file(&base)? {
                Some(path) => debug!("using configuration file {}", path.display()),
                None => debug!("no configuration file, using defaults"),
            }
        }
    }

    let mut config = adapter.config();
    let env_overrides = apply_environment(&mut config, std::env::vars())?;
    let cli_overrides = apply_cli_overrides(&mut config, cli)?;
    config.validate().context("Invalid configuration")?;

    info!(
        "configuration ready ({} environment and {} CLI overrides)",
        env_overrides, cli_overrides
    );
    Ok(config)
}

/// Apply `COMPRESSX_*` variables. Returns how many were applied.
///
/// Variables clap already reads (config path, log level and format) are left to the CLI layer.
pub fn apply_environment(
    config: &mut AppConfig,
    vars: impl IntoIterator<Item = (String, String)>,
) -> Result<usize> {
    let mut applied = 0;
    for (name, value) in vars {
        let Some(key) = name.strip_prefix(ENV_PREFIX) else {
            continue;
        };
        let value = value.trim();
        match key {
            "MAX_CONCURRENT" => config.jobs.max_concurrent = parse_number(&name, value)?,
            "CODEC_TIMEOUT_US" => config.engine.codec_timeout_us = parse_number(&name, value)?,
            "COPY_CHUNK_SIZE" => config.engine.copy_chunk_size = parse_number(&name, value)?,
            "AUDIO_BUFFER_FLOOR" => config.engine.audio_buffer_floor = parse_number(&name, value)?,
            "OUTPUT_MIME" => config.engine.output_mime = value.to_string(),
            "STRATEGY" => config.strategy.kind = StrategyKind::parse(value)?,
            "TARGET_TIER" => config.strategy.target_tier = parse_tier(value)?,
            "TARGET_RATIO" => config.strategy.target_ratio = parse_number(&name, value)?,
            "CONFIG" | "LOG_LEVEL" | "LOG_FORMAT" => continue,
            other => {
                debug!("ignoring unknown environment variable {}{}", ENV_PREFIX, other);
                continue;
            }
        }
        debug!("environment override: {} = {}", name, value);
        applied += 1;
    }
    Ok(applied)
}

/// Apply global flags and the command's strategy options. Returns how many were applied.
pub fn apply_cli_overrides(config: &mut AppConfig, cli: &Cli) -> Result<usize> {
    let mut applied = 0;
    if let Some(level) = &cli.log_level {
        config.logging.level = LogLevel::parse(level)?;
        applied += 1;
    }
    if let Some(format) = &cli.log_format {
        config.logging.format = LogFormat::parse(format)?;
        applied += 1;
    }
    if let Some(strategy) = cli.command.strategy_args() {
        applied += apply_strategy_args(config, strategy)?;
    }
    if let Commands::Compress(args) = &cli.command {
        if let Some(jobs) = args.jobs {
            config.jobs.max_concurrent = jobs;
            applied += 1;
        }
    }
    Ok(applied)
}

fn apply_strategy_args(config: &mut AppConfig, args: &StrategyArgs) -> Result<usize> {
    let mut applied = 0;
    if let Some(kind) = &args.strategy {
        config.strategy.kind = StrategyKind::parse(kind)?;
        applied += 1;
    }
    if let Some(tier) = &args.target_tier {
        config.strategy.target_tier = parse_tier(tier)?;
        applied += 1;
    }
    if let Some(ratio) = args.target_ratio {
        config.strategy.target_ratio = ratio;
        applied += 1;
    }
    Ok(applied)
}

fn parse_tier(value: &str) -> Result<ResolutionTier> {
    ResolutionTier::parse(value).ok_or_else(|| anyhow!("Invalid resolution tier: {}", value))
}

fn parse_number<T>(name: &str, value: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .parse::<T>()
        .with_context(|| format!("Invalid value for {}: {}", name, value))
}
