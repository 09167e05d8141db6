// TOML config adapter - Configuration management using TOML files

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::domain::errors::*;
use crate::domain::model::{ResolutionTier, LOW};
use crate::domain::rules::{build_strategy, QualityStrategy, StrategyKind};
use crate::engine::EngineConfig;
use crate::utils::logging::LoggingSettings;

/// Default file names searched in the working directory
pub const DEFAULT_CONFIG_FILES: &[&str] = &["compressx.toml", "config/compressx.toml"];

/// `[jobs]` section
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobSettings {
    /// Jobs running at the same time
    pub max_concurrent: usize,
}

impl Default for JobSettings {
    fn default() -> Self {
        Self {
            max_concurrent: num_cpus::get().max(1),
        }
    }
}

/// `[strategy]` section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategySettings {
    pub kind: StrategyKind,
    /// Cap used by the fixed-target strategy
    pub target_tier: ResolutionTier,
    pub target_ratio: f64,
}

impl Default for StrategySettings {
    fn default() -> Self {
        Self {
            kind: StrategyKind::LowQuality,
            target_tier: ResolutionTier::P720,
            target_ratio: LOW,
        }
    }
}

impl StrategySettings {
    pub fn build(&self) -> Result<Arc<dyn QualityStrategy>, DomainError> {
        build_strategy(self.kind, self.target_tier, self.target_ratio)
    }
}

/// Whole application configuration
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub engine: EngineConfig,
    pub jobs: JobSettings,
    pub logging: LoggingSettings,
    pub strategy: StrategySettings,
}

impl AppConfig {
    /// Reject values the engine cannot run with
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.jobs.max_concurrent == 0 {
            return Err(DomainError::BadArgs(
                "jobs.max_concurrent must be at least 1".to_string(),
            ));
        }
        if self.engine.copy_chunk_size == 0 {
            return Err(DomainError::BadArgs(
                "engine.copy_chunk_size must be at least 1".to_string(),
            ));
        }
        if self.engine.audio_buffer_floor == 0 {
            return Err(DomainError::BadArgs(
                "engine.audio_buffer_floor must be at least 1".to_string(),
            ));
        }
        if !self.engine.output_mime.starts_with(crate::domain::model::MIME_VIDEO_PREFIX) {
            return Err(DomainError::BadArgs(format!(
                "engine.output_mime must be a video type, got {}",
                self.engine.output_mime
            )));
        }
        self.strategy.build().map(|_| ())
    }
}

/// TOML configuration adapter
pub struct TomlConfigAdapter {
    config: Arc<RwLock<AppConfig>>,
    config_file_path: Arc<RwLock<Option<PathBuf>>>,
}

impl Default for TomlConfigAdapter {
    fn default() -> Self {
        Self::new(AppConfig::default())
    }
}

impl TomlConfigAdapter {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config: Arc::new(RwLock::new(config)),
            config_file_path: Arc::new(RwLock::new(None)),
        }
    }

    /// Snapshot of the current configuration
    pub fn config(&self) -> AppConfig {
        self.config.read().clone()
    }

    /// Apply an in-place change
    pub fn update(&self, change: impl FnOnce(&mut AppConfig)) {
        change(&mut *self.config.write());
    }

    /// Replace the configuration with the content of a TOML file.
    /// Keys missing from the file keep their defaults.
    pub fn load_config(&self, path: &Path) -> Result<(), DomainError> {
        if !path.exists() {
            return Err(DomainError::FsFail(format!(
                "Config file does not exist: {}",
                path.display()
            )));
        }
        let content = std::fs::read_to_string(path)
            .map_err(|e| DomainError::FsFail(format!("Failed to read config file: {}", e)))?;
        let parsed = Self::deserialize_config(&content)?;

        *self.config.write() = parsed;
        *self.config_file_path.write() = Some(path.to_path_buf());
        info!("Loaded configuration from {}", path.display());
        Ok(())
    }

    /// Load the first default file that exists. Returns its path.
    pub fn load_default_file(&self, base: &Path) -> Result<Option<PathBuf>, DomainError> {
        for name in DEFAULT_CONFIG_FILES {
            let candidate = base.join(name);
            if candidate.is_file() {
                self.load_config(&candidate)?;
                return Ok(Some(candidate));
            }
        }
        Ok(None)
    }

    pub fn save_config(&self, path: &Path) -> Result<(), DomainError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                DomainError::FsFail(format!("Failed to create config directory: {}", e))
            })?;
        }

        let content = self.serialize_config()?;
        std::fs::write(path, content)
            .map_err(|e| DomainError::FsFail(format!("Failed to write config file: {}", e)))?;

        *self.config_file_path.write() = Some(path.to_path_buf());
        Ok(())
    }

    /// Serialize config to TOML string
    pub fn serialize_config(&self) -> Result<String, DomainError> {
        toml::to_string_pretty(&*self.config.read())
            .map_err(|e| DomainError::InternalError(format!("TOML serialization failed: {}", e)))
    }

    /// Deserialize config from TOML string
    pub fn deserialize_config(content: &str) -> Result<AppConfig, DomainError> {
        toml::from_str(content)
            .map_err(|e| DomainError::BadArgs(format!("Failed to parse TOML config: {}", e)))
    }

    pub fn config_file_path(&self) -> Option<PathBuf> {
        self.config_file_path.read().clone()
    }
}
