// Domain rules - Quality reduction policies

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::domain::errors::DomainError;
use crate::domain::model::*;

/// Policy deciding whether a rendition needs reducing and what to reduce it to
pub trait QualityStrategy: Send + Sync {
    /// True when the source should be re-encoded
    fn accept(&self, origin: &QualityModel) -> bool;

    /// Target rendition for a source that was accepted
    fn reduce(&self, origin: &QualityModel) -> QualityModel;

    /// Short name used in logs
    fn name(&self) -> &'static str;
}

/// Steps resolution and quality ratio down one bucket each.
///
/// Sources already at 360p with a ratio at or below LOW are left alone.
#[derive(Debug, Clone, Copy, Default)]
pub struct LowQualityStrategy;

impl QualityStrategy for LowQualityStrategy {
    fn accept(&self, origin: &QualityModel) -> bool {
        origin.tier() > ResolutionTier::P360 || origin.ratio() > LOW
    }

    fn reduce(&self, origin: &QualityModel) -> QualityModel {
        let tier = lower_tier(origin.tier());
        let resolution = scaled_resolution(origin.resolution(), tier);
        let ratio = lower_quality_ratio(origin.ratio());
        QualityModel::from_ratio(resolution, ratio)
    }

    fn name(&self) -> &'static str {
        "low-quality"
    }
}

/// Caps the output at a fixed tier and ratio
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FixedTargetStrategy {
    tier: ResolutionTier,
    ratio: f64,
}

impl FixedTargetStrategy {
    pub fn new(tier: ResolutionTier, ratio: f64) -> Result<Self, DomainError> {
        if !ratio.is_finite() || ratio <= 0.0 {
            return Err(DomainError::BadArgs(format!(
                "target ratio must be positive, got {}",
                ratio
            )));
        }
        Ok(Self { tier, ratio })
    }

    pub fn tier(&self) -> ResolutionTier {
        self.tier
    }

    pub fn ratio(&self) -> f64 {
        self.ratio
    }
}

impl QualityStrategy for FixedTargetStrategy {
    fn accept(&self, origin: &QualityModel) -> bool {
        origin.tier() > self.tier || origin.ratio() > self.ratio
    }

    fn reduce(&self, origin: &QualityModel) -> QualityModel {
        let resolution = if origin.tier() > self.tier {
            scaled_resolution(origin.resolution(), self.tier)
        } else {
            origin.resolution()
        };
        QualityModel::from_ratio(resolution, origin.ratio().min(self.ratio))
    }

    fn name(&self) -> &'static str {
        "fixed-target"
    }
}

/// Which strategy a job runs with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StrategyKind {
    #[default]
    LowQuality,
    FixedTarget,
}

impl StrategyKind {
    pub fn parse(value: &str) -> Result<Self, DomainError> {
        match value.trim().to_ascii_lowercase().as_str() {
            "low-quality" | "low" => Ok(StrategyKind::LowQuality),
            "fixed-target" | "fixed" => Ok(StrategyKind::FixedTarget),
            other => Err(DomainError::BadArgs(format!(
                "unknown strategy '{}', expected low-quality or fixed-target",
                other
            ))),
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StrategyKind::LowQuality => f.write_str("low-quality"),
            StrategyKind::FixedTarget => f.write_str("fixed-target"),
        }
    }
}

/// Build a shareable strategy
pub fn build_strategy(
    kind: StrategyKind,
    target_tier: ResolutionTier,
    target_ratio: f64,
) -> Result<Arc<dyn QualityStrategy>, DomainError> {
    match kind {
        StrategyKind::LowQuality => Ok(Arc::new(LowQualityStrategy)),
        StrategyKind::FixedTarget => Ok(Arc::new(FixedTargetStrategy::new(
            target_tier,
            target_ratio,
        )?)),
    }
}

/// Decide between passthrough and transcode for an orientation-normalized source
pub fn plan_compression(strategy: &dyn QualityStrategy, source: QualityModel) -> CompressionPlan {
    if strategy.accept(&source) {
        CompressionPlan::Transcode {
            source,
            target: strategy.reduce(&source),
        }
    } else {
        CompressionPlan::Passthrough { source }
    }
}
