// Inspect interactor - Probe a source and report what a job would do with it

use std::sync::Arc;

use serde::Serialize;

use crate::domain::errors::*;
use crate::domain::model::*;
use crate::domain::rules::{plan_compression, QualityStrategy};
use crate::ports::*;

/// Report output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InspectFormat {
    #[default]
    Text,
    Json,
}

/// Inspection request
#[derive(Debug, Clone)]
pub struct InspectRequest {
    pub source: MediaSource,
    pub format: InspectFormat,
}

/// Probe result plus the decision taken for it
#[derive(Debug, Clone, Serialize)]
pub struct InspectReport {
    /// Metadata as probed, before orientation normalization
    pub metadata: VideoMetadata,
    pub strategy: String,
    pub source_tier: ResolutionTier,
    pub source_ratio: String,
    pub plan: CompressionPlan,
}

/// Inspection response
#[derive(Debug, Clone)]
pub struct InspectResponse {
    pub report: InspectReport,
    pub summary: String,
}

/// Interactor for the inspect and plan use cases
pub struct InspectInteractor {
    metadata: Arc<dyn MetadataSource>,
    strategy: Arc<dyn QualityStrategy>,
}

impl InspectInteractor {
    pub fn new(metadata: Arc<dyn MetadataSource>, strategy: Arc<dyn QualityStrategy>) -> Self {
        Self { metadata, strategy }
    }

    /// Probe the source and render the decision
    pub fn execute(&self, request: InspectRequest) -> Result<InspectResponse, DomainError> {
        let metadata = self.metadata.probe(&request.source)?;
        self.describe(metadata, request.format)
    }

    /// Decision for explicit metadata, no probing involved
    pub fn plan(&self, metadata: VideoMetadata) -> Result<InspectReport, DomainError> {
        metadata.validate()?;
        let mut normalized = metadata.clone();
        normalized.normalize_orientation();
        let source = normalized.quality();

        Ok(InspectReport {
            metadata,
            strategy: self.strategy.name().to_string(),
            source_tier: source.tier(),
            source_ratio: ratio_label(source.ratio()).to_string(),
            plan: plan_compression(&*self.strategy, source),
        })
    }

    pub fn describe(
        &self,
        metadata: VideoMetadata,
        format: InspectFormat,
    ) -> Result<InspectResponse, DomainError> {
        let report = self.plan(metadata)?;
        let summary = match format {
            InspectFormat::Json => Self::format_as_json(&report)?,
            InspectFormat::Text => Self::format_as_text(&report),
        };
        Ok(InspectResponse { report, summary })
    }

    fn format_as_json(report: &InspectReport) -> Result<String, DomainError> {
        serde_json::to_string_pretty(report)
            .map_err(|e| DomainError::InternalError(format!("JSON serialization failed: {}", e)))
    }

    fn format_as_text(report: &InspectReport) -> String {
        let metadata = &report.metadata;
        let mut output = String::new();
        output.push_str("Source:\n");
        output.push_str(&format!("  Resolution: {}x{}\n", metadata.width, metadata.height));
        output.push_str(&format!("  Rotation: {}\n", metadata.rotation));
        output.push_str(&format!("  Bitrate: {} bps\n", metadata.bitrate));
        output.push_str(&format!("  Duration: {} ms\n", metadata.duration_ms));
        if !metadata.mime_type.is_empty() {
            output.push_str(&format!("  Mime type: {}\n", metadata.mime_type));
        }
        output.push_str(&format!(
            "  Quality: {} / {}\n",
            report.source_tier, report.source_ratio
        ));

        output.push_str(&format!("\nDecision ({}):\n", report.strategy));
        match report.plan {
            CompressionPlan::Passthrough { .. } => {
                output.push_str("  Passthrough: source is copied unchanged\n");
            }
            CompressionPlan::Transcode { target, .. } => {
                output.push_str(&format!(
                    "  Transcode to {} at {} bps ({} / {})\n",
                    target.resolution(),
                    target.bitrate(),
                    target.tier(),
                    ratio_label(target.ratio())
                ));
            }
        }
        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::{MemoryLibrary, MemoryMedia};
    use crate::domain::rules::LowQualityStrategy;

    fn interactor(library: Arc<MemoryLibrary>) -> InspectInteractor {
        InspectInteractor::new(library, Arc::new(LowQualityStrategy))
    }

    #[test]
    fn test_inspect_reports_transcode_plan() {
        let library = Arc::new(MemoryLibrary::new());
        let source = library.insert("hd.mp4", MemoryMedia::video(1920, 1080, 6_220_800, 10_000, 3));
        let response = interactor(library)
            .execute(InspectRequest {
                source,
                format: InspectFormat::Text,
            })
            .unwrap();

        let target = response.report.plan.target().unwrap();
        assert_eq!(target.resolution(), Resolution::new(1280, 720));
        assert_eq!(target.bitrate(), 1_382_400);
        assert!(response.summary.contains("Transcode to 1280x720"));
        assert_eq!(response.report.source_tier, ResolutionTier::P1080);
    }

    #[test]
    fn test_plan_normalizes_orientation_but_reports_probe() {
        let report = interactor(Arc::new(MemoryLibrary::new()))
            .plan(VideoMetadata {
                width: 1920,
                height: 1080,
                rotation: 270,
                bitrate: 6_220_800,
                ..VideoMetadata::default()
            })
            .unwrap();
        assert_eq!(report.metadata.rotation, 270);
        assert_eq!(
            report.plan.target().unwrap().resolution(),
            Resolution::new(720, 1280)
        );
    }

    #[test]
    fn test_small_source_passes_through_as_json() {
        let response = interactor(Arc::new(MemoryLibrary::new()))
            .describe(
                VideoMetadata {
                    width: 480,
                    height: 360,
                    bitrate: 129_600,
                    ..VideoMetadata::default()
                },
                InspectFormat::Json,
            )
            .unwrap();
        assert!(response.report.plan.target().is_none());
        let value: serde_json::Value = serde_json::from_str(&response.summary).unwrap();
        assert_eq!(value["plan"]["mode"], "passthrough");
    }

    #[test]
    fn test_zero_dimension_is_rejected() {
        let result = interactor(Arc::new(MemoryLibrary::new())).plan(VideoMetadata::default());
        assert!(matches!(result, Err(DomainError::InvalidFormat(_))));
    }
}
