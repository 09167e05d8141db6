// Probe with libav demuxing headers only

use ffmpeg_next as ffmpeg;
use ffmpeg_next::media;
use tracing::debug;

use super::local_path;
use crate::domain::errors::DomainError;
use crate::domain::model::{MediaSource, VideoMetadata};
use crate::ports::MetadataSource;

/// Metadata source reading container headers through libav
#[derive(Debug, Clone, Copy, Default)]
pub struct FfmpegProbe;

impl FfmpegProbe {
    pub fn new() -> Self {
        Self
    }

    /// Container mime type from the libav demuxer short names
    fn container_mime(names: &str) -> String {
        let first = names.split(',').next().unwrap_or(names);
        match first {
            "mov" | "mp4" => "video/mp4".to_string(),
            "matroska" | "webm" => "video/x-matroska".to_string(),
            "avi" => "video/avi".to_string(),
            "mpegts" => "video/mp2t".to_string(),
            other => format!("video/{}", other),
        }
    }

    /// Clockwise rotation from the legacy `rotate` stream tag
    fn rotation(stream: &ffmpeg::Stream) -> u32 {
        stream
            .metadata()
            .get("rotate")
            .and_then(|value| value.trim().parse::<i64>().ok())
            .map(|degrees| degrees.rem_euclid(360) as u32)
            .unwrap_or(0)
    }
}

impl MetadataSource for FfmpegProbe {
    fn probe(&self, source: &MediaSource) -> Result<VideoMetadata, DomainError> {
        let path = local_path(source)?;
        let input = ffmpeg::format::input(&path)
            .map_err(|e| DomainError::FileNotFound(format!("{}: {}", path.display(), e)))?;

        let mut metadata = VideoMetadata {
            bitrate: input.bit_rate().max(0) as u64,
            duration_ms: (input.duration().max(0) / 1000) as u64,
            mime_type: Self::container_mime(input.format().name()),
            ..VideoMetadata::default()
        };

        if let Some(stream) = input.streams().best(media::Type::Video) {
            let decoder = ffmpeg::codec::context::Context::from_parameters(stream.parameters())
                .and_then(|context| context.decoder().video())
                .map_err(|e| {
                    DomainError::InvalidFormat(format!("Unreadable video stream: {}", e))
                })?;
            metadata.width = decoder.width();
            metadata.height = decoder.height();
            metadata.rotation = Self::rotation(&stream);
            if metadata.bitrate == 0 {
                metadata.bitrate = decoder.bit_rate() as u64;
            }
        }

        debug!("probed {}: {:?}", path.display(), metadata);
        Ok(metadata)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_container_mime() {
        assert_eq!(FfmpegProbe::container_mime("mov,mp4,m4a,3gp,3g2,mj2"), "video/mp4");
        assert_eq!(FfmpegProbe::container_mime("matroska,webm"), "video/x-matroska");
        assert_eq!(FfmpegProbe::container_mime("flv"), "video/flv");
    }

    #[test]
    fn test_missing_file() {
        let source = MediaSource::parse("/nonexistent/clip.mp4");
        assert!(matches!(
            FfmpegProbe::new().probe(&source),
            Err(DomainError::FileNotFound(_))
        ));
    }
}
