// Domain models - Core types and data structures

mod media;
mod quality;

pub use media::*;
pub use quality::*;

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::domain::errors::{DomainError, ErrorCode};

/// Probed properties of a video source
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct VideoMetadata {
    pub width: u32,
    pub height: u32,
    /// Clockwise display rotation in degrees (0, 90, 180 or 270)
    pub rotation: u32,
    /// Bits per second
    pub bitrate: u64,
    pub duration_ms: u64,
    pub mime_type: String,
}

impl VideoMetadata {
    /// Swap dimensions for 90/270 rotations and clear the rotation.
    ///
    /// After this call `rotation` is always 0 and `width`/`height` describe
    /// the frame as it is displayed.
    pub fn normalize_orientation(&mut self) {
        if self.rotation == 90 || self.rotation == 270 {
            std::mem::swap(&mut self.width, &mut self.height);
        }
        self.rotation = 0;
    }

    pub fn resolution(&self) -> Resolution {
        Resolution::new(self.width, self.height)
    }

    /// Quality model of the source as probed
    pub fn quality(&self) -> QualityModel {
        QualityModel::new(self.resolution(), self.bitrate)
    }

    /// Reject sources reporting a zero dimension
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.width == 0 || self.height == 0 {
            return Err(DomainError::InvalidFormat(format!(
                "source reports {}x{}",
                self.width, self.height
            )));
        }
        Ok(())
    }
}

impl fmt::Display for VideoMetadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}x{} rot {} @ {} bps, {} ms, {}",
            self.width, self.height, self.rotation, self.bitrate, self.duration_ms, self.mime_type
        )
    }
}

/// Where a job reads its input from
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MediaSource {
    File(PathBuf),
    Uri(String),
}

impl MediaSource {
    /// Build a source from user input, treating anything with a scheme as a URI
    pub fn parse(input: &str) -> Self {
        match url::Url::parse(input) {
            // Single-letter schemes are Windows drive letters
            Ok(parsed) if parsed.scheme().len() > 1 => MediaSource::Uri(input.to_string()),
            _ => MediaSource::File(PathBuf::from(input)),
        }
    }

    /// Resolve to a local path (plain files and `file://` URIs)
    pub fn local_path(&self) -> Option<PathBuf> {
        match self {
            MediaSource::File(path) => Some(path.clone()),
            MediaSource::Uri(uri) => {
                let parsed = url::Url::parse(uri).ok()?;
                if parsed.scheme() == "file" {
                    parsed.to_file_path().ok()
                } else {
                    None
                }
            }
        }
    }

    /// Final path segment, used to name outputs
    pub fn file_name(&self) -> Option<String> {
        match self {
            MediaSource::File(path) => path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned()),
            MediaSource::Uri(uri) => {
                let parsed = url::Url::parse(uri).ok()?;
                parsed
                    .path_segments()?
                    .filter(|segment| !segment.is_empty())
                    .last()
                    .map(str::to_string)
            }
        }
    }
}

impl From<&Path> for MediaSource {
    fn from(path: &Path) -> Self {
        MediaSource::File(path.to_path_buf())
    }
}

impl From<PathBuf> for MediaSource {
    fn from(path: PathBuf) -> Self {
        MediaSource::File(path)
    }
}

impl fmt::Display for MediaSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaSource::File(path) => write!(f, "{}", path.display()),
            MediaSource::Uri(uri) => f.write_str(uri),
        }
    }
}

/// Process-local job identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct JobId(pub u64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Lifecycle of a compression job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Created,
    Probing,
    Passthrough,
    Transcoding,
    Finalizing,
    Completed,
    Failed,
    Cancelled,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobState::Completed | JobState::Failed | JobState::Cancelled
        )
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JobState::Created => "created",
            JobState::Probing => "probing",
            JobState::Passthrough => "passthrough",
            JobState::Transcoding => "transcoding",
            JobState::Finalizing => "finalizing",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
            JobState::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// Final result of a job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum JobOutcome {
    Completed { output: PathBuf },
    Failed { code: ErrorCode, message: String },
    Cancelled,
}

impl JobOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, JobOutcome::Completed { .. })
    }

    pub fn state(&self) -> JobState {
        match self {
            JobOutcome::Completed { .. } => JobState::Completed,
            JobOutcome::Failed { .. } => JobState::Failed,
            JobOutcome::Cancelled => JobState::Cancelled,
        }
    }
}

/// How the job decided to produce its output
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum CompressionPlan {
    /// Source already at or below the floor; copy bytes unchanged
    Passthrough { source: QualityModel },
    /// Re-encode the video track to `target`
    Transcode {
        source: QualityModel,
        target: QualityModel,
    },
}

impl CompressionPlan {
    pub fn source(&self) -> QualityModel {
        match self {
            CompressionPlan::Passthrough { source } => *source,
            CompressionPlan::Transcode { source, .. } => *source,
        }
    }

    pub fn target(&self) -> Option<QualityModel> {
        match self {
            CompressionPlan::Passthrough { .. } => None,
            CompressionPlan::Transcode { target, .. } => Some(*target),
        }
    }
}

#[cfg(test)]
mod tests;
