//! CompressX adaptive video compression library
//!
//! Decides a lower resolution and bitrate tier for a video, re-encodes the
//! video track through a decoder, an image relay and an encoder, and copies the
//! audio track unchanged. Sources already at the quality floor are copied byte
//! for byte.
//!
//! Media access goes through the traits in [`ports`]. The in-memory backend in
//! [`adapters::memory`] implements all of them; the libav backend lives behind
//! the `ffmpeg` cargo feature.

pub mod adapters;
pub mod app;
pub mod cli;
pub mod config_initialization;
pub mod domain;
pub mod engine;
pub mod error;
pub mod ports;
pub mod utils;

// Re-export commonly used types
pub use app::{CompressService, JobTicket};
pub use domain::errors::{DomainError, ErrorCode};
pub use domain::model::{JobId, JobOutcome, JobState, MediaSource, VideoMetadata};
pub use domain::rules::{FixedTargetStrategy, LowQualityStrategy, QualityStrategy};
pub use engine::{CompressRequest, EngineConfig};
pub use error::{CompressXError, CompressXResult};
pub use ports::{CompressCallback, MediaPorts};
