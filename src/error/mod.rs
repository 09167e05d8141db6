//! Error handling module for CompressX

use thiserror::Error;

use crate::domain::errors::{DomainError, ErrorCode};

/// Main error type for compression jobs
#[derive(Error, Debug)]
pub enum CompressXError {
    /// Source could not be probed or opened
    #[error("Source not found: {message}")]
    SourceNotFound { message: String },

    /// Source reports a zero dimension
    #[error("Invalid source: {width}x{height}")]
    InvalidSource { width: u32, height: u32 },

    /// Source has no video track to re-encode
    #[error("Video track not found")]
    VideoTrackNotFound,

    /// No encoder accepts the output format
    #[error("Encoder not found for {mime}: {message}")]
    EncoderNotFound { mime: String, message: String },

    /// No decoder accepts the input format
    #[error("Decoder not found for {mime}: {message}")]
    DecoderNotFound { mime: String, message: String },

    /// Codec, relay or container failure while pumping
    #[error("Pipeline error: {message}")]
    Pipeline { message: String },

    /// Configuration error
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Port level failure
    #[error(transparent)]
    Domain(#[from] DomainError),

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl CompressXError {
    /// Build a pipeline error from any displayable failure
    pub fn pipeline(message: impl Into<String>) -> Self {
        CompressXError::Pipeline {
            message: message.into(),
        }
    }

    /// Stable code reported through `on_error`
    pub fn code(&self) -> ErrorCode {
        match self {
            CompressXError::SourceNotFound { .. } => ErrorCode::SourceNotFound,
            CompressXError::InvalidSource { .. } => ErrorCode::InvalidSource,
            CompressXError::VideoTrackNotFound => ErrorCode::VideoTrackNotFound,
            CompressXError::EncoderNotFound { .. } => ErrorCode::EncoderNotFound,
            CompressXError::DecoderNotFound { .. } => ErrorCode::DecoderNotFound,
            CompressXError::Pipeline { .. }
            | CompressXError::Config { .. }
            | CompressXError::Domain(_)
            | CompressXError::IoError(_) => ErrorCode::GenericError,
        }
    }
}

/// Result type alias for CompressX operations
pub type CompressXResult<T> = std::result::Result<T, CompressXError>;
