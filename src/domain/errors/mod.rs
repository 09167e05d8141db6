// Domain errors - Error types for the domain layer and the ports

use std::fmt;

use serde::{Deserialize, Serialize};

/// Stable error codes reported to job callbacks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    SourceNotFound = 0,
    InvalidSource = 1,
    GenericError = 2,
    VideoTrackNotFound = 3,
    EncoderNotFound = 4,
    DecoderNotFound = 5,
}

impl ErrorCode {
    /// Integer value of the code
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    /// Look up a code from its integer value
    pub fn from_i32(value: i32) -> Option<Self> {
        match value {
            0 => Some(ErrorCode::SourceNotFound),
            1 => Some(ErrorCode::InvalidSource),
            2 => Some(ErrorCode::GenericError),
            3 => Some(ErrorCode::VideoTrackNotFound),
            4 => Some(ErrorCode::EncoderNotFound),
            5 => Some(ErrorCode::DecoderNotFound),
            _ => None,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorCode::SourceNotFound => "SOURCE_NOT_FOUND",
            ErrorCode::InvalidSource => "INVALID_SOURCE",
            ErrorCode::GenericError => "GENERIC_ERROR",
            ErrorCode::VideoTrackNotFound => "VIDEO_TRACK_NOT_FOUND",
            ErrorCode::EncoderNotFound => "ENCODER_NOT_FOUND",
            ErrorCode::DecoderNotFound => "DECODER_NOT_FOUND",
        };
        write!(f, "{}({})", name, self.as_i32())
    }
}

/// Errors raised by ports and adapters
#[derive(Debug, Clone, PartialEq)]
pub enum DomainError {
    /// Invalid arguments provided
    BadArgs(String),
    /// Source or file not found
    FileNotFound(String),
    /// Invalid or unreadable media format
    InvalidFormat(String),
    /// No codec available for the requested format
    CodecUnavailable(String),
    /// Codec returned an unexpected result
    CodecFailure(String),
    /// Image relay failure
    RelayFailure(String),
    /// Container read/write failure
    ContainerFailure(String),
    /// File system failure
    FsFail(String),
    /// Internal error
    InternalError(String),
}

impl fmt::Display for DomainError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DomainError::BadArgs(msg) => write!(f, "Bad arguments: {}", msg),
            DomainError::FileNotFound(msg) => write!(f, "File not found: {}", msg),
            DomainError::InvalidFormat(msg) => write!(f, "Invalid format: {}", msg),
            DomainError::CodecUnavailable(msg) => write!(f, "Codec unavailable: {}", msg),
            DomainError::CodecFailure(msg) => write!(f, "Codec failure: {}", msg),
            DomainError::RelayFailure(msg) => write!(f, "Image relay failure: {}", msg),
            DomainError::ContainerFailure(msg) => write!(f, "Container failure: {}", msg),
            DomainError::FsFail(msg) => write!(f, "File system error: {}", msg),
            DomainError::InternalError(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl std::error::Error for DomainError {}

impl From<std::io::Error> for DomainError {
    fn from(err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::NotFound {
            DomainError::FileNotFound(err.to_string())
        } else {
            DomainError::FsFail(err.to_string())
        }
    }
}
