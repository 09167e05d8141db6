// Adapters - External system implementations

pub mod fs_local;
pub mod memory;
pub mod toml_config;

#[cfg(feature = "ffmpeg")]
pub mod ffmpeg;

// Re-export adapters
pub use fs_local::FsLocalAdapter;
pub use memory::{MemoryCodecs, MemoryLibrary, MemoryMedia, MemoryMuxers};
pub use toml_config::TomlConfigAdapter;

use crate::domain::errors::DomainError;
use crate::ports::MediaPorts;

/// Ports of the real media backend this build was compiled with
#[cfg(feature = "ffmpeg")]
pub fn default_ports() -> Result<MediaPorts, DomainError> {
    ffmpeg::ffmpeg_ports()
}

/// Ports of the real media backend this build was compiled with
#[cfg(not(feature = "ffmpeg"))]
pub fn default_ports() -> Result<MediaPorts, DomainError> {
    Err(DomainError::CodecUnavailable(
        "built without a media backend; rebuild with `--features ffmpeg`".to_string(),
    ))
}
