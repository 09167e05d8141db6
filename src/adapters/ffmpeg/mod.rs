// FFmpeg adapter - Real media backend built on libav (cargo feature `ffmpeg`)
//
// Codec parameters never travel through `MediaFormat` entries directly. The
// demuxer and the encoder register them with the shared backend and publish
// the registry key under `keys::NATIVE_HANDLE`; the muxer and the decoder
// look them up again.

mod codecs;
mod demuxer;
mod muxer;
mod probe;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use ffmpeg_next as ffmpeg;
use ffmpeg_next::{codec, media, Rational};
use parking_lot::Mutex;
use tracing::debug;

use crate::adapters::fs_local::FsLocalAdapter;
use crate::domain::errors::DomainError;
use crate::domain::model::{keys, MediaFormat, MediaSource};
use crate::ports::MediaPorts;

pub use codecs::FfmpegCodecs;
pub use demuxer::{FfmpegDemuxer, FfmpegDemuxers};
pub use muxer::{FfmpegMuxer, FfmpegMuxers};
pub use probe::FfmpegProbe;

/// Microsecond time base used for every timestamp crossing the ports
pub(crate) const MICROS: Rational = Rational(1, 1_000_000);

struct NativeParameters {
    parameters: codec::Parameters,
    time_base: Rational,
}

// SAFETY: the registry owns private copies of the parameters and only hands
// out clones while holding its lock.
unsafe impl Send for NativeParameters {}

/// Shared libav state: library init plus the codec parameter registry
pub struct FfmpegBackend {
    registry: Mutex<HashMap<i64, NativeParameters>>,
    next_handle: AtomicI64,
}

impl FfmpegBackend {
    pub fn new() -> Result<Arc<Self>, DomainError> {
        ffmpeg::init().map_err(|e| {
            DomainError::InternalError(format!("Failed to initialize libav: {}", e))
        })?;
        Ok(Arc::new(Self {
            registry: Mutex::new(HashMap::new()),
            next_handle: AtomicI64::new(1),
        }))
    }

    /// Keep a copy of `parameters` and return its handle
    pub(crate) fn register(&self, parameters: &codec::Parameters, time_base: Rational) -> i64 {
        let handle = self.next_handle.fetch_add(1, Ordering::SeqCst);
        self.registry.lock().insert(
            handle,
            NativeParameters {
                parameters: parameters.clone(),
                time_base,
            },
        );
        handle
    }

    pub(crate) fn lookup(&self, format: &MediaFormat) -> Result<(codec::Parameters, Rational), DomainError> {
        let handle = format.get_int(keys::NATIVE_HANDLE).ok_or_else(|| {
            DomainError::InvalidFormat(format!("{} carries no libav parameters", format.mime))
        })?;
        let registry = self.registry.lock();
        let native = registry.get(&handle).ok_or_else(|| {
            DomainError::InvalidFormat(format!("libav parameters {} were released", handle))
        })?;
        Ok((native.parameters.clone(), native.time_base))
    }

    pub(crate) fn forget(&self, handle: i64) {
        if self.registry.lock().remove(&handle).is_some() {
            debug!("released libav parameters {}", handle);
        }
    }
}

/// Ports backed by libav, with plain file access for passthrough copies
pub fn ffmpeg_ports() -> Result<MediaPorts, DomainError> {
    let backend = FfmpegBackend::new()?;
    Ok(MediaPorts {
        metadata: Arc::new(FfmpegProbe::new()),
        demuxers: Arc::new(FfmpegDemuxers::new(Arc::clone(&backend))),
        muxers: Arc::new(FfmpegMuxers::new(Arc::clone(&backend))),
        codecs: Arc::new(FfmpegCodecs::new(backend)),
        streams: Arc::new(FsLocalAdapter::new()),
    })
}

fn local_path(source: &MediaSource) -> Result<PathBuf, DomainError> {
    FsLocalAdapter::resolve(source)
}

pub(crate) fn container_error(what: &str, error: ffmpeg::Error) -> DomainError {
    DomainError::ContainerFailure(format!("{}: {}", what, error))
}

pub(crate) fn codec_error(what: &str, error: ffmpeg::Error) -> DomainError {
    DomainError::CodecFailure(format!("{}: {}", what, error))
}

/// Mime type for a libav codec id
pub(crate) fn mime_for(id: codec::Id, medium: media::Type) -> String {
    let known = match id {
        codec::Id::H264 => Some("video/avc"),
        codec::Id::HEVC => Some("video/hevc"),
        codec::Id::VP8 => Some("video/x-vnd.on2.vp8"),
        codec::Id::VP9 => Some("video/x-vnd.on2.vp9"),
        codec::Id::AV1 => Some("video/av01"),
        codec::Id::MPEG4 => Some("video/mp4v-es"),
        codec::Id::AAC => Some("audio/mp4a-latm"),
        codec::Id::OPUS => Some("audio/opus"),
        codec::Id::MP3 => Some("audio/mpeg"),
        codec::Id::VORBIS => Some("audio/vorbis"),
        _ => None,
    };
    match known {
        Some(mime) => mime.to_string(),
        None => {
            let prefix = match medium {
                media::Type::Video => "video",
                media::Type::Audio => "audio",
                _ => "application",
            };
            format!("{}/x-libav-{}", prefix, format!("{:?}", id).to_lowercase())
        }
    }
}

/// Encoder codec id for an output mime type
pub(crate) fn encoder_id_for(mime: &str) -> Option<codec::Id> {
    match mime {
        "video/avc" => Some(codec::Id::H264),
        "video/hevc" => Some(codec::Id::HEVC),
        "video/x-vnd.on2.vp8" => Some(codec::Id::VP8),
        "video/x-vnd.on2.vp9" => Some(codec::Id::VP9),
        "video/av01" => Some(codec::Id::AV1),
        "video/mp4v-es" => Some(codec::Id::MPEG4),
        _ => None,
    }
}

/// Rescale a timestamp between time bases without overflowing
pub(crate) fn rescale(value: i64, from: Rational, to: Rational) -> i64 {
    let numerator = value as i128 * from.numerator() as i128 * to.denominator() as i128;
    let denominator = from.denominator() as i128 * to.numerator() as i128;
    if denominator == 0 {
        return value;
    }
    (numerator / denominator) as i64
}
