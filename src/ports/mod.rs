// Ports - Interface definitions (contracts)
//
// All ports are synchronous. A job drives them from a single blocking worker,
// so codecs, demuxers and muxers only need to be `Send`.

use std::any::Any;
use std::fmt;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::domain::errors::*;
use crate::domain::model::*;

/// Port for probing source metadata
pub trait MetadataSource: Send + Sync {
    /// Read resolution, rotation, bitrate, duration and mime type
    fn probe(&self, source: &MediaSource) -> Result<VideoMetadata, DomainError>;
}

/// Port for opening a source for per-track sample reads
pub trait DemuxerFactory: Send + Sync {
    fn open(&self, source: &MediaSource) -> Result<Box<dyn Demuxer>, DomainError>;
}

/// Sample reader over the selected tracks of one source
pub trait Demuxer: Send {
    fn track_count(&self) -> usize;

    fn track_format(&self, index: usize) -> Result<MediaFormat, DomainError>;

    /// Include a track in sample iteration
    fn select_track(&mut self, index: usize) -> Result<(), DomainError>;

    fn unselect_track(&mut self, index: usize);

    fn seek_to(&mut self, time_us: i64, mode: SeekMode) -> Result<(), DomainError>;

    /// Track of the current sample, `None` once every selected track is exhausted
    fn sample_track_index(&self) -> Option<usize>;

    /// Presentation time of the current sample in microseconds
    fn sample_time_us(&self) -> i64;

    /// Size in bytes of the current sample
    fn sample_size(&self) -> Option<usize>;

    /// Copy the current sample into `buffer`. Returns `None` at end of stream.
    fn read_sample_data(&mut self, buffer: &mut [u8]) -> Result<Option<usize>, DomainError>;

    /// Move to the next sample; false when none remain
    fn advance(&mut self) -> bool;
}

/// Output container settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MuxTarget {
    pub path: PathBuf,
    /// Display rotation written to the container
    pub rotation: u32,
}

/// Port for creating container writers
pub trait MuxerFactory: Send + Sync {
    fn create(&self, target: &MuxTarget) -> Result<Box<dyn Muxer>, DomainError>;
}

/// Container writer
pub trait Muxer: Send {
    /// Register a track and return its muxer index
    fn add_track(&mut self, format: &MediaFormat, is_audio: bool) -> Result<usize, DomainError>;

    /// Write one coded sample; `data` holds exactly `info.size` bytes
    fn write_sample_data(
        &mut self,
        track: usize,
        data: &[u8],
        info: &BufferInfo,
        is_audio: bool,
    ) -> Result<(), DomainError>;

    /// Finalize the container, or drop everything written when `discard` is set
    fn finish(self: Box<Self>, discard: bool) -> Result<(), DomainError>;
}

/// Result of polling a codec for output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputEvent {
    TryAgainLater,
    FormatChanged,
    BuffersChanged,
    Buffer { index: usize, info: BufferInfo },
}

/// Buffer-queue codec state machine, shared by decoders and encoders
pub trait MediaCodec: Send {
    fn name(&self) -> &str;

    fn start(&mut self) -> Result<(), DomainError>;

    /// Index of a free input slot, `None` when none frees up within the timeout
    fn dequeue_input_buffer(&mut self, timeout_us: u64) -> Result<Option<usize>, DomainError>;

    fn input_buffer(&mut self, index: usize) -> Result<&mut [u8], DomainError>;

    fn queue_input_buffer(
        &mut self,
        index: usize,
        size: usize,
        presentation_time_us: i64,
        flags: BufferFlags,
    ) -> Result<(), DomainError>;

    fn dequeue_output_buffer(&mut self, timeout_us: u64) -> Result<OutputEvent, DomainError>;

    fn output_buffer(&self, index: usize) -> Result<&[u8], DomainError>;

    /// Format of the output stream, valid after `FormatChanged`
    fn output_format(&self) -> Result<MediaFormat, DomainError>;

    /// Return an output slot; with `render` the frame goes to the configured surface
    fn release_output_buffer(&mut self, index: usize, render: bool) -> Result<(), DomainError>;

    /// Surface feeding this encoder; only encoders configured for surface input support it
    fn create_input_surface(&mut self) -> Result<Box<dyn EncoderSurface>, DomainError> {
        Err(DomainError::CodecFailure(format!(
            "{} does not accept surface input",
            self.name()
        )))
    }

    fn signal_end_of_input_stream(&mut self) -> Result<(), DomainError>;

    fn stop(&mut self);

    fn release(&mut self);
}

/// Opaque backend object behind a relay surface
#[derive(Clone)]
pub struct SurfaceHandle(Arc<dyn Any + Send + Sync>);

impl SurfaceHandle {
    pub fn new<T: Any + Send + Sync>(inner: Arc<T>) -> Self {
        SurfaceHandle(inner)
    }

    /// Recover the backend object; fails when surfaces from different backends are mixed
    pub fn downcast<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        Arc::clone(&self.0).downcast::<T>().ok()
    }
}

impl fmt::Debug for SurfaceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SurfaceHandle(..)")
    }
}

/// Decoder-side end of the image relay
pub trait DecoderSurface: Send {
    fn handle(&self) -> SurfaceHandle;

    /// Block until the decoder rendered a frame into the surface
    fn await_new_image(&mut self) -> Result<(), DomainError>;

    /// Draw the latest frame onto the current encoder surface
    fn draw_image(&mut self, invert: bool) -> Result<(), DomainError>;

    fn release(&mut self);
}

/// Encoder-side end of the image relay
pub trait EncoderSurface: Send {
    fn handle(&self) -> SurfaceHandle;

    fn make_current(&mut self) -> Result<(), DomainError>;

    fn set_presentation_time(&mut self, nanos: i64) -> Result<(), DomainError>;

    /// Submit the drawn frame to the encoder
    fn swap_buffers(&mut self) -> Result<(), DomainError>;

    fn release(&mut self);
}

/// Port for codec construction
pub trait CodecProvider: Send + Sync {
    /// Encoder configured for `format`, not yet started.
    /// `CodecUnavailable` when no encoder supports it.
    fn create_encoder(&self, format: &MediaFormat) -> Result<Box<dyn MediaCodec>, DomainError>;

    /// Decoder-side relay surface drawing into `input`
    fn create_output_surface(
        &self,
        input: &dyn EncoderSurface,
    ) -> Result<Box<dyn DecoderSurface>, DomainError>;

    /// Decoder configured for `format` rendering into `surface`, not yet started.
    /// `CodecUnavailable` when no decoder supports it.
    fn create_decoder(
        &self,
        format: &MediaFormat,
        surface: &dyn DecoderSurface,
    ) -> Result<Box<dyn MediaCodec>, DomainError>;
}

/// Port for raw byte access to sources and outputs
pub trait StreamOpener: Send + Sync {
    fn open_read(&self, source: &MediaSource) -> Result<Box<dyn Read + Send>, DomainError>;

    fn open_write(&self, path: &Path) -> Result<Box<dyn Write + Send>, DomainError>;
}

/// Receives job notifications on the dispatcher task
pub trait CompressCallback: Send + Sync {
    fn on_progress(&self, _percent: f32) {}

    fn on_complete(&self, output: &Path);

    fn on_error(&self, code: ErrorCode, message: &str);
}

/// Every port a job needs
#[derive(Clone)]
pub struct MediaPorts {
    pub metadata: Arc<dyn MetadataSource>,
    pub demuxers: Arc<dyn DemuxerFactory>,
    pub muxers: Arc<dyn MuxerFactory>,
    pub codecs: Arc<dyn CodecProvider>,
    pub streams: Arc<dyn StreamOpener>,
}

impl fmt::Debug for MediaPorts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaPorts").finish_non_exhaustive()
    }
}
