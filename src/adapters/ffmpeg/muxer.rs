// Muxer over a libav output context
//
// libav needs every stream before the header is written, while tracks arrive
// one after the other. Samples are therefore held until `finish` and written
// interleaved by time.

use std::path::PathBuf;
use std::sync::Arc;

use ffmpeg_next as ffmpeg;
use ffmpeg_next::{codec, packet, Dictionary, Packet, Rational};
use tracing::{debug, info};

use super::{container_error, rescale, FfmpegBackend, MICROS};
use crate::domain::errors::DomainError;
use crate::domain::model::*;
use crate::ports::{MuxTarget, Muxer, MuxerFactory};

/// Creates libav output contexts
pub struct FfmpegMuxers {
    backend: Arc<FfmpegBackend>,
}

impl FfmpegMuxers {
    pub fn new(backend: Arc<FfmpegBackend>) -> Self {
        Self { backend }
    }
}

impl MuxerFactory for FfmpegMuxers {
    fn create(&self, target: &MuxTarget) -> Result<Box<dyn Muxer>, DomainError> {
        Ok(Box::new(FfmpegMuxer::create(Arc::clone(&self.backend), target)?))
    }
}

struct OutputTrack {
    stream_index: usize,
    time_base: Rational,
    is_audio: bool,
}

struct PendingSample {
    time_us: i64,
    track: usize,
    packet: Packet,
}

/// Container writer buffering samples until every track is known
pub struct FfmpegMuxer {
    backend: Arc<FfmpegBackend>,
    path: PathBuf,
    output: ffmpeg::format::context::Output,
    rotation: u32,
    tracks: Vec<OutputTrack>,
    pending: Vec<PendingSample>,
}

// SAFETY: the output context and buffered packets are owned exclusively by
// this muxer.
unsafe impl Send for FfmpegMuxer {}

impl FfmpegMuxer {
    pub fn create(backend: Arc<FfmpegBackend>, target: &MuxTarget) -> Result<Self, DomainError> {
        let output = ffmpeg::format::output(&target.path).map_err(|e| {
            DomainError::ContainerFailure(format!("Failed to create {}: {}", target.path.display(), e))
        })?;
        Ok(Self {
            backend,
            path: target.path.clone(),
            output,
            rotation: target.rotation,
            tracks: Vec::new(),
            pending: Vec::new(),
        })
    }

    fn write_all(&mut self) -> Result<(), DomainError> {
        self.output
            .write_header()
            .map_err(|e| container_error("write header failed", e))?;

        let mut pending = std::mem::take(&mut self.pending);
        pending.sort_by_key(|sample| (sample.time_us, sample.track));
        let count = pending.len();
        for sample in pending {
            let track = &self.tracks[sample.track];
            let stream_time_base = self
                .output
                .stream(track.stream_index)
                .map(|stream| stream.time_base())
                .unwrap_or(track.time_base);
            let mut packet = sample.packet;
            packet.rescale_ts(track.time_base, stream_time_base);
            packet
                .write_interleaved(&mut self.output)
                .map_err(|e| container_error("write sample failed", e))?;
        }

        self.output
            .write_trailer()
            .map_err(|e| container_error("write trailer failed", e))?;
        info!("wrote {} samples to {}", count, self.path.display());
        Ok(())
    }
}

impl Muxer for FfmpegMuxer {
    fn add_track(&mut self, format: &MediaFormat, is_audio: bool) -> Result<usize, DomainError> {
        let (parameters, time_base) = self.backend.lookup(format)?;
        let mut stream = self
            .output
            .add_stream(ffmpeg::encoder::find(codec::Id::None))
            .map_err(|e| container_error("add stream failed", e))?;
        stream.set_parameters(parameters);
        stream.set_time_base(time_base);
        // SAFETY: the stream was just added and is not shared yet
        unsafe {
            (*stream.parameters().as_mut_ptr()).codec_tag = 0;
        }
        if !is_audio && self.rotation != 0 {
            let mut metadata = Dictionary::new();
            metadata.set("rotate", &self.rotation.to_string());
            stream.set_metadata(metadata);
        }

        let stream_index = stream.index();
        self.tracks.push(OutputTrack {
            stream_index,
            time_base,
            is_audio,
        });
        debug!("added {} track {} ({})", if is_audio { "audio" } else { "video" }, stream_index, format.mime);
        Ok(self.tracks.len() - 1)
    }

    fn write_sample_data(
        &mut self,
        track: usize,
        data: &[u8],
        info: &BufferInfo,
        is_audio: bool,
    ) -> Result<(), DomainError> {
        let output_track = self.tracks.get(track).ok_or_else(|| {
            DomainError::ContainerFailure(format!("unknown muxer track {}", track))
        })?;
        if output_track.is_audio != is_audio {
            return Err(DomainError::ContainerFailure(format!(
                "track {} kind mismatch",
                track
            )));
        }

        let timestamp = rescale(info.presentation_time_us, MICROS, output_track.time_base);
        let mut packet = Packet::copy(data);
        packet.set_pts(Some(timestamp));
        packet.set_dts(Some(timestamp));
        packet.set_stream(output_track.stream_index);
        if info.flags.contains(BufferFlags::KEY_FRAME) {
            packet.set_flags(packet::Flags::KEY);
        }
        self.pending.push(PendingSample {
            time_us: info.presentation_time_us,
            track,
            packet,
        });
        Ok(())
    }

    fn finish(self: Box<Self>, discard: bool) -> Result<(), DomainError> {
        let mut muxer = *self;
        if discard {
            debug!("discarding {} samples for {}", muxer.pending.len(), muxer.path.display());
            return Ok(());
        }
        muxer.write_all()
    }
}
