// Demuxer over a libav input context

use std::collections::BTreeSet;
use std::sync::Arc;

use ffmpeg_next as ffmpeg;
use ffmpeg_next::{media, Packet, Rational};
use tracing::{debug, warn};

use super::{container_error, local_path, mime_for, rescale, FfmpegBackend, MICROS};
use crate::domain::errors::DomainError;
use crate::domain::model::*;
use crate::ports::{Demuxer, DemuxerFactory};

/// Opens sources as libav input contexts
pub struct FfmpegDemuxers {
    backend: Arc<FfmpegBackend>,
}

impl FfmpegDemuxers {
    pub fn new(backend: Arc<FfmpegBackend>) -> Self {
        Self { backend }
    }
}

impl DemuxerFactory for FfmpegDemuxers {
    fn open(&self, source: &MediaSource) -> Result<Box<dyn Demuxer>, DomainError> {
        let path = local_path(source)?;
        let input = ffmpeg::format::input(&path)
            .map_err(|e| DomainError::FileNotFound(format!("{}: {}", path.display(), e)))?;
        debug!("opened {} with {} streams", path.display(), input.nb_streams());
        Ok(Box::new(FfmpegDemuxer::new(Arc::clone(&self.backend), input)))
    }
}

/// Packet reader with a one-packet lookahead over the selected streams
pub struct FfmpegDemuxer {
    backend: Arc<FfmpegBackend>,
    input: ffmpeg::format::context::Input,
    formats: Vec<MediaFormat>,
    time_bases: Vec<Rational>,
    handles: Vec<i64>,
    selected: BTreeSet<usize>,
    current: Option<Packet>,
    exhausted: bool,
}

// SAFETY: the input context and its packets are owned exclusively by this
// demuxer and only touched through `&mut self` or plain reads.
unsafe impl Send for FfmpegDemuxer {}

impl FfmpegDemuxer {
    fn new(backend: Arc<FfmpegBackend>, input: ffmpeg::format::context::Input) -> Self {
        let mut formats = Vec::new();
        let mut time_bases = Vec::new();
        let mut handles = Vec::new();
        for stream in input.streams() {
            let handle = backend.register(&stream.parameters(), stream.time_base());
            formats.push(Self::stream_format(&stream, handle));
            time_bases.push(stream.time_base());
            handles.push(handle);
        }
        Self {
            backend,
            input,
            formats,
            time_bases,
            handles,
            selected: BTreeSet::new(),
            current: None,
            exhausted: false,
        }
    }

    fn stream_format(stream: &ffmpeg::Stream, handle: i64) -> MediaFormat {
        let parameters = stream.parameters();
        let medium = parameters.medium();
        let mut format = MediaFormat::new(mime_for(parameters.id(), medium));
        format.set_int(keys::NATIVE_HANDLE, handle);

        // SAFETY: `parameters` borrows the live stream's codec parameters
        let (width, height, sample_rate, channels, bit_rate) = unsafe {
            let raw = &*parameters.as_ptr();
            (raw.width, raw.height, raw.sample_rate, raw.ch_layout.nb_channels, raw.bit_rate)
        };
        match medium {
            media::Type::Video => {
                format.set_int(keys::WIDTH, width as i64);
                format.set_int(keys::HEIGHT, height as i64);
                let rate = stream.avg_frame_rate();
                if rate.denominator() > 0 && rate.numerator() > 0 {
                    let fps = (rate.numerator() as f64 / rate.denominator() as f64).round();
                    format.set_int(keys::FRAME_RATE, fps as i64);
                }
            }
            media::Type::Audio => {
                format.set_int(keys::SAMPLE_RATE, sample_rate as i64);
                format.set_int(keys::CHANNEL_COUNT, channels as i64);
            }
            _ => {}
        }
        if bit_rate > 0 {
            format.set_int(keys::BIT_RATE, bit_rate);
        }
        if stream.duration() > 0 {
            format.set_int(
                keys::DURATION_US,
                rescale(stream.duration(), stream.time_base(), MICROS),
            );
        }
        format
    }

    /// Read ahead to the next packet of a selected stream
    fn fill(&mut self) {
        while self.current.is_none() && !self.exhausted && !self.selected.is_empty() {
            let mut packet = Packet::empty();
            match packet.read(&mut self.input) {
                Ok(()) => {
                    if self.selected.contains(&packet.stream()) {
                        self.current = Some(packet);
                    }
                }
                Err(ffmpeg::Error::Eof) => self.exhausted = true,
                Err(e) => {
                    warn!("stopping demux after read error: {}", e);
                    self.exhausted = true;
                }
            }
        }
    }

    fn check_index(&self, index: usize) -> Result<(), DomainError> {
        if index < self.formats.len() {
            Ok(())
        } else {
            Err(DomainError::BadArgs(format!(
                "track {} out of range ({} tracks)",
                index,
                self.formats.len()
            )))
        }
    }
}

impl Drop for FfmpegDemuxer {
    fn drop(&mut self) {
        for handle in &self.handles {
            self.backend.forget(*handle);
        }
    }
}

impl Demuxer for FfmpegDemuxer {
    fn track_count(&self) -> usize {
        self.formats.len()
    }

    fn track_format(&self, index: usize) -> Result<MediaFormat, DomainError> {
        self.check_index(index)?;
        Ok(self.formats[index].clone())
    }

    fn select_track(&mut self, index: usize) -> Result<(), DomainError> {
        self.check_index(index)?;
        self.selected.insert(index);
        self.fill();
        Ok(())
    }

    fn unselect_track(&mut self, index: usize) {
        self.selected.remove(&index);
        if self.current.as_ref().map(|packet| packet.stream()) == Some(index) {
            self.current = None;
            self.fill();
        }
    }

    fn seek_to(&mut self, time_us: i64, mode: SeekMode) -> Result<(), DomainError> {
        // Input-level seeks use AV_TIME_BASE, which is microseconds
        let result = match mode {
            SeekMode::PreviousSync => self.input.seek(time_us, ..time_us.saturating_add(1)),
            SeekMode::NextSync | SeekMode::ClosestSync => self.input.seek(time_us, time_us..),
        };
        result.map_err(|e| container_error("seek failed", e))?;
        self.current = None;
        self.exhausted = false;
        self.fill();
        Ok(())
    }

    fn sample_track_index(&self) -> Option<usize> {
        self.current.as_ref().map(|packet| packet.stream())
    }

    fn sample_time_us(&self) -> i64 {
        match &self.current {
            Some(packet) => match packet.pts().or_else(|| packet.dts()) {
                Some(ts) => rescale(ts, self.time_bases[packet.stream()], MICROS),
                None => -1,
            },
            None => -1,
        }
    }

    fn sample_size(&self) -> Option<usize> {
        self.current.as_ref().map(|packet| packet.size())
    }

    fn read_sample_data(&mut self, buffer: &mut [u8]) -> Result<Option<usize>, DomainError> {
        let packet = match &self.current {
            Some(packet) => packet,
            None => return Ok(None),
        };
        let data = packet.data().unwrap_or(&[]);
        if data.len() > buffer.len() {
            return Err(DomainError::ContainerFailure(format!(
                "sample of {} bytes does not fit a {} byte buffer",
                data.len(),
                buffer.len()
            )));
        }
        buffer[..data.len()].copy_from_slice(data);
        Ok(Some(data.len()))
    }

    fn advance(&mut self) -> bool {
        self.current = None;
        self.fill();
        self.current.is_some()
    }
}
