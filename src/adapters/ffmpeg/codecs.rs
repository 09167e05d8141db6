// Codecs and the image relay over libav
//
// libav's send/receive codec API is exposed through the buffer-queue model the
// engine drives. Decoded frames travel decoder -> decoder surface (scaling to
// the encoder geometry) -> encoder surface -> encoder through one shared relay.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use ffmpeg_next as ffmpeg;
use ffmpeg_next::format::Pixel;
use ffmpeg_next::software::scaling;
use ffmpeg_next::{codec, frame, Packet, Rational};
use parking_lot::Mutex;
use tracing::{debug, trace};

use super::{codec_error, encoder_id_for, FfmpegBackend, MICROS};
use crate::domain::errors::DomainError;
use crate::domain::model::*;
use crate::ports::*;

/// Size of the single decoder input slot
const INPUT_SLOT_SIZE: usize = 8 << 20;

fn would_block(error: &ffmpeg::Error) -> bool {
    matches!(error, ffmpeg::Error::Other { errno } if *errno == ffmpeg::util::error::EAGAIN)
}

struct Scaler {
    context: scaling::Context,
    source: (Pixel, u32, u32),
}

/// Frames in flight between the codecs
struct Relay {
    target: (u32, u32),
    rendered: VecDeque<frame::Video>,
    current: Option<frame::Video>,
    drawn: Option<frame::Video>,
    encoder_input: VecDeque<frame::Video>,
    input_eos: bool,
    scaler: Option<Scaler>,
}

// SAFETY: frames and the scaler are owned by the relay and only reached
// through its mutex.
unsafe impl Send for Relay {}

type SharedRelay = Mutex<Relay>;

impl Relay {
    fn new(width: u32, height: u32) -> Self {
        Self {
            target: (width, height),
            rendered: VecDeque::new(),
            current: None,
            drawn: None,
            encoder_input: VecDeque::new(),
            input_eos: false,
            scaler: None,
        }
    }

    fn scale(&mut self, source: &frame::Video) -> Result<frame::Video, DomainError> {
        let key = (source.format(), source.width(), source.height());
        let (width, height) = self.target;
        let stale = self.scaler.as_ref().map(|scaler| scaler.source != key).unwrap_or(true);
        if stale {
            let context = scaling::Context::get(
                key.0,
                key.1,
                key.2,
                Pixel::YUV420P,
                width,
                height,
                scaling::Flags::BILINEAR,
            )
            .map_err(|e| DomainError::RelayFailure(format!("scaler setup failed: {}", e)))?;
            self.scaler = Some(Scaler { context, source: key });
        }

        let scaler = self
            .scaler
            .as_mut()
            .ok_or_else(|| DomainError::RelayFailure("scaler missing".to_string()))?;
        let mut scaled = frame::Video::empty();
        scaler
            .context
            .run(source, &mut scaled)
            .map_err(|e| DomainError::RelayFailure(format!("scaling failed: {}", e)))?;
        Ok(scaled)
    }
}

fn relay_of(handle: SurfaceHandle) -> Result<Arc<SharedRelay>, DomainError> {
    handle
        .downcast::<SharedRelay>()
        .ok_or_else(|| DomainError::RelayFailure("surface does not belong to the libav backend".to_string()))
}

/// Configure and open an encoder for `format` at the given geometry
fn open_encoder(
    encoder_codec: ffmpeg::codec::Codec,
    format: &MediaFormat,
    width: u32,
    height: u32,
) -> Result<ffmpeg::encoder::video::Encoder, ffmpeg::Error> {
    let mut video = codec::context::Context::new_with_codec(encoder_codec).encoder().video()?;

    let fps = format.get_int(keys::FRAME_RATE).unwrap_or(30).max(1);
    let interval = format.get_int(keys::I_FRAME_INTERVAL).unwrap_or(1).max(1);
    video.set_width(width);
    video.set_height(height);
    video.set_format(Pixel::YUV420P);
    video.set_time_base(MICROS);
    video.set_frame_rate(Some(Rational(fps as i32, 1)));
    video.set_gop((fps * interval) as u32);
    video.set_max_b_frames(0);
    if let Some(bitrate) = format.get_int(keys::BIT_RATE) {
        video.set_bit_rate(bitrate.max(0) as usize);
    }
    video.set_flags(codec::Flags::GLOBAL_HEADER);
    video.open_as(encoder_codec)
}

/// Codec provider backed by libav decoders and encoders
pub struct FfmpegCodecs {
    backend: Arc<FfmpegBackend>,
}

impl FfmpegCodecs {
    pub fn new(backend: Arc<FfmpegBackend>) -> Self {
        Self { backend }
    }
}

impl CodecProvider for FfmpegCodecs {
    fn create_encoder(&self, format: &MediaFormat) -> Result<Box<dyn MediaCodec>, DomainError> {
        let id = encoder_id_for(&format.mime)
            .ok_or_else(|| DomainError::CodecUnavailable(format!("no encoder for {}", format.mime)))?;
        let codec = ffmpeg::encoder::find(id)
            .ok_or_else(|| DomainError::CodecUnavailable(format!("libav has no {:?} encoder", id)))?;
        let (width, height) = match (format.get_int(keys::WIDTH), format.get_int(keys::HEIGHT)) {
            (Some(width), Some(height)) if width > 0 && height > 0 => (width as u32, height as u32),
            _ => {
                return Err(DomainError::InvalidFormat(format!(
                    "encoder format without dimensions: {}",
                    format
                )))
            }
        };
        debug!("creating {} encoder {}x{}", codec.name(), width, height);

        // Configure failures are capability failures, like a missing encoder
        let encoder = open_encoder(codec, format, width, height)
            .map_err(|e| DomainError::CodecUnavailable(format!("{} rejected {}: {}", codec.name(), format, e)))?;
        let handle = self.backend.register(&codec::Parameters::from(&encoder), MICROS);

        Ok(Box::new(FfmpegEncoder {
            backend: Arc::clone(&self.backend),
            name: format!("libav.{}", codec.name()),
            format: format.clone(),
            width,
            height,
            encoder: Some(encoder),
            started: false,
            relay: None,
            handle: Some(handle),
            announced: false,
            eof_sent: false,
            finished: false,
            held: HashMap::new(),
            next_index: 0,
        }))
    }

    fn create_output_surface(
        &self,
        input: &dyn EncoderSurface,
    ) -> Result<Box<dyn DecoderSurface>, DomainError> {
        Ok(Box::new(FfmpegDecoderSurface {
            relay: relay_of(input.handle())?,
        }))
    }

    fn create_decoder(
        &self,
        format: &MediaFormat,
        surface: &dyn DecoderSurface,
    ) -> Result<Box<dyn MediaCodec>, DomainError> {
        if !format.is_video() {
            return Err(DomainError::CodecUnavailable(format!("{} is not video", format.mime)));
        }
        let relay = relay_of(surface.handle())?;
        let (parameters, _) = self.backend.lookup(format)?;
        let decoder = codec::context::Context::from_parameters(parameters)
            .and_then(|context| context.decoder().video())
            .map_err(|e| DomainError::CodecUnavailable(format!("{}: {}", format.mime, e)))?;
        debug!("creating {:?} decoder", decoder.id());
        Ok(Box::new(FfmpegDecoder {
            name: format!("libav.{:?}", decoder.id()).to_lowercase(),
            decoder,
            relay,
            slot: vec![0; INPUT_SLOT_SIZE],
            slot_free: true,
            outputs: VecDeque::new(),
            held: HashMap::new(),
            next_index: 0,
        }))
    }
}

/// Video decoder rendering into the relay
struct FfmpegDecoder {
    name: String,
    decoder: ffmpeg::decoder::Video,
    relay: Arc<SharedRelay>,
    slot: Vec<u8>,
    slot_free: bool,
    outputs: VecDeque<(BufferInfo, Option<frame::Video>)>,
    held: HashMap<usize, frame::Video>,
    next_index: usize,
}

// SAFETY: the decoder context and its frames are owned by this value.
unsafe impl Send for FfmpegDecoder {}

impl FfmpegDecoder {
    /// Move every frame the decoder has ready into the output queue
    fn drain(&mut self) -> Result<(), DomainError> {
        loop {
            let mut decoded = frame::Video::empty();
            match self.decoder.receive_frame(&mut decoded) {
                Ok(()) => {
                    let pts = decoded.timestamp().or_else(|| decoded.pts()).unwrap_or(0);
                    let size = decoded.data(0).len().max(1);
                    self.outputs
                        .push_back((BufferInfo::new(0, size, pts, BufferFlags::NONE), Some(decoded)));
                }
                Err(ffmpeg::Error::Eof) => {
                    self.outputs
                        .push_back((BufferInfo::new(0, 0, 0, BufferFlags::END_OF_STREAM), None));
                    return Ok(());
                }
                Err(e) if would_block(&e) => return Ok(()),
                Err(e) => return Err(codec_error("decode failed", e)),
            }
        }
    }
}

impl MediaCodec for FfmpegDecoder {
    fn name(&self) -> &str {
        &self.name
    }

    fn start(&mut self) -> Result<(), DomainError> {
        Ok(())
    }

    fn dequeue_input_buffer(&mut self, _timeout_us: u64) -> Result<Option<usize>, DomainError> {
        if self.slot_free {
            self.slot_free = false;
            Ok(Some(0))
        } else {
            Ok(None)
        }
    }

    fn input_buffer(&mut self, index: usize) -> Result<&mut [u8], DomainError> {
        if index != 0 {
            return Err(DomainError::CodecFailure(format!("no input slot {}", index)));
        }
        Ok(&mut self.slot)
    }

    fn queue_input_buffer(
        &mut self,
        index: usize,
        size: usize,
        presentation_time_us: i64,
        flags: BufferFlags,
    ) -> Result<(), DomainError> {
        if index != 0 || size > self.slot.len() {
            return Err(DomainError::CodecFailure(format!(
                "bad input slot {} with {} bytes",
                index, size
            )));
        }
        self.slot_free = true;
        self.drain()?;

        if flags.contains(BufferFlags::END_OF_STREAM) {
            self.decoder
                .send_eof()
                .map_err(|e| codec_error("decoder end of stream failed", e))?;
        } else {
            let mut packet = Packet::copy(&self.slot[..size]);
            packet.set_pts(Some(presentation_time_us));
            self.decoder
                .send_packet(&packet)
                .map_err(|e| codec_error("decoder rejected packet", e))?;
        }
        self.drain()
    }

    fn dequeue_output_buffer(&mut self, _timeout_us: u64) -> Result<OutputEvent, DomainError> {
        if self.outputs.is_empty() {
            self.drain()?;
        }
        match self.outputs.pop_front() {
            Some((info, decoded)) => {
                let index = self.next_index;
                self.next_index += 1;
                if let Some(decoded) = decoded {
                    self.held.insert(index, decoded);
                }
                Ok(OutputEvent::Buffer { index, info })
            }
            None => Ok(OutputEvent::TryAgainLater),
        }
    }

    fn output_buffer(&self, index: usize) -> Result<&[u8], DomainError> {
        Ok(self.held.get(&index).map(|decoded| decoded.data(0)).unwrap_or(&[]))
    }

    fn output_format(&self) -> Result<MediaFormat, DomainError> {
        Ok(MediaFormat::video("video/raw", self.decoder.width(), self.decoder.height()))
    }

    fn release_output_buffer(&mut self, index: usize, render: bool) -> Result<(), DomainError> {
        if let Some(decoded) = self.held.remove(&index) {
            if render {
                self.relay.lock().rendered.push_back(decoded);
            }
        }
        Ok(())
    }

    fn signal_end_of_input_stream(&mut self) -> Result<(), DomainError> {
        Err(DomainError::CodecFailure(
            "decoders take end of stream through an input buffer".to_string(),
        ))
    }

    fn stop(&mut self) {
        self.decoder.flush();
    }

    fn release(&mut self) {
        self.outputs.clear();
        self.held.clear();
    }
}

/// Video encoder fed from the relay
struct FfmpegEncoder {
    backend: Arc<FfmpegBackend>,
    name: String,
    format: MediaFormat,
    width: u32,
    height: u32,
    /// Opened at creation, dropped on release
    encoder: Option<ffmpeg::encoder::video::Encoder>,
    started: bool,
    relay: Option<Arc<SharedRelay>>,
    handle: Option<i64>,
    announced: bool,
    eof_sent: bool,
    finished: bool,
    held: HashMap<usize, Packet>,
    next_index: usize,
}

// SAFETY: the encoder context and its packets are owned by this value.
unsafe impl Send for FfmpegEncoder {}

impl FfmpegEncoder {
    fn surface_only(&self) -> DomainError {
        DomainError::CodecFailure(format!("{} only accepts surface input", self.name))
    }

    fn next_index(&mut self) -> usize {
        let index = self.next_index;
        self.next_index += 1;
        index
    }
}

impl Drop for FfmpegEncoder {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.backend.forget(handle);
        }
    }
}

impl MediaCodec for FfmpegEncoder {
    fn name(&self) -> &str {
        &self.name
    }

    fn start(&mut self) -> Result<(), DomainError> {
        if self.encoder.is_none() {
            return Err(DomainError::CodecFailure(format!("{} was released", self.name)));
        }
        self.started = true;
        debug!("{} started", self.name);
        Ok(())
    }

    fn dequeue_input_buffer(&mut self, _timeout_us: u64) -> Result<Option<usize>, DomainError> {
        Err(self.surface_only())
    }

    fn input_buffer(&mut self, _index: usize) -> Result<&mut [u8], DomainError> {
        Err(self.surface_only())
    }

    fn queue_input_buffer(
        &mut self,
        _index: usize,
        _size: usize,
        _presentation_time_us: i64,
        _flags: BufferFlags,
    ) -> Result<(), DomainError> {
        Err(self.surface_only())
    }

    fn dequeue_output_buffer(&mut self, _timeout_us: u64) -> Result<OutputEvent, DomainError> {
        if !self.started {
            return Err(DomainError::CodecFailure("encoder not started".to_string()));
        }
        let encoder = self
            .encoder
            .as_mut()
            .ok_or_else(|| DomainError::CodecFailure("encoder was released".to_string()))?;
        if !self.announced {
            self.announced = true;
            return Ok(OutputEvent::FormatChanged);
        }
        if self.finished {
            return Ok(OutputEvent::TryAgainLater);
        }

        if let Some(relay) = &self.relay {
            loop {
                let next = relay.lock().encoder_input.pop_front();
                let Some(input) = next else { break };
                match encoder.send_frame(&input) {
                    Ok(()) => trace!("encoder took frame {:?}", input.pts()),
                    Err(e) if would_block(&e) => {
                        relay.lock().encoder_input.push_front(input);
                        break;
                    }
                    Err(e) => return Err(codec_error("encoder rejected frame", e)),
                }
            }
            let drained = {
                let relay = relay.lock();
                relay.input_eos && relay.encoder_input.is_empty()
            };
            if drained && !self.eof_sent {
                encoder
                    .send_eof()
                    .map_err(|e| codec_error("encoder end of stream failed", e))?;
                self.eof_sent = true;
            }
        }

        let mut packet = Packet::empty();
        match encoder.receive_packet(&mut packet) {
            Ok(()) => {
                let flags = if packet.is_key() {
                    BufferFlags::KEY_FRAME
                } else {
                    BufferFlags::NONE
                };
                let info = BufferInfo::new(0, packet.size(), packet.pts().unwrap_or(0), flags);
                let index = self.next_index();
                self.held.insert(index, packet);
                Ok(OutputEvent::Buffer { index, info })
            }
            Err(ffmpeg::Error::Eof) => {
                self.finished = true;
                let index = self.next_index();
                Ok(OutputEvent::Buffer {
                    index,
                    info: BufferInfo::new(0, 0, 0, BufferFlags::END_OF_STREAM),
                })
            }
            Err(e) if would_block(&e) => Ok(OutputEvent::TryAgainLater),
            Err(e) => Err(codec_error("encode failed", e)),
        }
    }

    fn output_buffer(&self, index: usize) -> Result<&[u8], DomainError> {
        Ok(self
            .held
            .get(&index)
            .and_then(|packet| packet.data())
            .unwrap_or(&[]))
    }

    fn output_format(&self) -> Result<MediaFormat, DomainError> {
        let handle = self
            .handle
            .ok_or_else(|| DomainError::CodecFailure("encoder was released".to_string()))?;
        let mut format = MediaFormat::video(self.format.mime.clone(), self.width, self.height)
            .with_int(keys::NATIVE_HANDLE, handle);
        format.copy_from(&self.format, keys::BIT_RATE);
        format.copy_from(&self.format, keys::FRAME_RATE);
        Ok(format)
    }

    fn release_output_buffer(&mut self, index: usize, _render: bool) -> Result<(), DomainError> {
        self.held.remove(&index);
        Ok(())
    }

    fn create_input_surface(&mut self) -> Result<Box<dyn EncoderSurface>, DomainError> {
        if self.relay.is_some() {
            return Err(DomainError::CodecFailure(format!(
                "{} already has an input surface",
                self.name
            )));
        }
        let relay = Arc::new(Mutex::new(Relay::new(self.width, self.height)));
        self.relay = Some(Arc::clone(&relay));
        Ok(Box::new(FfmpegEncoderSurface {
            relay,
            presentation_ns: 0,
            current: false,
        }))
    }

    fn signal_end_of_input_stream(&mut self) -> Result<(), DomainError> {
        match &self.relay {
            Some(relay) => {
                relay.lock().input_eos = true;
                Ok(())
            }
            None => Err(DomainError::CodecFailure(format!("{} has no input surface", self.name))),
        }
    }

    fn stop(&mut self) {
        self.started = false;
        self.held.clear();
    }

    fn release(&mut self) {
        self.encoder = None;
        if let Some(handle) = self.handle.take() {
            self.backend.forget(handle);
        }
    }
}

/// Decoder end of the relay: scales rendered frames to the encoder geometry
struct FfmpegDecoderSurface {
    relay: Arc<SharedRelay>,
}

impl DecoderSurface for FfmpegDecoderSurface {
    fn handle(&self) -> SurfaceHandle {
        SurfaceHandle::new(Arc::clone(&self.relay))
    }

    fn await_new_image(&mut self) -> Result<(), DomainError> {
        let mut relay = self.relay.lock();
        let rendered = relay
            .rendered
            .pop_front()
            .ok_or_else(|| DomainError::RelayFailure("no frame was rendered".to_string()))?;
        relay.current = Some(rendered);
        Ok(())
    }

    // libav frames are stored top-down, so there is nothing to invert
    fn draw_image(&mut self, _invert: bool) -> Result<(), DomainError> {
        let mut relay = self.relay.lock();
        let source = relay
            .current
            .take()
            .ok_or_else(|| DomainError::RelayFailure("no frame to draw".to_string()))?;
        let scaled = relay.scale(&source)?;
        relay.drawn = Some(scaled);
        Ok(())
    }

    fn release(&mut self) {
        let mut relay = self.relay.lock();
        relay.rendered.clear();
        relay.current = None;
        relay.scaler = None;
    }
}

/// Encoder end of the relay: stamps drawn frames and queues them for encoding
struct FfmpegEncoderSurface {
    relay: Arc<SharedRelay>,
    presentation_ns: i64,
    current: bool,
}

impl EncoderSurface for FfmpegEncoderSurface {
    fn handle(&self) -> SurfaceHandle {
        SurfaceHandle::new(Arc::clone(&self.relay))
    }

    fn make_current(&mut self) -> Result<(), DomainError> {
        self.current = true;
        Ok(())
    }

    fn set_presentation_time(&mut self, nanos: i64) -> Result<(), DomainError> {
        self.presentation_ns = nanos;
        Ok(())
    }

    fn swap_buffers(&mut self) -> Result<(), DomainError> {
        if !self.current {
            return Err(DomainError::RelayFailure("surface is not current".to_string()));
        }
        let mut relay = self.relay.lock();
        let mut drawn = relay
            .drawn
            .take()
            .ok_or_else(|| DomainError::RelayFailure("nothing was drawn".to_string()))?;
        drawn.set_pts(Some(self.presentation_ns / 1000));
        relay.encoder_input.push_back(drawn);
        Ok(())
    }

    fn release(&mut self) {
        self.current = false;
        self.relay.lock().encoder_input.clear();
    }
}
