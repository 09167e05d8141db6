// Memory codecs - Pass-through decoder/encoder pair joined by a shared relay bus

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::domain::errors::*;
use crate::domain::model::*;
use crate::ports::*;

const DEFAULT_SLOT_SIZE: usize = 64 * 1024;
const CODEC_CONFIG_SIZE: usize = 8;

/// Failure injection and pacing for memory codecs
#[derive(Debug, Clone)]
pub struct CodecOptions {
    pub encoder_available: bool,
    pub decoder_available: bool,
    /// Fail every encoder output dequeue after this many succeeded
    pub fail_encoder_dequeue_after: Option<usize>,
    /// Fail drawing the n-th relayed frame (0-based)
    pub fail_draw_at_frame: Option<usize>,
    /// Sleep per encoded frame
    pub frame_delay: Option<Duration>,
    /// Decoder input slots
    pub input_slots: usize,
    /// Extra format changes the encoder reports while output is pending
    pub repeat_format_changed: usize,
}

impl Default for CodecOptions {
    fn default() -> Self {
        Self {
            encoder_available: true,
            decoder_available: true,
            fail_encoder_dequeue_after: None,
            fail_draw_at_frame: None,
            frame_delay: None,
            input_slots: 2,
            repeat_format_changed: 0,
        }
    }
}

#[derive(Debug, Clone)]
struct RelayFrame {
    pts_us: i64,
    data: Vec<u8>,
}

/// State shared by the two relay surfaces and the codecs bound to them
#[derive(Debug, Default)]
struct RelayBus {
    rendered: VecDeque<RelayFrame>,
    drawn: Option<RelayFrame>,
    encoder_input: VecDeque<RelayFrame>,
    input_eos: bool,
}

type SharedBus = Arc<Mutex<RelayBus>>;
type ReleaseLog = Arc<Mutex<Vec<String>>>;
type DequeueLog = Arc<Mutex<Vec<(&'static str, OutputEvent)>>>;

fn bus_of(handle: SurfaceHandle) -> Result<SharedBus, DomainError> {
    handle
        .downcast::<Mutex<RelayBus>>()
        .ok_or_else(|| DomainError::RelayFailure("surface belongs to another backend".to_string()))
}

/// Codec provider whose codecs copy payloads through unchanged
pub struct MemoryCodecs {
    options: CodecOptions,
    log: ReleaseLog,
    dequeues: DequeueLog,
}

impl MemoryCodecs {
    pub fn new(options: CodecOptions) -> Self {
        Self {
            options,
            log: Arc::new(Mutex::new(Vec::new())),
            dequeues: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Every stop/release call made so far, in order
    pub fn release_log(&self) -> Vec<String> {
        self.log.lock().clone()
    }

    /// Every successful output dequeue as `("decoder" | "encoder", event)`, in call order
    pub fn dequeue_log(&self) -> Vec<(&'static str, OutputEvent)> {
        self.dequeues.lock().clone()
    }
}

impl Default for MemoryCodecs {
    fn default() -> Self {
        Self::new(CodecOptions::default())
    }
}

impl CodecProvider for MemoryCodecs {
    fn create_encoder(&self, format: &MediaFormat) -> Result<Box<dyn MediaCodec>, DomainError> {
        if !self.options.encoder_available || !format.is_video() {
            return Err(DomainError::CodecUnavailable(format!(
                "no memory encoder for {}",
                format.mime
            )));
        }
        Ok(Box::new(MemoryEncoder {
            format: format.clone(),
            bus: None,
            started: false,
            format_reported: false,
            config_sent: false,
            eos_sent: false,
            pending: VecDeque::new(),
            outstanding: HashMap::new(),
            next_index: 0,
            dequeues: 0,
            format_repeats: self.options.repeat_format_changed,
            options: self.options.clone(),
            log: Arc::clone(&self.log),
            dequeue_log: Arc::clone(&self.dequeues),
        }))
    }

    fn create_output_surface(
        &self,
        input: &dyn EncoderSurface,
    ) -> Result<Box<dyn DecoderSurface>, DomainError> {
        Ok(Box::new(MemoryDecoderSurface {
            bus: bus_of(input.handle())?,
            current: None,
            draws: 0,
            fail_draw_at: self.options.fail_draw_at_frame,
            log: Arc::clone(&self.log),
        }))
    }

    fn create_decoder(
        &self,
        format: &MediaFormat,
        surface: &dyn DecoderSurface,
    ) -> Result<Box<dyn MediaCodec>, DomainError> {
        if !self.options.decoder_available || !format.is_video() {
            return Err(DomainError::CodecUnavailable(format!(
                "no memory decoder for {}",
                format.mime
            )));
        }
        let slot_size = format
            .get_int(keys::MAX_INPUT_SIZE)
            .filter(|size| *size > 0)
            .map(|size| size as usize)
            .unwrap_or(DEFAULT_SLOT_SIZE);
        let slots = self.options.input_slots.max(1);

        Ok(Box::new(MemoryDecoder {
            format: format.clone(),
            bus: bus_of(surface.handle())?,
            started: false,
            slots: vec![vec![0u8; slot_size]; slots],
            free_slots: (0..slots).collect(),
            pending: VecDeque::new(),
            outstanding: HashMap::new(),
            next_index: 0,
            log: Arc::clone(&self.log),
            dequeue_log: Arc::clone(&self.dequeues),
        }))
    }
}

struct MemoryDecoder {
    format: MediaFormat,
    bus: SharedBus,
    started: bool,
    slots: Vec<Vec<u8>>,
    free_slots: VecDeque<usize>,
    pending: VecDeque<(BufferInfo, Vec<u8>)>,
    outstanding: HashMap<usize, (BufferInfo, Vec<u8>)>,
    next_index: usize,
    log: ReleaseLog,
    dequeue_log: DequeueLog,
}

impl MemoryDecoder {
    fn ensure_started(&self) -> Result<(), DomainError> {
        if self.started {
            Ok(())
        } else {
            Err(DomainError::CodecFailure("decoder not started".to_string()))
        }
    }
}

impl MediaCodec for MemoryDecoder {
    fn name(&self) -> &str {
        "memory.decoder"
    }

    fn start(&mut self) -> Result<(), DomainError> {
        self.started = true;
        Ok(())
    }

    fn dequeue_input_buffer(&mut self, _timeout_us: u64) -> Result<Option<usize>, DomainError> {
        self.ensure_started()?;
        Ok(self.free_slots.pop_front())
    }

    fn input_buffer(&mut self, index: usize) -> Result<&mut [u8], DomainError> {
        self.slots
            .get_mut(index)
            .map(|slot| slot.as_mut_slice())
            .ok_or_else(|| DomainError::CodecFailure(format!("no input slot {}", index)))
    }

    fn queue_input_buffer(
        &mut self,
        index: usize,
        size: usize,
        presentation_time_us: i64,
        flags: BufferFlags,
    ) -> Result<(), DomainError> {
        self.ensure_started()?;
        let slot = self
            .slots
            .get(index)
            .ok_or_else(|| DomainError::CodecFailure(format!("no input slot {}", index)))?;
        let data = slot
            .get(..size)
            .ok_or_else(|| DomainError::CodecFailure(format!("{} exceeds slot size", size)))?
            .to_vec();
        self.free_slots.push_back(index);

        if flags.contains(BufferFlags::END_OF_STREAM) {
            let info = BufferInfo::new(0, 0, presentation_time_us, BufferFlags::END_OF_STREAM);
            self.pending.push_back((info, Vec::new()));
        } else {
            let info = BufferInfo::new(0, data.len(), presentation_time_us, BufferFlags::NONE);
            self.pending.push_back((info, data));
        }
        Ok(())
    }

    fn dequeue_output_buffer(&mut self, _timeout_us: u64) -> Result<OutputEvent, DomainError> {
        self.ensure_started()?;
        let event = match self.pending.pop_front() {
            Some((info, data)) => {
                let index = self.next_index;
                self.next_index += 1;
                self.outstanding.insert(index, (info, data));
                OutputEvent::Buffer { index, info }
            }
            None => OutputEvent::TryAgainLater,
        };
        self.dequeue_log.lock().push(("decoder", event));
        Ok(event)
    }

    fn output_buffer(&self, index: usize) -> Result<&[u8], DomainError> {
        self.outstanding
            .get(&index)
            .map(|(_, data)| data.as_slice())
            .ok_or_else(|| DomainError::CodecFailure(format!("no output buffer {}", index)))
    }

    fn output_format(&self) -> Result<MediaFormat, DomainError> {
        let width = self.format.get_int(keys::WIDTH).unwrap_or(0);
        let height = self.format.get_int(keys::HEIGHT).unwrap_or(0);
        Ok(MediaFormat::new("video/raw")
            .with_int(keys::WIDTH, width)
            .with_int(keys::HEIGHT, height))
    }

    fn release_output_buffer(&mut self, index: usize, render: bool) -> Result<(), DomainError> {
        let (info, data) = self
            .outstanding
            .remove(&index)
            .ok_or_else(|| DomainError::CodecFailure(format!("no output buffer {}", index)))?;
        if render && info.size > 0 {
            self.bus.lock().rendered.push_back(RelayFrame {
                pts_us: info.presentation_time_us,
                data,
            });
        }
        Ok(())
    }

    fn signal_end_of_input_stream(&mut self) -> Result<(), DomainError> {
        Err(DomainError::CodecFailure(
            "decoders take end of stream through their input queue".to_string(),
        ))
    }

    fn stop(&mut self) {
        self.started = false;
        self.log.lock().push("decoder.stop".to_string());
    }

    fn release(&mut self) {
        self.pending.clear();
        self.outstanding.clear();
        self.log.lock().push("decoder.release".to_string());
    }
}

struct MemoryEncoder {
    format: MediaFormat,
    bus: Option<SharedBus>,
    started: bool,
    format_reported: bool,
    config_sent: bool,
    eos_sent: bool,
    pending: VecDeque<(BufferInfo, Vec<u8>)>,
    outstanding: HashMap<usize, Vec<u8>>,
    next_index: usize,
    dequeues: usize,
    format_repeats: usize,
    options: CodecOptions,
    log: ReleaseLog,
    dequeue_log: DequeueLog,
}

impl MemoryEncoder {
    fn bus(&self) -> Result<&SharedBus, DomainError> {
        self.bus
            .as_ref()
            .ok_or_else(|| DomainError::CodecFailure("encoder has no input surface".to_string()))
    }

    fn pull_frames(&mut self) -> Result<(), DomainError> {
        let (frames, input_eos) = {
            let mut bus = self.bus()?.lock();
            (bus.encoder_input.drain(..).collect::<Vec<_>>(), bus.input_eos)
        };

        let width = self.format.get_int(keys::WIDTH).unwrap_or(0);
        let height = self.format.get_int(keys::HEIGHT).unwrap_or(0);
        for frame in frames {
            if let Some(delay) = self.options.frame_delay {
                std::thread::sleep(delay);
            }
            let mut data = format!("avc {}x{} @{}:", width, height, frame.pts_us).into_bytes();
            data.extend_from_slice(&frame.data);
            let info = BufferInfo::new(0, data.len(), frame.pts_us, BufferFlags::KEY_FRAME);
            self.pending.push_back((info, data));
        }

        if input_eos && self.pending.is_empty() && !self.eos_sent {
            self.eos_sent = true;
            let info = BufferInfo::new(0, 0, 0, BufferFlags::END_OF_STREAM);
            self.pending.push_back((info, Vec::new()));
        }
        Ok(())
    }

    fn next_output(&mut self) -> Result<OutputEvent, DomainError> {
        if !self.started {
            return Err(DomainError::CodecFailure("encoder not started".to_string()));
        }
        if let Some(limit) = self.options.fail_encoder_dequeue_after {
            if self.dequeues >= limit {
                return Err(DomainError::CodecFailure(format!(
                    "encoder dequeue failed after {} calls",
                    limit
                )));
            }
        }
        self.dequeues += 1;

        if !self.format_reported {
            self.format_reported = true;
            return Ok(OutputEvent::FormatChanged);
        }
        if !self.config_sent {
            self.config_sent = true;
            let info = BufferInfo::new(0, CODEC_CONFIG_SIZE, 0, BufferFlags::CODEC_CONFIG);
            self.pending.push_back((info, vec![0u8; CODEC_CONFIG_SIZE]));
        }
        self.pull_frames()?;
        if self.format_repeats > 0 && !self.pending.is_empty() {
            self.format_repeats -= 1;
            return Ok(OutputEvent::FormatChanged);
        }

        match self.pending.pop_front() {
            Some((info, data)) => {
                let index = self.next_index;
                self.next_index += 1;
                self.outstanding.insert(index, data);
                Ok(OutputEvent::Buffer { index, info })
            }
            None => Ok(OutputEvent::TryAgainLater),
        }
    }
}

impl MediaCodec for MemoryEncoder {
    fn name(&self) -> &str {
        "memory.encoder"
    }

    fn start(&mut self) -> Result<(), DomainError> {
        self.bus()?;
        self.started = true;
        Ok(())
    }

    fn dequeue_input_buffer(&mut self, _timeout_us: u64) -> Result<Option<usize>, DomainError> {
        Err(DomainError::CodecFailure("encoder takes surface input only".to_string()))
    }

    fn input_buffer(&mut self, _index: usize) -> Result<&mut [u8], DomainError> {
        Err(DomainError::CodecFailure("encoder takes surface input only".to_string()))
    }

    fn queue_input_buffer(
        &mut self,
        _index: usize,
        _size: usize,
        _presentation_time_us: i64,
        _flags: BufferFlags,
    ) -> Result<(), DomainError> {
        Err(DomainError::CodecFailure("encoder takes surface input only".to_string()))
    }

    fn dequeue_output_buffer(&mut self, _timeout_us: u64) -> Result<OutputEvent, DomainError> {
        let event = self.next_output()?;
        self.dequeue_log.lock().push(("encoder", event));
        Ok(event)
    }

    fn output_buffer(&self, index: usize) -> Result<&[u8], DomainError> {
        self.outstanding
            .get(&index)
            .map(Vec::as_slice)
            .ok_or_else(|| DomainError::CodecFailure(format!("no output buffer {}", index)))
    }

    fn output_format(&self) -> Result<MediaFormat, DomainError> {
        Ok(self.format.clone())
    }

    fn release_output_buffer(&mut self, index: usize, _render: bool) -> Result<(), DomainError> {
        self.outstanding
            .remove(&index)
            .map(|_| ())
            .ok_or_else(|| DomainError::CodecFailure(format!("no output buffer {}", index)))
    }

    fn create_input_surface(&mut self) -> Result<Box<dyn EncoderSurface>, DomainError> {
        if self.bus.is_some() {
            return Err(DomainError::CodecFailure("input surface already created".to_string()));
        }
        let bus: SharedBus = Arc::new(Mutex::new(RelayBus::default()));
        self.bus = Some(Arc::clone(&bus));
        Ok(Box::new(MemoryEncoderSurface {
            bus,
            presentation_ns: 0,
            current: false,
            log: Arc::clone(&self.log),
        }))
    }

    fn signal_end_of_input_stream(&mut self) -> Result<(), DomainError> {
        self.bus()?.lock().input_eos = true;
        Ok(())
    }

    fn stop(&mut self) {
        self.started = false;
        self.log.lock().push("encoder.stop".to_string());
    }

    fn release(&mut self) {
        self.pending.clear();
        self.outstanding.clear();
        self.log.lock().push("encoder.release".to_string());
    }
}

struct MemoryDecoderSurface {
    bus: SharedBus,
    current: Option<RelayFrame>,
    draws: usize,
    fail_draw_at: Option<usize>,
    log: ReleaseLog,
}

impl DecoderSurface for MemoryDecoderSurface {
    fn handle(&self) -> SurfaceHandle {
        SurfaceHandle::new(Arc::clone(&self.bus))
    }

    fn await_new_image(&mut self) -> Result<(), DomainError> {
        let frame = self
            .bus
            .lock()
            .rendered
            .pop_front()
            .ok_or_else(|| DomainError::RelayFailure("no frame was rendered".to_string()))?;
        self.current = Some(frame);
        Ok(())
    }

    fn draw_image(&mut self, _invert: bool) -> Result<(), DomainError> {
        let frame = self
            .current
            .take()
            .ok_or_else(|| DomainError::RelayFailure("no image to draw".to_string()))?;
        let draw = self.draws;
        self.draws += 1;
        if self.fail_draw_at == Some(draw) {
            return Err(DomainError::RelayFailure(format!("draw {} failed", draw)));
        }
        self.bus.lock().drawn = Some(frame);
        Ok(())
    }

    fn release(&mut self) {
        self.current = None;
        self.log.lock().push("decoder_surface.release".to_string());
    }
}

struct MemoryEncoderSurface {
    bus: SharedBus,
    presentation_ns: i64,
    current: bool,
    log: ReleaseLog,
}

impl EncoderSurface for MemoryEncoderSurface {
    fn handle(&self) -> SurfaceHandle {
        SurfaceHandle::new(Arc::clone(&self.bus))
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
        let mut bus = self.bus.lock();
        let mut frame = bus
            .drawn
            .take()
            .ok_or_else(|| DomainError::RelayFailure("nothing drawn".to_string()))?;
        frame.pts_us = self.presentation_ns / 1000;
        bus.encoder_input.push_back(frame);
        Ok(())
    }

    fn release(&mut self) {
        self.current = false;
        self.log.lock().push("encoder_surface.release".to_string());
    }
}
