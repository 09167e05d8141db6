//! Decode -> relay -> encode pump
//!
//! One outer iteration feeds at most one demuxed sample into the decoder and
//! then drains outputs. The drain loop always polls the encoder first and only
//! polls the decoder in a pass where the encoder had nothing to hand out.

use tracing::{debug, info, warn};

use crate::domain::errors::DomainError;
use crate::domain::model::*;
use crate::engine::progress::JobNotifier;
use crate::engine::tracks::TrackRoute;
use crate::engine::{CancellationFlag, EngineConfig, StageOutcome};
use crate::error::{CompressXError, CompressXResult};
use crate::ports::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FeedState {
    Feeding,
    InputDone,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DecodeState {
    Running,
    EndOfStream,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EncodeState {
    AwaitingFormat,
    Writing { track: usize },
    EndOfStream,
}

/// Counters for log output
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PumpStats {
    pub samples_fed: u64,
    pub frames_rendered: u64,
    pub relay_failures: u64,
    pub samples_written: u64,
}

/// Build the encoder format for a target rendition
pub fn encoder_format(
    config: &EngineConfig,
    input: &MediaFormat,
    target: &QualityModel,
    duration_ms: u64,
) -> MediaFormat {
    let mut format = MediaFormat::video(config.output_mime.as_str(), target.width(), target.height());
    format.set_int(keys::BIT_RATE, target.bitrate() as i64);
    format.set_int(keys::DURATION_US, duration_ms.saturating_mul(1000) as i64);
    format.set_int(keys::COLOR_FORMAT, COLOR_FORMAT_SURFACE);

    copy_or_default(input, &mut format, keys::FRAME_RATE, Some(config.default_frame_rate));
    copy_or_default(
        input,
        &mut format,
        keys::I_FRAME_INTERVAL,
        Some(config.default_i_frame_interval),
    );
    copy_or_default(input, &mut format, keys::COLOR_STANDARD, None);
    copy_or_default(input, &mut format, keys::COLOR_TRANSFER, None);
    copy_or_default(input, &mut format, keys::COLOR_RANGE, None);
    format
}

fn copy_or_default(input: &MediaFormat, output: &mut MediaFormat, key: &str, default: Option<i64>) {
    if input.contains(key) {
        output.copy_from(input, key);
    } else if let Some(value) = default {
        output.set_int(key, value);
    }
}

/// Codecs and relay surfaces owned by one pump run.
///
/// Dropping the session releases decoder, encoder, decoder surface and
/// encoder surface in that order, whatever the exit path.
#[derive(Default)]
struct CodecSession {
    decoder: Option<Box<dyn MediaCodec>>,
    encoder: Option<Box<dyn MediaCodec>>,
    decoder_surface: Option<Box<dyn DecoderSurface>>,
    encoder_surface: Option<Box<dyn EncoderSurface>>,
}

impl CodecSession {
    #[allow(clippy::type_complexity)]
    fn parts(
        &mut self,
    ) -> CompressXResult<(
        &mut dyn MediaCodec,
        &mut dyn MediaCodec,
        &mut dyn DecoderSurface,
        &mut dyn EncoderSurface,
    )> {
        match (
            self.decoder.as_deref_mut(),
            self.encoder.as_deref_mut(),
            self.decoder_surface.as_deref_mut(),
            self.encoder_surface.as_deref_mut(),
        ) {
            (Some(decoder), Some(encoder), Some(decoder_surface), Some(encoder_surface)) => {
                Ok((decoder, encoder, decoder_surface, encoder_surface))
            }
            _ => Err(CompressXError::pipeline("codec session is incomplete")),
        }
    }
}

impl Drop for CodecSession {
    fn drop(&mut self) {
        if let Some(mut decoder) = self.decoder.take() {
            decoder.stop();
            decoder.release();
        }
        if let Some(mut encoder) = self.encoder.take() {
            encoder.stop();
            encoder.release();
        }
        if let Some(mut surface) = self.decoder_surface.take() {
            surface.release();
        }
        if let Some(mut surface) = self.encoder_surface.take() {
            surface.release();
        }
        debug!("codec session released");
    }
}

/// Re-encodes the video track of a source into a muxer
pub struct TranscodePump<'a> {
    config: &'a EngineConfig,
    cancel: &'a CancellationFlag,
    notifier: &'a JobNotifier,
    stats: PumpStats,
}

impl<'a> TranscodePump<'a> {
    pub fn new(config: &'a EngineConfig, cancel: &'a CancellationFlag, notifier: &'a JobNotifier) -> Self {
        Self {
            config,
            cancel,
            notifier,
            stats: PumpStats::default(),
        }
    }

    pub fn stats(&self) -> PumpStats {
        self.stats
    }

    /// Pump the video track into the muxer.
    ///
    /// The track is selected for the duration of the run and unselected on
    /// every exit path.
    pub fn run(
        &mut self,
        demuxer: &mut dyn Demuxer,
        muxer: &mut dyn Muxer,
        codecs: &dyn CodecProvider,
        track: &TrackRoute,
        target: &QualityModel,
        duration_ms: u64,
    ) -> CompressXResult<StageOutcome> {
        demuxer.select_track(track.index)?;
        let result = self.run_selected(demuxer, muxer, codecs, track, target, duration_ms);
        demuxer.unselect_track(track.index);

        info!(
            "video pump finished: fed {} samples, rendered {} frames, wrote {} samples",
            self.stats.samples_fed, self.stats.frames_rendered, self.stats.samples_written
        );
        result
    }

    fn run_selected(
        &mut self,
        demuxer: &mut dyn Demuxer,
        muxer: &mut dyn Muxer,
        codecs: &dyn CodecProvider,
        track: &TrackRoute,
        target: &QualityModel,
        duration_ms: u64,
    ) -> CompressXResult<StageOutcome> {
        demuxer.seek_to(0, SeekMode::PreviousSync)?;

        let output_format = encoder_format(self.config, &track.format, target, duration_ms);
        debug!("encoder format {}", output_format);

        let mut session = CodecSession::default();
        self.open_codecs(&mut session, codecs, &track.format, &output_format)?;
        let (decoder, encoder, decoder_surface, encoder_surface) = session.parts()?;
        info!("transcoding with decoder {} and encoder {}", decoder.name(), encoder.name());

        let timeout = self.config.codec_timeout_us;
        let mut feed = FeedState::Feeding;
        let mut decode = DecodeState::Running;
        let mut encode = EncodeState::AwaitingFormat;

        loop {
            if self.cancel.is_cancelled() {
                info!("video pump cancelled");
                return Ok(StageOutcome::Cancelled);
            }
            if encode == EncodeState::EndOfStream {
                return Ok(StageOutcome::Completed);
            }

            if feed == FeedState::Feeding {
                feed = self.feed_decoder(demuxer, decoder, track.index)?;
            }

            let mut decoder_available = decode == DecodeState::Running;
            let mut encoder_available = true;
            while decoder_available || encoder_available {
                if self.cancel.is_cancelled() {
                    info!("video pump cancelled while draining");
                    return Ok(StageOutcome::Cancelled);
                }

                let event = encoder.dequeue_output_buffer(timeout)?;
                match event {
                    OutputEvent::TryAgainLater => encoder_available = false,
                    OutputEvent::FormatChanged => {
                        if encode == EncodeState::AwaitingFormat {
                            let format = encoder.output_format()?;
                            let muxer_track = muxer.add_track(&format, false)?;
                            info!("muxer video track {} added with {}", muxer_track, format);
                            encode = EncodeState::Writing { track: muxer_track };
                        }
                    }
                    OutputEvent::BuffersChanged => {}
                    OutputEvent::Buffer { index, info } => {
                        encode = self.write_encoded(encoder, muxer, encode, index, &info)?;
                        if encode == EncodeState::EndOfStream {
                            break;
                        }
                    }
                }
                if event != OutputEvent::TryAgainLater {
                    continue;
                }

                if decode == DecodeState::EndOfStream {
                    decoder_available = false;
                    continue;
                }
                match decoder.dequeue_output_buffer(timeout)? {
                    OutputEvent::TryAgainLater => decoder_available = false,
                    OutputEvent::FormatChanged | OutputEvent::BuffersChanged => {}
                    OutputEvent::Buffer { index, info } => {
                        let render = info.size != 0;
                        decoder.release_output_buffer(index, render)?;
                        if render {
                            self.relay_frame(decoder_surface, encoder_surface, &info, duration_ms);
                        }
                        if info.is_end_of_stream() {
                            debug!("decoder reached end of stream");
                            decoder_available = false;
                            decode = DecodeState::EndOfStream;
                            encoder.signal_end_of_input_stream()?;
                        }
                    }
                }
            }
        }
    }

    fn open_codecs(
        &self,
        session: &mut CodecSession,
        codecs: &dyn CodecProvider,
        input_format: &MediaFormat,
        output_format: &MediaFormat,
    ) -> CompressXResult<()> {
        let encoder = session.encoder.insert(codecs.create_encoder(output_format).map_err(|e| {
            CompressXError::EncoderNotFound {
                mime: output_format.mime.clone(),
                message: e.to_string(),
            }
        })?);

        let encoder_surface = session.encoder_surface.insert(encoder.create_input_surface()?);
        encoder_surface.make_current()?;
        encoder.start()?;

        let decoder_surface = session
            .decoder_surface
            .insert(codecs.create_output_surface(&**encoder_surface)?);
        let decoder = session.decoder.insert(
            codecs
                .create_decoder(input_format, &**decoder_surface)
                .map_err(|e| CompressXError::DecoderNotFound {
                    mime: input_format.mime.clone(),
                    message: e.to_string(),
                })?,
        );
        decoder.start()?;
        Ok(())
    }

    fn feed_decoder(
        &mut self,
        demuxer: &mut dyn Demuxer,
        decoder: &mut dyn MediaCodec,
        video_index: usize,
    ) -> CompressXResult<FeedState> {
        let timeout = self.config.codec_timeout_us;
        match demuxer.sample_track_index() {
            Some(index) if index == video_index => {
                let Some(slot) = decoder.dequeue_input_buffer(timeout)? else {
                    return Ok(FeedState::Feeding);
                };
                let buffer = decoder.input_buffer(slot)?;
                match demuxer.read_sample_data(buffer)? {
                    Some(size) => {
                        let pts = demuxer.sample_time_us();
                        decoder.queue_input_buffer(slot, size, pts, BufferFlags::NONE)?;
                        demuxer.advance();
                        self.stats.samples_fed += 1;
                        Ok(FeedState::Feeding)
                    }
                    None => {
                        decoder.queue_input_buffer(slot, 0, 0, BufferFlags::END_OF_STREAM)?;
                        Ok(FeedState::InputDone)
                    }
                }
            }
            Some(other) => {
                debug!("skipping sample of track {}", other);
                demuxer.advance();
                Ok(FeedState::Feeding)
            }
            None => match decoder.dequeue_input_buffer(timeout)? {
                Some(slot) => {
                    decoder.queue_input_buffer(slot, 0, 0, BufferFlags::END_OF_STREAM)?;
                    debug!("decoder input done after {} samples", self.stats.samples_fed);
                    Ok(FeedState::InputDone)
                }
                None => Ok(FeedState::Feeding),
            },
        }
    }

    fn write_encoded(
        &mut self,
        encoder: &mut dyn MediaCodec,
        muxer: &mut dyn Muxer,
        state: EncodeState,
        index: usize,
        info: &BufferInfo,
    ) -> CompressXResult<EncodeState> {
        if info.size > 1 && !info.is_codec_config() {
            let EncodeState::Writing { track } = state else {
                return Err(CompressXError::pipeline(
                    "encoder produced data before its output format",
                ));
            };
            let data = encoder.output_buffer(index)?;
            let payload = data
                .get(info.offset..info.offset + info.size)
                .ok_or_else(|| {
                    DomainError::CodecFailure(format!(
                        "encoder buffer {} shorter than {}+{}",
                        index, info.offset, info.size
                    ))
                })?;
            muxer.write_sample_data(track, payload, info, false)?;
            self.stats.samples_written += 1;
        }

        let next = if info.is_end_of_stream() {
            debug!("encoder reached end of stream");
            EncodeState::EndOfStream
        } else {
            state
        };
        encoder.release_output_buffer(index, false)?;
        Ok(next)
    }

    /// Move one decoded frame through the relay. Failures skip the frame.
    fn relay_frame(
        &mut self,
        decoder_surface: &mut dyn DecoderSurface,
        encoder_surface: &mut dyn EncoderSurface,
        info: &BufferInfo,
        duration_ms: u64,
    ) {
        let result = (|| -> Result<(), DomainError> {
            decoder_surface.await_new_image()?;
            decoder_surface.draw_image(false)?;
            encoder_surface.set_presentation_time(info.presentation_time_us.saturating_mul(1000))?;
            self.report_progress(info.presentation_time_us, duration_ms);
            encoder_surface.swap_buffers()
        })();

        match result {
            Ok(()) => self.stats.frames_rendered += 1,
            Err(e) => {
                self.stats.relay_failures += 1;
                warn!("dropping frame at {} us: {}", info.presentation_time_us, e);
            }
        }
    }

    fn report_progress(&self, presentation_time_us: i64, duration_ms: u64) {
        if duration_ms == 0 {
            return;
        }
        let percent = (presentation_time_us as f32 / 1000.0) / duration_ms as f32 * 100.0;
        self.notifier.progress(percent);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::{CodecOptions, MemoryCodecs, MemoryMedia, MemoryMuxer};
    use crate::engine::progress::JobEvent;
    use crate::engine::tracks::route;

    fn target() -> QualityModel {
        QualityModel::new(Resolution::new(640, 360), 345_600)
    }

    #[test]
    fn test_encoder_format_copies_and_defaults() {
        let config = EngineConfig::default();
        let input = MediaFormat::video("video/hevc", 1280, 720)
            .with_int(keys::FRAME_RATE, 24)
            .with_int(keys::COLOR_RANGE, 2);
        let format = encoder_format(&config, &input, &target(), 5_000);

        assert_eq!(format.mime, "video/avc");
        assert_eq!(format.get_int(keys::WIDTH), Some(640));
        assert_eq!(format.get_int(keys::HEIGHT), Some(360));
        assert_eq!(format.get_int(keys::BIT_RATE), Some(345_600));
        assert_eq!(format.get_int(keys::DURATION_US), Some(5_000_000));
        assert_eq!(format.get_int(keys::COLOR_FORMAT), Some(COLOR_FORMAT_SURFACE));
        assert_eq!(format.get_int(keys::FRAME_RATE), Some(24));
        assert_eq!(format.get_int(keys::I_FRAME_INTERVAL), Some(1));
        assert_eq!(format.get_int(keys::COLOR_RANGE), Some(2));
        assert!(!format.contains(keys::COLOR_STANDARD));
        assert!(!format.contains(keys::COLOR_TRANSFER));
    }

    #[test]
    fn test_encoder_format_default_frame_rate() {
        let config = EngineConfig::default();
        let input = MediaFormat::video("video/avc", 1280, 720);
        let format = encoder_format(&config, &input, &target(), 0);
        assert_eq!(format.get_int(keys::FRAME_RATE), Some(30));
        assert_eq!(format.get_int(keys::DURATION_US), Some(0));
    }

    fn run_pump(
        media: MemoryMedia,
        codecs: &MemoryCodecs,
        cancel: &CancellationFlag,
    ) -> (CompressXResult<StageOutcome>, PumpStats, MemoryMuxer, Vec<JobEvent>) {
        let config = EngineConfig::default();
        let (notifier, mut receiver) = JobNotifier::channel();
        let duration_ms = media.metadata().duration_ms;
        let mut demuxer = media.demuxer();
        let mut muxer = MemoryMuxer::detached(0);
        let routed = route(&demuxer).unwrap();
        let video = routed.video.unwrap();

        let mut pump = TranscodePump::new(&config, cancel, &notifier);
        let result = pump.run(&mut demuxer, &mut muxer, codecs, &video, &target(), duration_ms);
        let stats = pump.stats();

        let mut events = Vec::new();
        while let Ok(event) = receiver.try_recv() {
            events.push(event);
        }
        (result, stats, muxer, events)
    }

    #[test]
    fn test_pump_writes_every_frame_in_order() {
        let codecs = MemoryCodecs::new(CodecOptions::default());
        let media = MemoryMedia::video(1280, 720, 8_000_000, 1_000, 30);
        let (result, stats, muxer, events) = run_pump(media, &codecs, &CancellationFlag::new());

        assert_eq!(result.unwrap(), StageOutcome::Completed);
        assert_eq!(stats.samples_fed, 30);
        assert_eq!(stats.frames_rendered, 30);
        assert_eq!(stats.samples_written, 30);

        let movie = muxer.movie();
        assert_eq!(movie.tracks.len(), 1);
        let video = &movie.tracks[0];
        assert!(!video.is_audio);
        assert_eq!(video.format.get_int(keys::WIDTH), Some(640));
        let times: Vec<i64> = video.samples.iter().map(|s| s.presentation_time_us).collect();
        let mut sorted = times.clone();
        sorted.sort();
        assert_eq!(times, sorted);

        let progress: Vec<f32> = events
            .iter()
            .filter_map(|event| match event {
                JobEvent::Progress(p) => Some(*p),
                _ => None,
            })
            .collect();
        assert!(!progress.is_empty());
        assert!(progress.windows(2).all(|w| w[0] <= w[1]));
        assert!(progress.iter().all(|p| *p <= 100.0));
    }

    #[test]
    fn test_pump_polls_decoder_only_after_encoder_ran_dry() {
        let codecs = MemoryCodecs::new(CodecOptions::default());
        let media = MemoryMedia::video(1280, 720, 8_000_000, 500, 10);
        let (result, _, _, _) = run_pump(media, &codecs, &CancellationFlag::new());
        assert_eq!(result.unwrap(), StageOutcome::Completed);

        let log = codecs.dequeue_log();
        assert_eq!(log.first().map(|(codec, _)| *codec), Some("encoder"));
        assert!(log.iter().any(|(codec, _)| *codec == "decoder"));
        for (at, (codec, _)) in log.iter().enumerate() {
            if *codec == "decoder" {
                assert_eq!(
                    log[at - 1],
                    ("encoder", OutputEvent::TryAgainLater),
                    "decoder polled at {} while the encoder still had output",
                    at
                );
            }
        }
    }

    #[test]
    fn test_pump_adds_video_track_once_across_format_changes() {
        let codecs = MemoryCodecs::new(CodecOptions {
            repeat_format_changed: 3,
            ..CodecOptions::default()
        });
        let media = MemoryMedia::video(1280, 720, 8_000_000, 500, 10);
        let (result, stats, muxer, _) = run_pump(media, &codecs, &CancellationFlag::new());
        assert_eq!(result.unwrap(), StageOutcome::Completed);

        let format_changes = codecs
            .dequeue_log()
            .iter()
            .filter(|entry| **entry == ("encoder", OutputEvent::FormatChanged))
            .count();
        assert_eq!(format_changes, 4);

        let movie = muxer.movie();
        assert_eq!(movie.tracks.len(), 1);
        assert_eq!(movie.tracks[0].samples.len(), 10);
        assert_eq!(stats.samples_written, 10);
    }

    #[test]
    fn test_pump_releases_in_fixed_order() {
        let codecs = MemoryCodecs::new(CodecOptions::default());
        let media = MemoryMedia::video(1280, 720, 8_000_000, 500, 10);
        let (result, _, _, _) = run_pump(media, &codecs, &CancellationFlag::new());
        assert!(result.is_ok());
        assert_eq!(
            codecs.release_log(),
            vec![
                "decoder.stop",
                "decoder.release",
                "encoder.stop",
                "encoder.release",
                "decoder_surface.release",
                "encoder_surface.release",
            ]
        );
    }

    #[test]
    fn test_pump_missing_encoder() {
        let codecs = MemoryCodecs::new(CodecOptions {
            encoder_available: false,
            ..CodecOptions::default()
        });
        let media = MemoryMedia::video(1280, 720, 8_000_000, 500, 10);
        let (result, _, _, _) = run_pump(media, &codecs, &CancellationFlag::new());
        let err = result.unwrap_err();
        assert_eq!(err.code(), crate::domain::errors::ErrorCode::EncoderNotFound);
        assert!(codecs.release_log().is_empty());
    }

    #[test]
    fn test_pump_missing_decoder_releases_encoder() {
        let codecs = MemoryCodecs::new(CodecOptions {
            decoder_available: false,
            ..CodecOptions::default()
        });
        let media = MemoryMedia::video(1280, 720, 8_000_000, 500, 10);
        let (result, _, _, _) = run_pump(media, &codecs, &CancellationFlag::new());
        assert_eq!(
            result.unwrap_err().code(),
            crate::domain::errors::ErrorCode::DecoderNotFound
        );
        assert_eq!(
            codecs.release_log(),
            vec![
                "encoder.stop",
                "encoder.release",
                "decoder_surface.release",
                "encoder_surface.release",
            ]
        );
    }

    #[test]
    fn test_pump_codec_failure_is_generic_and_releases() {
        let codecs = MemoryCodecs::new(CodecOptions {
            fail_encoder_dequeue_after: Some(5),
            ..CodecOptions::default()
        });
        let media = MemoryMedia::video(1280, 720, 8_000_000, 500, 10);
        let (result, _, _, _) = run_pump(media, &codecs, &CancellationFlag::new());
        assert_eq!(
            result.unwrap_err().code(),
            crate::domain::errors::ErrorCode::GenericError
        );
        assert_eq!(codecs.release_log().len(), 6);
    }

    #[test]
    fn test_pump_skips_failed_relay_frames() {
        let codecs = MemoryCodecs::new(CodecOptions {
            fail_draw_at_frame: Some(3),
            ..CodecOptions::default()
        });
        let media = MemoryMedia::video(1280, 720, 8_000_000, 500, 10);
        let (result, stats, muxer, _) = run_pump(media, &codecs, &CancellationFlag::new());
        assert_eq!(result.unwrap(), StageOutcome::Completed);
        assert_eq!(stats.relay_failures, 1);
        assert_eq!(stats.frames_rendered, 9);
        assert_eq!(muxer.movie().tracks[0].samples.len(), 9);
    }

    #[test]
    fn test_pump_observes_cancellation() {
        let codecs = MemoryCodecs::new(CodecOptions::default());
        let media = MemoryMedia::video(1280, 720, 8_000_000, 500, 10);
        let cancel = CancellationFlag::new();
        cancel.cancel();
        let (result, stats, muxer, _) = run_pump(media, &codecs, &cancel);
        assert_eq!(result.unwrap(), StageOutcome::Cancelled);
        assert_eq!(stats.samples_fed, 0);
        assert!(muxer.movie().tracks.is_empty());
        assert_eq!(codecs.release_log().len(), 6);
    }

    #[test]
    fn test_pump_zero_duration_reports_no_progress() {
        let codecs = MemoryCodecs::new(CodecOptions::default());
        let media = MemoryMedia::video(1280, 720, 8_000_000, 0, 5);
        let (result, _, _, events) = run_pump(media, &codecs, &CancellationFlag::new());
        assert_eq!(result.unwrap(), StageOutcome::Completed);
        assert!(events.is_empty());
    }
}
