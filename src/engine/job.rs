//! One compression job, from probe to terminal notification

use std::any::Any;
use std::fmt;
use std::fs;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::domain::errors::ErrorCode;
use crate::domain::model::*;
use crate::domain::rules::{plan_compression, QualityStrategy};
use crate::engine::copy::{copy_audio_track, copy_whole_file};
use crate::engine::progress::JobNotifier;
use crate::engine::pump::TranscodePump;
use crate::engine::tracks::{route, RoutedTracks, TrackRoute};
use crate::engine::{CancellationFlag, EngineConfig, StageOutcome};
use crate::error::{CompressXError, CompressXResult};
use crate::ports::{Demuxer, MediaPorts, MuxTarget, Muxer};

/// What to compress and where to put it
#[derive(Clone)]
pub struct CompressRequest {
    pub source: MediaSource,
    pub output_dir: PathBuf,
    pub file_name: String,
    /// Overrides the service's default strategy
    pub strategy: Option<Arc<dyn QualityStrategy>>,
}

impl CompressRequest {
    pub fn new(source: MediaSource, output_dir: impl Into<PathBuf>, file_name: impl Into<String>) -> Self {
        Self {
            source,
            output_dir: output_dir.into(),
            file_name: file_name.into(),
            strategy: None,
        }
    }

    pub fn with_strategy(mut self, strategy: Arc<dyn QualityStrategy>) -> Self {
        self.strategy = Some(strategy);
        self
    }

    pub fn output_path(&self) -> PathBuf {
        self.output_dir.join(&self.file_name)
    }
}

impl fmt::Debug for CompressRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompressRequest")
            .field("source", &self.source)
            .field("output_dir", &self.output_dir)
            .field("file_name", &self.file_name)
            .field("strategy", &self.strategy.as_ref().map(|s| s.name()))
            .finish()
    }
}

/// A job owns its codecs and container handles for the whole run
pub struct CompressJob {
    id: JobId,
    request: CompressRequest,
    ports: MediaPorts,
    strategy: Arc<dyn QualityStrategy>,
    config: EngineConfig,
    cancel: CancellationFlag,
    notifier: Arc<JobNotifier>,
    state: Arc<Mutex<JobState>>,
}

impl CompressJob {
    pub fn new(
        id: JobId,
        request: CompressRequest,
        ports: MediaPorts,
        default_strategy: Arc<dyn QualityStrategy>,
        config: EngineConfig,
        cancel: CancellationFlag,
        notifier: Arc<JobNotifier>,
    ) -> Self {
        let strategy = request.strategy.clone().unwrap_or(default_strategy);
        Self {
            id,
            request,
            ports,
            strategy,
            config,
            cancel,
            notifier,
            state: Arc::new(Mutex::new(JobState::Created)),
        }
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn state(&self) -> JobState {
        *self.state.lock()
    }

    /// Shared view of the job state for registries
    pub fn state_handle(&self) -> Arc<Mutex<JobState>> {
        Arc::clone(&self.state)
    }

    /// Run the job to its terminal state.
    ///
    /// The output file is gone on every outcome but success. A panic anywhere
    /// below is reported as a generic error. Once the outcome is settled a
    /// cancel request no longer applies.
    pub fn run(self) -> JobOutcome {
        let output = self.request.output_path();
        info!(
            "job {} started: {} -> {} using {}",
            self.id,
            self.request.source,
            output.display(),
            self.strategy.name()
        );

        let result = panic::catch_unwind(AssertUnwindSafe(|| self.execute(&output)));
        let mut outcome = match result {
            Ok(Ok(StageOutcome::Completed)) => JobOutcome::Completed {
                output: output.clone(),
            },
            Ok(Ok(StageOutcome::Cancelled)) => JobOutcome::Cancelled,
            Ok(Err(e)) => {
                error!("job {} failed: {}", self.id, e);
                JobOutcome::Failed {
                    code: e.code(),
                    message: e.to_string(),
                }
            }
            Err(payload) => {
                let message = panic_message(&*payload);
                error!("job {} panicked: {}", self.id, message);
                JobOutcome::Failed {
                    code: ErrorCode::GenericError,
                    message,
                }
            }
        };
        if outcome != JobOutcome::Cancelled && !self.cancel.settle() {
            debug!("job {} was cancelled after its last stage", self.id);
            outcome = JobOutcome::Cancelled;
        }

        if !outcome.is_success() {
            remove_output(&output);
        }
        self.set_state(outcome.state());

        match &outcome {
            JobOutcome::Completed { output } => {
                self.notifier.completed(output);
            }
            JobOutcome::Failed { code, message } => {
                self.notifier.failed(*code, message.clone());
            }
            JobOutcome::Cancelled => {}
        }
        outcome
    }

    fn set_state(&self, state: JobState) {
        let mut current = self.state.lock();
        if *current != state {
            info!("job {}: {} -> {}", self.id, *current, state);
            *current = state;
        }
    }

    fn execute(&self, output: &Path) -> CompressXResult<StageOutcome> {
        if self.cancel.is_cancelled() {
            return Ok(StageOutcome::Cancelled);
        }
        fs::create_dir_all(&self.request.output_dir)?;

        self.set_state(JobState::Probing);
        let mut metadata = self
            .ports
            .metadata
            .probe(&self.request.source)
            .map_err(|e| CompressXError::SourceNotFound {
                message: e.to_string(),
            })?;
        if metadata.validate().is_err() {
            return Err(CompressXError::InvalidSource {
                width: metadata.width,
                height: metadata.height,
            });
        }
        debug!("job {} probed {}", self.id, metadata);
        metadata.normalize_orientation();

        let plan = plan_compression(&*self.strategy, metadata.quality());
        let outcome = match plan {
            CompressionPlan::Passthrough { source } => {
                info!("job {}: {} needs no reduction, copying", self.id, source);
                self.set_state(JobState::Passthrough);
                copy_whole_file(
                    &*self.ports.streams,
                    &self.request.source,
                    output,
                    self.config.copy_chunk_size,
                    &self.cancel,
                )?
            }
            CompressionPlan::Transcode { source, target } => {
                info!("job {}: reducing {} to {}", self.id, source, target);
                self.set_state(JobState::Transcoding);
                self.transcode(output, &metadata, &target)?
            }
        };
        self.set_state(JobState::Finalizing);
        Ok(outcome)
    }

    fn transcode(
        &self,
        output: &Path,
        metadata: &VideoMetadata,
        target: &QualityModel,
    ) -> CompressXResult<StageOutcome> {
        let mut demuxer = self
            .ports
            .demuxers
            .open(&self.request.source)
            .map_err(|e| CompressXError::SourceNotFound {
                message: e.to_string(),
            })?;
        let routed = route(&*demuxer)?;
        let Some(video) = routed.video.as_ref() else {
            return Err(CompressXError::VideoTrackNotFound);
        };

        let mut muxer = self.ports.muxers.create(&MuxTarget {
            path: output.to_path_buf(),
            rotation: metadata.rotation,
        })?;
        let result = self.pump_tracks(
            &mut *demuxer,
            &mut *muxer,
            &routed,
            video,
            target,
            metadata.duration_ms,
        );

        self.set_state(JobState::Finalizing);
        let success = matches!(result, Ok(StageOutcome::Completed));
        match (result, muxer.finish(!success)) {
            (Ok(StageOutcome::Completed), Err(e)) => Err(e.into()),
            (result, Err(e)) => {
                warn!("job {}: discarded output failed to finish: {}", self.id, e);
                result
            }
            (result, Ok(())) => result,
        }
    }

    fn pump_tracks(
        &self,
        demuxer: &mut dyn Demuxer,
        muxer: &mut dyn Muxer,
        routed: &RoutedTracks,
        video: &TrackRoute,
        target: &QualityModel,
        duration_ms: u64,
    ) -> CompressXResult<StageOutcome> {
        let mut pump = TranscodePump::new(&self.config, &self.cancel, &self.notifier);
        let outcome = pump.run(demuxer, muxer, &*self.ports.codecs, video, target, duration_ms)?;
        if outcome == StageOutcome::Cancelled {
            return Ok(outcome);
        }

        match &routed.audio {
            Some(audio) => copy_audio_track(
                demuxer,
                muxer,
                audio,
                self.config.audio_buffer_floor,
                &self.cancel,
            ),
            None => {
                debug!("job {}: no audio track to copy", self.id);
                Ok(StageOutcome::Completed)
            }
        }
    }
}

fn remove_output(output: &Path) {
    if !output.exists() {
        return;
    }
    match fs::remove_file(output) {
        Ok(()) => debug!("removed partial output {}", output.display()),
        Err(e) => warn!("could not remove partial output {}: {}", output.display(), e),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("job panicked: {}", message)
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("job panicked: {}", message)
    } else {
        "job panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::*;
    use crate::domain::errors::DomainError;
    use crate::domain::rules::LowQualityStrategy;
    use crate::engine::progress::JobEvent;
    use crate::ports::MetadataSource;
    use tokio::sync::mpsc::UnboundedReceiver;

    struct Fixture {
        library: Arc<MemoryLibrary>,
        ports: MediaPorts,
        dir: tempfile::TempDir,
    }

    fn fixture() -> Fixture {
        let library = Arc::new(MemoryLibrary::new());
        let ports = memory_ports(Arc::clone(&library), Arc::new(MemoryCodecs::default()));
        Fixture {
            library,
            ports,
            dir: tempfile::tempdir().unwrap(),
        }
    }

    fn job(
        fixture: &Fixture,
        source: MediaSource,
        cancel: CancellationFlag,
    ) -> (CompressJob, UnboundedReceiver<JobEvent>) {
        let (notifier, receiver) = JobNotifier::channel();
        let request = CompressRequest::new(source, fixture.dir.path().join("out"), "small.mp4");
        let job = CompressJob::new(
            JobId(1),
            request,
            fixture.ports.clone(),
            Arc::new(LowQualityStrategy),
            EngineConfig::default(),
            cancel,
            Arc::new(notifier),
        );
        (job, receiver)
    }

    fn events(receiver: &mut UnboundedReceiver<JobEvent>) -> Vec<JobEvent> {
        let mut events = Vec::new();
        while let Ok(event) = receiver.try_recv() {
            events.push(event);
        }
        events
    }

    #[test]
    fn test_transcode_with_audio_completes() {
        let fixture = fixture();
        let source = fixture.library.insert(
            "big.mp4",
            MemoryMedia::video(1920, 1080, 6_220_800, 1_000, 30).with_audio(40, 200),
        );
        let (job, mut receiver) = job(&fixture, source, CancellationFlag::new());
        let state = job.state_handle();

        let outcome = job.run();
        let output = fixture.dir.path().join("out").join("small.mp4");
        assert_eq!(outcome, JobOutcome::Completed { output: output.clone() });
        assert_eq!(*state.lock(), JobState::Completed);

        let movie = MuxedMovie::read(&output).unwrap();
        assert_eq!(movie.rotation, 0);
        assert_eq!(movie.tracks.len(), 2);
        assert_eq!(movie.tracks[0].format.get_int(keys::WIDTH), Some(1280));
        assert_eq!(movie.tracks[0].format.get_int(keys::HEIGHT), Some(720));
        assert_eq!(movie.tracks[0].format.get_int(keys::BIT_RATE), Some(1_382_400));
        assert_eq!(movie.tracks[1].samples.len(), 40);

        let events = events(&mut receiver);
        assert_eq!(events.last(), Some(&JobEvent::Completed(output)));
        assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
    }

    #[test]
    fn test_passthrough_copies_bytes() {
        let fixture = fixture();
        let media = MemoryMedia::video(480, 360, 129_600, 1_000, 10).with_bytes(4_321);
        let expected = media.bytes().to_vec();
        let source = fixture.library.insert("tiny.mp4", media);
        let (job, _receiver) = job(&fixture, source, CancellationFlag::new());

        let JobOutcome::Completed { output } = job.run() else {
            panic!("passthrough job failed");
        };
        assert_eq!(fs::read(output).unwrap(), expected);
    }

    #[test]
    fn test_rotated_source_is_normalized() {
        let fixture = fixture();
        let source = fixture.library.insert(
            "portrait.mp4",
            MemoryMedia::video(1920, 1080, 6_220_800, 500, 10).with_rotation(90),
        );
        let (job, _receiver) = job(&fixture, source, CancellationFlag::new());
        let JobOutcome::Completed { output } = job.run() else {
            panic!("rotated job failed");
        };

        let movie = MuxedMovie::read(&output).unwrap();
        assert_eq!(movie.rotation, 0);
        assert_eq!(movie.tracks[0].format.get_int(keys::WIDTH), Some(720));
        assert_eq!(movie.tracks[0].format.get_int(keys::HEIGHT), Some(1280));
    }

    #[test]
    fn test_audio_only_source_fails_without_output() {
        let fixture = fixture();
        let source = fixture.library.insert(
            "audio.mp4",
            MemoryMedia::video(1920, 1080, 6_220_800, 1_000, 5)
                .with_audio(10, 100)
                .without_video(),
        );
        let (job, mut receiver) = job(&fixture, source, CancellationFlag::new());

        let outcome = job.run();
        assert!(matches!(
            outcome,
            JobOutcome::Failed {
                code: ErrorCode::VideoTrackNotFound,
                ..
            }
        ));
        assert!(!fixture.dir.path().join("out").join("small.mp4").exists());
        assert!(matches!(
            events(&mut receiver).as_slice(),
            [JobEvent::Failed {
                code: ErrorCode::VideoTrackNotFound,
                ..
            }]
        ));
    }

    #[test]
    fn test_zero_dimension_is_invalid_source() {
        let fixture = fixture();
        let media = MemoryMedia::video(1920, 1080, 6_220_800, 1_000, 5).with_metadata(VideoMetadata {
            width: 0,
            height: 1080,
            ..VideoMetadata::default()
        });
        let source = fixture.library.insert("broken.mp4", media);
        let (job, _receiver) = job(&fixture, source, CancellationFlag::new());
        assert!(matches!(
            job.run(),
            JobOutcome::Failed {
                code: ErrorCode::InvalidSource,
                ..
            }
        ));
    }

    #[test]
    fn test_missing_source() {
        let fixture = fixture();
        let (job, _receiver) = job(
            &fixture,
            MediaSource::File("absent.mp4".into()),
            CancellationFlag::new(),
        );
        assert!(matches!(
            job.run(),
            JobOutcome::Failed {
                code: ErrorCode::SourceNotFound,
                ..
            }
        ));
    }

    #[test]
    fn test_cancelled_job_reports_nothing() {
        let fixture = fixture();
        let source = fixture
            .library
            .insert("big.mp4", MemoryMedia::video(1920, 1080, 6_220_800, 1_000, 30));
        let cancel = CancellationFlag::new();
        cancel.cancel();
        let (job, mut receiver) = job(&fixture, source, cancel);

        assert_eq!(job.run(), JobOutcome::Cancelled);
        assert!(events(&mut receiver).is_empty());
        assert!(!fixture.dir.path().join("out").join("small.mp4").exists());
    }

    #[test]
    fn test_finished_job_refuses_late_cancel() {
        let fixture = fixture();
        let source = fixture
            .library
            .insert("big.mp4", MemoryMedia::video(1920, 1080, 6_220_800, 500, 10));
        let cancel = CancellationFlag::new();
        let (job, mut receiver) = job(&fixture, source, cancel.clone());

        let JobOutcome::Completed { output } = job.run() else {
            panic!("job did not complete");
        };
        assert!(!cancel.cancel());
        assert!(output.exists());
        assert_eq!(events(&mut receiver).iter().filter(|e| e.is_terminal()).count(), 1);
    }

    struct PanickingProbe;

    impl MetadataSource for PanickingProbe {
        fn probe(&self, _source: &MediaSource) -> Result<VideoMetadata, DomainError> {
            panic!("probe exploded")
        }
    }

    #[test]
    fn test_panic_is_reported_as_generic_error() {
        let mut fixture = fixture();
        fixture.ports.metadata = Arc::new(PanickingProbe);
        let (job, mut receiver) = job(
            &fixture,
            MediaSource::File("any.mp4".into()),
            CancellationFlag::new(),
        );

        let JobOutcome::Failed { code, message } = job.run() else {
            panic!("panic was not caught");
        };
        assert_eq!(code, ErrorCode::GenericError);
        assert!(message.contains("probe exploded"));
        assert_eq!(events(&mut receiver).len(), 1);
    }
}
