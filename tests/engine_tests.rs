//! Integration tests for the compress service over the in-memory backend

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tempfile::TempDir;

use compressx_cli::adapters::memory::{
    memory_ports, CodecOptions, MemoryCodecs, MemoryLibrary, MemoryMedia, MuxedMovie,
};
use compressx_cli::domain::model::keys;
use compressx_cli::*;

// Test utilities

#[derive(Debug, Clone, PartialEq)]
enum Recorded {
    Progress(f32),
    Complete(PathBuf),
    Error(ErrorCode, String),
}

/// Callback recording every notification in arrival order
#[derive(Default)]
struct Recorder {
    events: Mutex<Vec<Recorded>>,
}

impl Recorder {
    fn events(&self) -> Vec<Recorded> {
        self.events.lock().clone()
    }

    fn progress(&self) -> Vec<f32> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                Recorded::Progress(percent) => Some(percent),
                _ => None,
            })
            .collect()
    }

    fn terminal(&self) -> Vec<Recorded> {
        self.events()
            .into_iter()
            .filter(|event| !matches!(event, Recorded::Progress(_)))
            .collect()
    }
}

impl CompressCallback for Recorder {
    fn on_progress(&self, percent: f32) {
        self.events.lock().push(Recorded::Progress(percent));
    }

    fn on_complete(&self, output: &Path) {
        self.events.lock().push(Recorded::Complete(output.to_path_buf()));
    }

    fn on_error(&self, code: ErrorCode, message: &str) {
        self.events
            .lock()
            .push(Recorded::Error(code, message.to_string()));
    }
}

struct Harness {
    library: Arc<MemoryLibrary>,
    service: CompressService,
    dir: TempDir,
}

impl Harness {
    fn new() -> Self {
        Self::with_codecs(CodecOptions::default(), 2)
    }

    fn with_codecs(options: CodecOptions, max_concurrent: usize) -> Self {
        let library = Arc::new(MemoryLibrary::new());
        let ports = memory_ports(Arc::clone(&library), Arc::new(MemoryCodecs::new(options)));
        let service = CompressService::new(
            ports,
            Arc::new(LowQualityStrategy),
            EngineConfig::default(),
            max_concurrent,
        )
        .unwrap();
        Self {
            library,
            service,
            dir: TempDir::new().unwrap(),
        }
    }

    fn submit(&self, source: MediaSource, name: &str) -> (JobTicket, Arc<Recorder>) {
        let recorder = Arc::new(Recorder::default());
        let request = CompressRequest::new(source, self.dir.path(), name);
        let ticket = self
            .service
            .submit(request, Arc::clone(&recorder) as Arc<dyn CompressCallback>);
        (ticket, recorder)
    }

    fn output(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }
}

fn hd_source() -> MemoryMedia {
    MemoryMedia::video(1920, 1080, 6_220_800, 1_000, 30).with_audio(40, 200)
}

// Transcode

#[tokio::test]
async fn test_transcode_delivers_one_completion() {
    let harness = Harness::new();
    let source = harness.library.insert("hd.mp4", hd_source());
    let (ticket, recorder) = harness.submit(source, "hd_small.mp4");

    let outcome = ticket.wait().await;
    let output = harness.output("hd_small.mp4");
    assert_eq!(outcome, JobOutcome::Completed { output: output.clone() });
    assert_eq!(recorder.terminal(), vec![Recorded::Complete(output.clone())]);

    let movie = MuxedMovie::read(&output).unwrap();
    let video = &movie.tracks[0];
    assert!(!video.is_audio);
    assert_eq!(video.format.get_int(keys::WIDTH), Some(1280));
    assert_eq!(video.format.get_int(keys::HEIGHT), Some(720));
    assert_eq!(video.samples.len(), 30);
    assert!(movie.tracks[1].is_audio);
    assert_eq!(movie.tracks[1].samples.len(), 40);
}

#[tokio::test]
async fn test_progress_is_monotonic_and_bounded() {
    let harness = Harness::new();
    let source = harness.library.insert("hd.mp4", hd_source());
    let (ticket, recorder) = harness.submit(source, "out.mp4");
    assert!(ticket.wait().await.is_success());

    let progress = recorder.progress();
    assert!(!progress.is_empty());
    assert!(progress.windows(2).all(|pair| pair[0] <= pair[1]));
    assert!(progress.iter().all(|percent| (0.0..=100.0).contains(percent)));

    // Every progress event comes before the terminal one
    assert!(matches!(recorder.events().last(), Some(Recorded::Complete(_))));
}

#[tokio::test]
async fn test_rotated_source_gets_portrait_output() {
    let harness = Harness::new();
    let source = harness.library.insert(
        "portrait.mp4",
        MemoryMedia::video(1920, 1080, 6_220_800, 500, 15).with_rotation(270),
    );
    let (ticket, _recorder) = harness.submit(source, "portrait_small.mp4");
    let JobOutcome::Completed { output } = ticket.wait().await else {
        panic!("rotated source failed");
    };

    let movie = MuxedMovie::read(&output).unwrap();
    assert_eq!(movie.rotation, 0);
    assert_eq!(movie.tracks[0].format.get_int(keys::WIDTH), Some(720));
    assert_eq!(movie.tracks[0].format.get_int(keys::HEIGHT), Some(1280));
}

// Passthrough

#[tokio::test]
async fn test_passthrough_is_byte_identical() {
    let harness = Harness::new();
    let media = MemoryMedia::video(480, 360, 129_600, 2_000, 60).with_bytes(50_000);
    let expected = media.bytes().to_vec();
    let source = harness.library.insert("small.mp4", media);
    let (ticket, recorder) = harness.submit(source, "copy.mp4");

    assert!(ticket.wait().await.is_success());
    assert_eq!(fs::read(harness.output("copy.mp4")).unwrap(), expected);
    assert_eq!(recorder.terminal().len(), 1);
}

// Failures

#[tokio::test]
async fn test_error_codes_and_cleanup() {
    let harness = Harness::new();
    let audio_only = harness.library.insert("audio.mp4", hd_source().without_video());
    let zero = harness.library.insert(
        "zero.mp4",
        hd_source().with_metadata(VideoMetadata {
            width: 0,
            height: 1080,
            bitrate: 1_000_000,
            ..VideoMetadata::default()
        }),
    );
    let missing = MediaSource::parse("/nowhere/missing.mp4");

    let cases = [
        (audio_only, "audio_out.mp4", ErrorCode::VideoTrackNotFound),
        (zero, "zero_out.mp4", ErrorCode::InvalidSource),
        (missing, "missing_out.mp4", ErrorCode::SourceNotFound),
    ];
    for (source, name, expected) in cases {
        let (ticket, recorder) = harness.submit(source, name);
        let outcome = ticket.wait().await;
        assert!(
            matches!(&outcome, JobOutcome::Failed { code, .. } if *code == expected),
            "{} gave {:?}",
            name,
            outcome
        );
        assert!(!harness.output(name).exists(), "{} left output behind", name);

        let terminal = recorder.terminal();
        assert_eq!(terminal.len(), 1);
        assert!(matches!(&terminal[0], Recorded::Error(code, _) if *code == expected));
    }
}

#[tokio::test]
async fn test_missing_codecs_are_reported() {
    let no_encoder = Harness::with_codecs(
        CodecOptions {
            encoder_available: false,
            ..CodecOptions::default()
        },
        1,
    );
    let source = no_encoder.library.insert("hd.mp4", hd_source());
    let (ticket, _recorder) = no_encoder.submit(source, "out.mp4");
    assert!(matches!(
        ticket.wait().await,
        JobOutcome::Failed {
            code: ErrorCode::EncoderNotFound,
            ..
        }
    ));
    assert!(!no_encoder.output("out.mp4").exists());

    let no_decoder = Harness::with_codecs(
        CodecOptions {
            decoder_available: false,
            ..CodecOptions::default()
        },
        1,
    );
    let source = no_decoder.library.insert("hd.mp4", hd_source());
    let (ticket, _recorder) = no_decoder.submit(source, "out.mp4");
    assert!(matches!(
        ticket.wait().await,
        JobOutcome::Failed {
            code: ErrorCode::DecoderNotFound,
            ..
        }
    ));
}

// Cancellation

#[tokio::test]
async fn test_cancel_mid_transcode() {
    let harness = Harness::with_codecs(
        CodecOptions {
            frame_delay: Some(Duration::from_millis(20)),
            ..CodecOptions::default()
        },
        1,
    );
    let source = harness
        .library
        .insert("long.mp4", MemoryMedia::video(1920, 1080, 6_220_800, 4_000, 120));
    let (ticket, recorder) = harness.submit(source, "long_small.mp4");
    let id = ticket.id();

    let deadline = Instant::now() + Duration::from_secs(10);
    while recorder.progress().is_empty() {
        assert!(Instant::now() < deadline, "no progress before deadline");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(harness.service.cancel(id));
    assert!(!harness.service.is_registered(id));
    let seen_at_cancel = recorder.events().len();

    assert_eq!(ticket.wait().await, JobOutcome::Cancelled);
    assert!(recorder.terminal().is_empty());
    assert_eq!(recorder.events().len(), seen_at_cancel);
    assert!(!harness.output("long_small.mp4").exists());
    assert!(!harness.service.cancel(id));
}

#[tokio::test]
async fn test_cancel_after_completion_is_refused() {
    let harness = Harness::with_codecs(
        CodecOptions {
            frame_delay: Some(Duration::from_millis(5)),
            ..CodecOptions::default()
        },
        1,
    );
    let source = harness.library.insert("hd.mp4", hd_source());
    let (ticket, recorder) = harness.submit(source, "done.mp4");
    let id = ticket.id();

    let state_of = |harness: &Harness| {
        harness
            .service
            .running_jobs()
            .into_iter()
            .find(|(job, _)| *job == id)
            .map(|(_, state)| state)
    };

    // Let the worker start, then hold the runtime so it cannot unregister the job
    let deadline = Instant::now() + Duration::from_secs(10);
    while state_of(&harness) != Some(JobState::Transcoding) {
        assert!(Instant::now() < deadline, "job never started transcoding");
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    while state_of(&harness) != Some(JobState::Completed) {
        assert!(Instant::now() < deadline, "job never completed");
        assert!(state_of(&harness).is_some(), "job unregistered while the runtime was held");
        std::thread::sleep(Duration::from_millis(1));
    }

    assert!(!harness.service.cancel(id));
    let output = harness.output("done.mp4");
    assert_eq!(ticket.wait().await, JobOutcome::Completed { output: output.clone() });
    assert!(output.exists());
    assert_eq!(recorder.terminal(), vec![Recorded::Complete(output)]);
}

#[tokio::test]
async fn test_cancel_all_while_queued() {
    let harness = Harness::with_codecs(
        CodecOptions {
            frame_delay: Some(Duration::from_millis(10)),
            ..CodecOptions::default()
        },
        1,
    );
    let mut tickets = Vec::new();
    for name in ["a", "b", "c"] {
        let source = harness.library.insert(
            &format!("{}.mp4", name),
            MemoryMedia::video(1920, 1080, 6_220_800, 2_000, 60),
        );
        tickets.push(harness.submit(source, &format!("{}_out.mp4", name)));
    }

    assert_eq!(harness.service.cancel_all(), 3);
    for (ticket, recorder) in tickets {
        assert_eq!(ticket.wait().await, JobOutcome::Cancelled);
        assert!(recorder.terminal().is_empty());
    }
    assert!(harness.service.running_jobs().is_empty());
}

// Registry

#[tokio::test]
async fn test_ids_increase_and_jobs_unregister() {
    let harness = Harness::with_codecs(CodecOptions::default(), 1);
    let mut tickets = Vec::new();
    for name in ["one", "two", "three"] {
        let source = harness.library.insert(
            &format!("{}.mp4", name),
            MemoryMedia::video(480, 360, 129_600, 500, 5),
        );
        tickets.push(harness.submit(source, &format!("{}_out.mp4", name)).0);
    }

    let ids: Vec<u64> = tickets.iter().map(|ticket| ticket.id().0).collect();
    assert_eq!(ids, vec![1, 2, 3]);

    for ticket in tickets {
        assert!(ticket.wait().await.is_success());
    }
    assert!(harness.service.running_jobs().is_empty());
    assert!(!harness.service.cancel(JobId(2)));
}

#[tokio::test]
async fn test_request_strategy_overrides_default() {
    let harness = Harness::new();
    let source = harness.library.insert("hd.mp4", hd_source());
    let recorder = Arc::new(Recorder::default());
    let strategy = FixedTargetStrategy::new(domain::model::ResolutionTier::P480, 1.0).unwrap();
    let request = CompressRequest::new(source, harness.dir.path(), "fixed.mp4")
        .with_strategy(Arc::new(strategy));

    let ticket = harness
        .service
        .submit(request, Arc::clone(&recorder) as Arc<dyn CompressCallback>);
    let JobOutcome::Completed { output } = ticket.wait().await else {
        panic!("fixed-target job failed");
    };
    let movie = MuxedMovie::read(&output).unwrap();
    // 480p caps the longer side at 640
    assert_eq!(movie.tracks[0].format.get_int(keys::WIDTH), Some(640));
    assert_eq!(movie.tracks[0].format.get_int(keys::HEIGHT), Some(360));
}
