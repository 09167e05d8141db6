//! Core compression engine
//!
//! A job runs synchronously on one blocking worker. It probes the source, asks
//! its quality strategy for a decision and then either copies the file
//! unchanged or drives the transcode pump followed by the audio copier.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

pub mod copy;
pub mod job;
pub mod progress;
pub mod pump;
pub mod tracks;

pub use job::{CompressJob, CompressRequest};
pub use progress::{JobEvent, JobNotifier};
pub use pump::TranscodePump;
pub use tracks::{RoutedTracks, TrackRoute};

/// Engine tuning knobs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Timeout for every codec dequeue, in microseconds
    pub codec_timeout_us: u64,
    /// Chunk size of the whole-file copy
    pub copy_chunk_size: usize,
    /// Audio sample buffer size when the track declares no max input size
    pub audio_buffer_floor: usize,
    /// Mime type requested from the encoder
    pub output_mime: String,
    /// Used when the source track has no frame rate
    pub default_frame_rate: i64,
    /// Used when the source track has no key frame interval, in seconds
    pub default_i_frame_interval: i64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            codec_timeout_us: 100,
            copy_chunk_size: 1024,
            audio_buffer_floor: 64 * 1024,
            output_mime: "video/avc".to_string(),
            default_frame_rate: 30,
            default_i_frame_interval: 1,
        }
    }
}

const RUNNING: u8 = 0;
const CANCELLED: u8 = 1;
const SETTLED: u8 = 2;

/// Cooperative cancellation flag shared between a job and its registry entry.
///
/// A job ends either cancelled or settled, never both: whichever of
/// [`cancel`](Self::cancel) and [`settle`](Self::settle) runs first wins.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicU8>);

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. False once the job settled its outcome.
    pub fn cancel(&self) -> bool {
        match self
            .0
            .compare_exchange(RUNNING, CANCELLED, Ordering::SeqCst, Ordering::SeqCst)
        {
            Ok(_) => true,
            Err(current) => current == CANCELLED,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst) == CANCELLED
    }

    /// Claim the outcome for the job. False when a cancel got there first.
    pub fn settle(&self) -> bool {
        self.0
            .compare_exchange(RUNNING, SETTLED, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    pub fn is_settled(&self) -> bool {
        self.0.load(Ordering::SeqCst) == SETTLED
    }
}

/// How a pipeline stage ended when it did not fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageOutcome {
    Completed,
    Cancelled,
}
