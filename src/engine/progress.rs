//! Progress and terminal notifications for a single job
//!
//! The worker never calls user callbacks directly. It pushes [`JobEvent`]s into
//! a per-job channel that a dispatcher task drains. The notifier enforces the
//! delivery contract on the producing side: progress is clamped to 0..=100 and
//! never goes backwards, at most one terminal event is sent, and nothing is
//! sent once the job has been silenced by a cancel.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::debug;

use crate::domain::errors::ErrorCode;

/// Event delivered to the job's callback
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum JobEvent {
    Progress(f32),
    Completed(PathBuf),
    Failed { code: ErrorCode, message: String },
}

impl JobEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobEvent::Progress(_))
    }
}

/// Producer side of a job's event channel
pub struct JobNotifier {
    sender: UnboundedSender<JobEvent>,
    silenced: Arc<AtomicBool>,
    last_percent: Mutex<Option<f32>>,
    terminal_sent: AtomicBool,
}

impl JobNotifier {
    pub fn new(sender: UnboundedSender<JobEvent>, silenced: Arc<AtomicBool>) -> Self {
        Self {
            sender,
            silenced,
            last_percent: Mutex::new(None),
            terminal_sent: AtomicBool::new(false),
        }
    }

    /// Notifier with a fresh channel and silence flag
    pub fn channel() -> (Self, UnboundedReceiver<JobEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self::new(sender, Arc::new(AtomicBool::new(false))), receiver)
    }

    /// Flag that, once set, drops every further event
    pub fn silence_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.silenced)
    }

    pub fn is_silenced(&self) -> bool {
        self.silenced.load(Ordering::SeqCst)
    }

    /// Report progress in percent. Returns whether the event was sent.
    pub fn progress(&self, percent: f32) -> bool {
        if !percent.is_finite() || self.is_silenced() || self.terminal_sent.load(Ordering::SeqCst) {
            return false;
        }
        let percent = percent.clamp(0.0, 100.0);

        let mut last = self.last_percent.lock();
        if let Some(previous) = *last {
            if percent <= previous {
                return false;
            }
        }
        *last = Some(percent);
        drop(last);

        self.send(JobEvent::Progress(percent))
    }

    pub fn completed(&self, output: &Path) -> bool {
        self.terminal(JobEvent::Completed(output.to_path_buf()))
    }

    pub fn failed(&self, code: ErrorCode, message: impl Into<String>) -> bool {
        self.terminal(JobEvent::Failed {
            code,
            message: message.into(),
        })
    }

    /// Last progress value that was sent
    pub fn last_progress(&self) -> Option<f32> {
        *self.last_percent.lock()
    }

    fn terminal(&self, event: JobEvent) -> bool {
        if self.terminal_sent.swap(true, Ordering::SeqCst) {
            debug!("dropping second terminal event {:?}", event);
            return false;
        }
        if self.is_silenced() {
            return false;
        }
        self.send(event)
    }

    fn send(&self, event: JobEvent) -> bool {
        // A closed receiver means nobody listens anymore
        self.sender.send(event).is_ok()
    }
}
