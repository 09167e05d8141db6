// Compress service - Job registry, worker pool and callback dispatch
//
// Every submitted job gets two tasks on the runtime: a worker that waits for
// a pool permit and runs the job on a blocking thread, and a dispatcher that
// drains the job's event channel into the caller's callback. The worker
// resolves its handle only after the dispatcher delivered every event.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::domain::errors::ErrorCode;
use crate::domain::model::*;
use crate::domain::rules::QualityStrategy;
use crate::engine::{CancellationFlag, CompressJob, CompressRequest, EngineConfig, JobEvent, JobNotifier};
use crate::error::{CompressXError, CompressXResult};
use crate::ports::{CompressCallback, MediaPorts};

/// Registry entry of a job that has not finished yet
struct JobControl {
    cancel: CancellationFlag,
    silenced: Arc<AtomicBool>,
    state: Arc<Mutex<JobState>>,
}

/// Handle to a submitted job
pub struct JobTicket {
    id: JobId,
    handle: JoinHandle<JobOutcome>,
}

impl JobTicket {
    pub fn id(&self) -> JobId {
        self.id
    }

    /// Wait for the outcome. Every callback of the job ran before this returns.
    pub async fn wait(self) -> JobOutcome {
        match self.handle.await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!("job {} task failed: {}", self.id, e);
                JobOutcome::Failed {
                    code: ErrorCode::GenericError,
                    message: format!("job task failed: {}", e),
                }
            }
        }
    }
}

/// Submits, tracks and cancels compression jobs
pub struct CompressService {
    ports: MediaPorts,
    strategy: Arc<dyn QualityStrategy>,
    config: EngineConfig,
    runtime: Handle,
    permits: Arc<Semaphore>,
    jobs: Arc<DashMap<JobId, JobControl>>,
    next_id: AtomicU64,
}

impl CompressService {
    /// Service bound to the current tokio runtime
    pub fn new(
        ports: MediaPorts,
        strategy: Arc<dyn QualityStrategy>,
        config: EngineConfig,
        max_concurrent: usize,
    ) -> CompressXResult<Self> {
        let runtime = Handle::try_current().map_err(|e| CompressXError::Config {
            message: format!("compress service needs a tokio runtime: {}", e),
        })?;
        Ok(Self::with_runtime(runtime, ports, strategy, config, max_concurrent))
    }

    pub fn with_runtime(
        runtime: Handle,
        ports: MediaPorts,
        strategy: Arc<dyn QualityStrategy>,
        config: EngineConfig,
        max_concurrent: usize,
    ) -> Self {
        let workers = max_concurrent.max(1);
        info!("compress service ready with {} workers using {}", workers, strategy.name());
        Self {
            ports,
            strategy,
            config,
            runtime,
            permits: Arc::new(Semaphore::new(workers)),
            jobs: Arc::new(DashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Queue a job. Ids increase monotonically for the life of the service.
    pub fn submit(&self, request: CompressRequest, callback: Arc<dyn CompressCallback>) -> JobTicket {
        let id = JobId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let (sender, receiver) = mpsc::unbounded_channel();
        let silenced = Arc::new(AtomicBool::new(false));
        let notifier = Arc::new(JobNotifier::new(sender, Arc::clone(&silenced)));
        let cancel = CancellationFlag::new();

        debug!("job {} submitted: {:?}", id, request);
        let job = CompressJob::new(
            id,
            request,
            self.ports.clone(),
            Arc::clone(&self.strategy),
            self.config.clone(),
            cancel.clone(),
            notifier,
        );
        self.jobs.insert(
            id,
            JobControl {
                cancel: cancel.clone(),
                silenced: Arc::clone(&silenced),
                state: job.state_handle(),
            },
        );

        let dispatcher = self.runtime.spawn(dispatch(id, receiver, callback, silenced));
        let jobs = Arc::clone(&self.jobs);
        let permits = Arc::clone(&self.permits);
        let handle = self.runtime.spawn(async move {
            let outcome = run_job(job, permits, cancel).await;
            jobs.remove(&id);
            // The job dropped its notifier, so the dispatcher drains and stops
            if let Err(e) = dispatcher.await {
                warn!("job {} dispatcher failed: {}", id, e);
            }
            info!("job {} finished: {:?}", id, outcome.state());
            outcome
        });

        JobTicket { id, handle }
    }

    /// Cancel a job and detach its callback.
    ///
    /// Returns false for unknown jobs and for jobs that already settled their
    /// outcome, even while they are still registered.
    pub fn cancel(&self, id: JobId) -> bool {
        let Some((_, control)) = self.jobs.remove(&id) else {
            return false;
        };
        if !control.cancel.cancel() {
            debug!("job {} settled before the cancel arrived", id);
            return false;
        }
        control.silenced.store(true, Ordering::SeqCst);
        info!("job {} cancelled in state {}", id, *control.state.lock());
        true
    }

    /// Cancel every registered job. Returns how many were cancelled.
    pub fn cancel_all(&self) -> usize {
        let ids: Vec<JobId> = self.jobs.iter().map(|entry| *entry.key()).collect();
        ids.into_iter().filter(|id| self.cancel(*id)).count()
    }

    /// Registered jobs and their current state, ordered by id
    pub fn running_jobs(&self) -> Vec<(JobId, JobState)> {
        let mut jobs: Vec<(JobId, JobState)> = self
            .jobs
            .iter()
            .map(|entry| (*entry.key(), *entry.value().state.lock()))
            .collect();
        jobs.sort_by_key(|(id, _)| *id);
        jobs
    }

    pub fn is_registered(&self, id: JobId) -> bool {
        self.jobs.contains_key(&id)
    }
}

async fn run_job(job: CompressJob, permits: Arc<Semaphore>, cancel: CancellationFlag) -> JobOutcome {
    let id = job.id();
    let permit = match permits.acquire_owned().await {
        Ok(permit) => permit,
        Err(e) => {
            return JobOutcome::Failed {
                code: ErrorCode::GenericError,
                message: format!("worker pool closed: {}", e),
            }
        }
    };
    if cancel.is_cancelled() {
        debug!("job {} cancelled before it started", id);
        return JobOutcome::Cancelled;
    }

    let outcome = match tokio::task::spawn_blocking(move || job.run()).await {
        Ok(outcome) => outcome,
        Err(e) => {
            error!("job {} worker failed: {}", id, e);
            JobOutcome::Failed {
                code: ErrorCode::GenericError,
                message: format!("worker failed: {}", e),
            }
        }
    };
    drop(permit);
    outcome
}

async fn dispatch(
    id: JobId,
    mut receiver: UnboundedReceiver<JobEvent>,
    callback: Arc<dyn CompressCallback>,
    silenced: Arc<AtomicBool>,
) {
    while let Some(event) = receiver.recv().await {
        if silenced.load(Ordering::SeqCst) {
            debug!("job {}: dropping {:?} after cancel", id, event);
            continue;
        }
        match event {
            JobEvent::Progress(percent) => callback.on_progress(percent),
            JobEvent::Completed(output) => callback.on_complete(&output),
            JobEvent::Failed { code, message } => callback.on_error(code, &message),
        }
    }
}
