//! Download queue manager
//!
//! Accepts job submissions, runs a bounded number of jobs concurrently,
//! reports per-job progress, and finalizes each job's outcome. Jobs start
//! in FIFO submission order subject to capacity; completion order is
//! unspecified.
//!
//! # Concurrency model
//!
//! - Single long-lived runner woken by `Notify` whenever work may exist
//! - One worker task per running job, bounded by `max_concurrent`
//! - Workers report through a `watch` channel; a bridge task folds updates
//!   into the job record and the broadcast event stream
//! - Cancellation is cooperative via `CancellationToken`, with a grace
//!   deadline after which the worker is aborted outright
//! - All job records live behind one mutex; workers never touch another
//!   worker's job

use crate::error::QueueError;
use crate::job::{normalize_source, Job, JobId, JobProgress, JobRequest, JobStatus};
use crate::pipeline::{run_job, PipelineError, ProgressUpdate, WorkerDeps};
use chrono::Utc;
use futures::FutureExt;
use std::collections::{HashMap, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch, Mutex, Notify};
use tokio::task::AbortHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Maximum jobs running at once.
    pub max_concurrent: usize,
    /// How long a cancelled job may keep running before its worker is
    /// force-aborted.
    pub cancel_grace: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 2,
            cancel_grace: Duration::from_secs(5),
        }
    }
}

/// Push notifications for subscribers; polling `progress` works without
/// them.
#[derive(Debug, Clone)]
pub enum QueueEvent {
    Submitted { id: JobId },
    Started { id: JobId },
    Progress {
        id: JobId,
        fraction: f32,
        title: Option<String>,
    },
    Finished { id: JobId, status: JobStatus },
}

enum Outcome {
    Succeeded,
    Failed(String),
    Cancelled,
}

struct ActiveWorker {
    cancel: CancellationToken,
    abort: Option<AbortHandle>,
}

#[derive(Default)]
struct QueueState {
    jobs: HashMap<JobId, Job>,
    /// Submission order, for snapshots.
    order: Vec<JobId>,
    /// Ids still waiting to run, FIFO.
    pending: VecDeque<JobId>,
    active: HashMap<JobId, ActiveWorker>,
}

pub struct QueueManager {
    state: Mutex<QueueState>,
    notify: Notify,
    events: broadcast::Sender<QueueEvent>,
    config: QueueConfig,
    deps: WorkerDeps,
    runner_started: AtomicBool,
    shutting_down: AtomicBool,
    next_position: AtomicU64,
}

impl QueueManager {
    pub fn new(config: QueueConfig, deps: WorkerDeps) -> Arc<Self> {
        let (events, _) = broadcast::channel(256);
        Arc::new(Self {
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
            events,
            config,
            deps,
            runner_started: AtomicBool::new(false),
            shutting_down: AtomicBool::new(false),
            next_position: AtomicU64::new(0),
        })
    }

    /// Start the scheduler. Safe to call more than once.
    pub fn start(self: &Arc<Self>) {
        if self.runner_started.swap(true, Ordering::SeqCst) {
            return;
        }

        let this = Arc::clone(self);
        tokio::spawn(async move {
            info!(
                "Queue runner started (max {} concurrent)",
                this.config.max_concurrent
            );
            loop {
                if this.shutting_down.load(Ordering::SeqCst) {
                    break;
                }
                this.fill_capacity().await;
                this.notify.notified().await;
            }
            debug!("Queue runner stopped");
        });
    }

    /// Validate and enqueue a request. Returns the new job's id.
    pub async fn submit(&self, mut request: JobRequest) -> Result<JobId, QueueError> {
        if request.source.trim().is_empty() {
            return Err(QueueError::InvalidRequest(
                "source must not be empty".to_string(),
            ));
        }
        request.source = normalize_source(&request.source);

        let position = self.next_position.fetch_add(1, Ordering::Relaxed);
        let job = Job::new(request, position);
        let id = job.id;

        {
            let mut state = self.state.lock().await;
            state.order.push(id);
            state.pending.push_back(id);
            state.jobs.insert(id, job);
        }

        debug!("Job {} queued", id);
        self.emit(QueueEvent::Submitted { id });
        self.notify.notify_one();
        Ok(id)
    }

    /// Cancel a job. Queued jobs go straight to `Cancelled`; running jobs
    /// are asked to stop and force-aborted after the grace period.
    /// Already-terminal jobs are left untouched.
    pub async fn cancel(self: &Arc<Self>, id: &JobId) -> Result<(), QueueError> {
        let mut state = self.state.lock().await;
        let job = state
            .jobs
            .get_mut(id)
            .ok_or(QueueError::NotFound(*id))?;

        match job.status {
            JobStatus::Queued => {
                job.status = JobStatus::Cancelled;
                job.finished_at = Some(Utc::now());
                state.pending.retain(|p| p != id);
                drop(state);

                info!("Cancelled queued job {}", id);
                self.emit(QueueEvent::Finished {
                    id: *id,
                    status: JobStatus::Cancelled,
                });
                self.notify.notify_one();
            }
            JobStatus::Running => {
                if let Some(worker) = state.active.get(id) {
                    worker.cancel.cancel();
                    let abort = worker.abort.clone();
                    drop(state);

                    info!("Cancellation requested for running job {}", id);
                    self.spawn_cancel_deadline(*id, abort);
                }
            }
            _ => {}
        }

        Ok(())
    }

    /// Current status and progress fraction for a job.
    pub async fn progress(&self, id: &JobId) -> Result<JobProgress, QueueError> {
        let state = self.state.lock().await;
        let job = state.jobs.get(id).ok_or(QueueError::NotFound(*id))?;
        Ok(JobProgress {
            status: job.status,
            fraction: job.progress,
        })
    }

    /// Snapshot of all jobs in submission order.
    pub async fn jobs(&self) -> Vec<Job> {
        let state = self.state.lock().await;
        state
            .order
            .iter()
            .filter_map(|id| state.jobs.get(id))
            .cloned()
            .collect()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.events.subscribe()
    }

    /// Whether every submitted job has reached a terminal state.
    pub async fn is_drained(&self) -> bool {
        let state = self.state.lock().await;
        state.pending.is_empty() && state.active.is_empty()
    }

    /// Drain the queue: cancel still-queued jobs, ask running jobs to
    /// stop, and abort whatever is left when the grace period ends.
    pub async fn shutdown(self: &Arc<Self>, grace: Duration) {
        self.shutting_down.store(true, Ordering::SeqCst);
        self.notify.notify_one();

        let cancelled_pending: Vec<JobId> = {
            let mut state = self.state.lock().await;
            let pending: Vec<JobId> = state.pending.drain(..).collect();
            for id in &pending {
                if let Some(job) = state.jobs.get_mut(id) {
                    job.status = JobStatus::Cancelled;
                    job.finished_at = Some(Utc::now());
                }
            }
            for worker in state.active.values() {
                worker.cancel.cancel();
            }
            pending
        };

        for id in cancelled_pending {
            self.emit(QueueEvent::Finished {
                id,
                status: JobStatus::Cancelled,
            });
        }

        let deadline = tokio::time::Instant::now() + grace;
        loop {
            if self.state.lock().await.active.is_empty() {
                info!("Queue drained");
                return;
            }
            if tokio::time::Instant::now() >= deadline {
                break;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }

        let leftovers: Vec<(JobId, Option<AbortHandle>)> = {
            let state = self.state.lock().await;
            state
                .active
                .iter()
                .map(|(id, w)| (*id, w.abort.clone()))
                .collect()
        };
        for (id, abort) in leftovers {
            warn!("Force-terminating job {}", id);
            if let Some(abort) = abort {
                abort.abort();
            }
            self.finalize(&id, Outcome::Cancelled).await;
        }
    }

    /// Spawn workers while capacity is free and queued jobs exist.
    async fn fill_capacity(self: &Arc<Self>) {
        loop {
            let next = {
                let mut state = self.state.lock().await;
                if state.active.len() >= self.config.max_concurrent {
                    return;
                }
                let Some(id) = state.pending.pop_front() else {
                    return;
                };
                let Some(job) = state.jobs.get_mut(&id) else {
                    continue;
                };
                if job.status != JobStatus::Queued {
                    continue;
                }

                job.status = JobStatus::Running;
                let cancel = CancellationToken::new();
                let request = job.request.clone();
                state.active.insert(
                    id,
                    ActiveWorker {
                        cancel: cancel.clone(),
                        abort: None,
                    },
                );
                (id, request, cancel)
            };

            let (id, request, cancel) = next;
            debug!("Job {} started", id);
            self.emit(QueueEvent::Started { id });

            let handle = tokio::spawn(Arc::clone(self).worker(id, request, cancel));
            {
                let mut state = self.state.lock().await;
                if let Some(worker) = state.active.get_mut(&id) {
                    worker.abort = Some(handle.abort_handle());
                }
            }
        }
    }

    /// One worker: runs the pipeline, bridges its progress into the job
    /// record, and finalizes. A panic inside the pipeline is observed as
    /// a failure, not a wedged `Running` job.
    async fn worker(self: Arc<Self>, id: JobId, request: JobRequest, cancel: CancellationToken) {
        let (progress_tx, mut progress_rx) = watch::channel(ProgressUpdate::default());

        let bridge = {
            let this = Arc::clone(&self);
            tokio::spawn(async move {
                while progress_rx.changed().await.is_ok() {
                    let update = progress_rx.borrow().clone();
                    {
                        let mut state = this.state.lock().await;
                        if let Some(job) = state.jobs.get_mut(&id) {
                            if !job.status.is_terminal() {
                                job.progress = update.fraction;
                                if job.title.is_none() {
                                    job.title = update.title.clone();
                                }
                            }
                        }
                    }
                    this.emit(QueueEvent::Progress {
                        id,
                        fraction: update.fraction,
                        title: update.title,
                    });
                }
            })
        };

        let result = AssertUnwindSafe(run_job(&request, &self.deps, &progress_tx, &cancel))
            .catch_unwind()
            .await;
        drop(progress_tx);
        let _ = bridge.await;

        let outcome = match result {
            Ok(Ok(entry)) => {
                debug!("Job {} produced {}", id, entry.path.display());
                Outcome::Succeeded
            }
            Ok(Err(PipelineError::Cancelled)) => Outcome::Cancelled,
            Ok(Err(e)) => Outcome::Failed(e.to_string()),
            Err(_) => Outcome::Failed("worker panicked".to_string()),
        };

        self.finalize(&id, outcome).await;
    }

    /// Apply a terminal outcome. Returns quietly if the job already
    /// reached a terminal state (e.g. the cancel deadline fired first).
    async fn finalize(&self, id: &JobId, outcome: Outcome) {
        let status = match &outcome {
            Outcome::Succeeded => JobStatus::Succeeded,
            Outcome::Failed(_) => JobStatus::Failed,
            Outcome::Cancelled => JobStatus::Cancelled,
        };

        let applied = {
            let mut state = self.state.lock().await;
            state.active.remove(id);
            match state.jobs.get_mut(id) {
                Some(job) if job.status.can_transition(status) => {
                    job.status = status;
                    job.finished_at = Some(Utc::now());
                    match outcome {
                        Outcome::Succeeded => job.progress = 1.0,
                        Outcome::Failed(message) => {
                            warn!("Job {} failed: {}", id, message);
                            job.error = Some(message);
                        }
                        Outcome::Cancelled => {}
                    }
                    true
                }
                _ => false,
            }
        };

        if applied {
            info!("Job {} finished: {}", id, status);
            self.emit(QueueEvent::Finished { id: *id, status });
        }
        self.notify.notify_one();
    }

    /// After the grace period, a cancelled job that is still running gets
    /// its worker aborted and is marked `Cancelled` here.
    fn spawn_cancel_deadline(self: &Arc<Self>, id: JobId, abort: Option<AbortHandle>) {
        let this = Arc::clone(self);
        let grace = self.config.cancel_grace;
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            let still_active = this.state.lock().await.active.contains_key(&id);
            if still_active {
                warn!("Job {} ignored cancellation, force-terminating", id);
                if let Some(abort) = abort {
                    abort.abort();
                }
                this.finalize(&id, Outcome::Cancelled).await;
            }
        });
    }

    fn emit(&self, event: QueueEvent) {
        let _ = self.events.send(event);
    }
}
