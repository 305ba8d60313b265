//! Hand-off from the controller to whatever executes jobs.

use std::sync::Arc;

use chrono::Utc;
use log::{debug, info, warn};
use serde_json::json;
use tokio::sync::broadcast;

use crate::broadcast::JobProgressEvent;
use crate::error::WorkerError;
use crate::job::{state, JobStore, NewLogEntry, StoreError};
use crate::pipeline::{BroadcastProgress, NoopProgress, Pipeline};

use super::pool::WorkerPool;

/// Accepts a durably `pending` job for execution.
pub trait JobDispatcher: Send + Sync {
    fn dispatch(&self, job_id: &str) -> Result<(), WorkerError>;
}

impl JobDispatcher for WorkerPool {
    fn dispatch(&self, job_id: &str) -> Result<(), WorkerError> {
        self.submit(job_id)
    }
}

/// Runs the job to completion on the calling thread before returning.
pub struct InlineDispatcher {
    pipeline: Arc<Pipeline>,
    progress_sender: Option<Arc<broadcast::Sender<JobProgressEvent>>>,
}

impl InlineDispatcher {
    pub fn new(pipeline: Arc<Pipeline>) -> Self {
        Self {
            pipeline,
            progress_sender: None,
        }
    }

    pub fn with_progress_sender(
        mut self,
        sender: Arc<broadcast::Sender<JobProgressEvent>>,
    ) -> Self {
        self.progress_sender = Some(sender);
        self
    }
}

impl JobDispatcher for InlineDispatcher {
    fn dispatch(&self, job_id: &str) -> Result<(), WorkerError> {
        let result = match self.progress_sender {
            Some(ref sender) => {
                let progress = BroadcastProgress::new(job_id, Arc::clone(sender));
                self.pipeline.run(job_id, &progress)
            }
            None => self.pipeline.run(job_id, &NoopProgress),
        };
        debug!("Inline run of {} ended: {:?}", job_id, result.outcome);
        Ok(())
    }
}

/// Error message given to jobs found `processing` by [`recover_interrupted`].
pub const INTERRUPTED_MESSAGE: &str = "Job was interrupted before it finished";

/// Marks every `processing` job as `failed` so that it can be retried.
///
/// A claimed job whose worker died stays `processing` forever otherwise.
/// Call this once at startup, before the first sweep and while no worker
/// runs against the same database. Returns how many jobs were failed.
pub fn recover_interrupted(store: &JobStore) -> Result<usize, StoreError> {
    let mut recovered = 0;

    for job_id in store.processing_ids()? {
        let job = store.get(&job_id)?;
        let Ok(next) = state::fail(&job, INTERRUPTED_MESSAGE, Utc::now()) else {
            continue;
        };
        let logs = [NewLogEntry::error(&job.id, INTERRUPTED_MESSAGE)
            .with_details(json!({
                "stage": job.current_stage,
                "progress": job.progress,
            }))
            .with_attempt(job.attempt)];

        match store.commit(&job, next, &logs, None) {
            Ok(_) => {
                warn!(
                    "Job {} was left processing at {}%, marked failed",
                    job.id, job.progress
                );
                recovered += 1;
            }
            Err(StoreError::Conflict { .. }) => {
                debug!("Job {} changed during recovery, leaving it", job.id);
            }
            Err(e) => return Err(e),
        }
    }

    if recovered > 0 {
        info!("Recovered {} interrupted jobs", recovered);
    }
    Ok(recovered)
}

/// Dispatches every `pending` job, oldest first.
///
/// Ids the dispatcher already holds are skipped. Stops early when the
/// dispatcher is saturated or closed; the remaining jobs stay `pending` for
/// the next sweep. Returns how many were dispatched.
pub fn sweep_pending(store: &JobStore, dispatcher: &dyn JobDispatcher) -> Result<usize, StoreError> {
    let pending = store.pending_ids()?;
    let mut dispatched = 0;

    for job_id in &pending {
        match dispatcher.dispatch(job_id) {
            Ok(()) => dispatched += 1,
            Err(WorkerError::AlreadyQueued(_)) => {}
            Err(WorkerError::QueueFull) => {
                debug!(
                    "Queue full after {} of {} pending jobs",
                    dispatched,
                    pending.len()
                );
                break;
            }
            Err(e) => {
                warn!("Stopping sweep: {}", e);
                break;
            }
        }
    }

    if dispatched > 0 {
        info!("Dispatched {} pending jobs", dispatched);
    }
    Ok(dispatched)
}
