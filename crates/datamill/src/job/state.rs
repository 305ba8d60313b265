//! Job state machine.
//!
//! Every transition takes the current job by reference and returns the next
//! job by value. Nothing here touches storage: the caller commits the result
//! through [`JobStore::commit`](super::JobStore::commit), which checks that
//! the row was not changed in between.
//!
//! ```text
//! pending ──start──▶ processing ──complete──▶ completed
//!    │                  │  ▲ advance
//!    │                  ├──fail──▶ failed ──retry──▶ pending
//!    └──cancel──────────┴──cancel──▶ cancelled
//! ```

use chrono::{DateTime, Utc};
use thiserror::Error;

use super::model::{JobStatus, ProcessingJob, StageTag};

/// An attempted transition that the current status does not allow.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionError {
    #[error("only pending jobs can be started (job is {0})")]
    NotPending(JobStatus),

    #[error("only processing jobs can advance or finish (job is {0})")]
    NotProcessing(JobStatus),

    #[error("only pending or processing jobs can be cancelled (job is {0})")]
    NotCancellable(JobStatus),

    #[error("only failed jobs can be retried (job is {0})")]
    NotRetryable(JobStatus),
}

impl TransitionError {
    /// Status the job was in when the transition was attempted.
    pub fn status(&self) -> JobStatus {
        match *self {
            TransitionError::NotPending(s)
            | TransitionError::NotProcessing(s)
            | TransitionError::NotCancellable(s)
            | TransitionError::NotRetryable(s) => s,
        }
    }
}

/// Result counters written when a job completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Completion {
    pub output_record_count: u64,
    pub pii_detected_count: u64,
}

/// `pending -> processing`. Used by the worker claim step.
pub fn start(job: &ProcessingJob, now: DateTime<Utc>) -> Result<ProcessingJob, TransitionError> {
    if job.status != JobStatus::Pending {
        return Err(TransitionError::NotPending(job.status));
    }
    let mut next = job.clone();
    next.status = JobStatus::Processing;
    next.progress = 0;
    next.current_stage = Some(StageTag::Initializing);
    next.started_at = Some(now);
    next.updated_at = now;
    Ok(next)
}

/// `processing -> processing`. Moves the stage tag and raises progress.
///
/// Progress never goes down within a run: a lower value than the current
/// one keeps the current value.
pub fn advance(
    job: &ProcessingJob,
    progress: u8,
    stage: StageTag,
    now: DateTime<Utc>,
) -> Result<ProcessingJob, TransitionError> {
    if job.status != JobStatus::Processing {
        return Err(TransitionError::NotProcessing(job.status));
    }
    let mut next = job.clone();
    next.progress = job.progress.max(progress.min(100));
    next.current_stage = Some(stage);
    next.updated_at = now;
    Ok(next)
}

/// `processing -> completed`.
pub fn complete(
    job: &ProcessingJob,
    completion: Completion,
    now: DateTime<Utc>,
) -> Result<ProcessingJob, TransitionError> {
    if job.status != JobStatus::Processing {
        return Err(TransitionError::NotProcessing(job.status));
    }
    let mut next = job.clone();
    next.status = JobStatus::Completed;
    next.progress = 100;
    next.current_stage = None;
    next.output_record_count = Some(completion.output_record_count);
    next.pii_detected_count = Some(completion.pii_detected_count);
    next.completed_at = Some(now);
    next.updated_at = now;
    Ok(next)
}

/// `processing -> failed`. The current stage is kept so the caller can see
/// where the run stopped.
pub fn fail(
    job: &ProcessingJob,
    message: impl Into<String>,
    now: DateTime<Utc>,
) -> Result<ProcessingJob, TransitionError> {
    if job.status != JobStatus::Processing {
        return Err(TransitionError::NotProcessing(job.status));
    }
    let mut next = job.clone();
    next.status = JobStatus::Failed;
    next.error_message = Some(message.into());
    next.completed_at = Some(now);
    next.updated_at = now;
    Ok(next)
}

/// `pending | processing -> cancelled`.
pub fn cancel(job: &ProcessingJob, now: DateTime<Utc>) -> Result<ProcessingJob, TransitionError> {
    if !matches!(job.status, JobStatus::Pending | JobStatus::Processing) {
        return Err(TransitionError::NotCancellable(job.status));
    }
    let mut next = job.clone();
    next.status = JobStatus::Cancelled;
    next.completed_at = Some(now);
    next.updated_at = now;
    Ok(next)
}

/// `failed -> pending`. Clears every run-scoped field and bumps the attempt
/// number; the job id is kept.
pub fn retry(job: &ProcessingJob, now: DateTime<Utc>) -> Result<ProcessingJob, TransitionError> {
    if job.status != JobStatus::Failed {
        return Err(TransitionError::NotRetryable(job.status));
    }
    let mut next = job.clone();
    next.status = JobStatus::Pending;
    next.progress = 0;
    next.current_stage = None;
    next.error_message = None;
    next.output_record_count = None;
    next.pii_detected_count = None;
    next.started_at = None;
    next.completed_at = None;
    next.attempt = job.attempt.saturating_add(1);
    next.updated_at = now;
    Ok(next)
}

/// Overall progress once `completed` of `total` stages are done:
/// `round(100 * completed / total)`.
pub fn stage_progress(completed: usize, total: usize) -> u8 {
    within_stage_progress(completed, total, 0.0)
}

/// Overall progress while stage `index` (zero-based) reports `fraction`
/// of its own work done.
pub fn within_stage_progress(index: usize, total: usize, fraction: f64) -> u8 {
    if total == 0 {
        return 100;
    }
    let fraction = if fraction.is_finite() {
        fraction.clamp(0.0, 1.0)
    } else {
        0.0
    };
    let done = (index as f64 + fraction).min(total as f64);
    (100.0 * done / total as f64).round() as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::model::{NewJob, OutputFormat};
    use chrono::Duration;

    fn pending_job() -> ProcessingJob {
        ProcessingJob::new(
            NewJob {
                organisation_id: "org".to_string(),
                project_id: "proj".to_string(),
                data_source_id: "ds".to_string(),
                schema_mapping_id: "map".to_string(),
                output_format: OutputFormat::Json,
                output_name: "out".to_string(),
                input_record_count: 100,
            },
            Utc::now(),
        )
    }

    fn processing_job() -> ProcessingJob {
        start(&pending_job(), Utc::now()).unwrap()
    }

    fn failed_job() -> ProcessingJob {
        let job = advance(&processing_job(), 50, StageTag::Filter, Utc::now()).unwrap();
        fail(&job, "stage X crashed", Utc::now()).unwrap()
    }

    fn assert_completed_at_invariant(job: &ProcessingJob) {
        assert_eq!(
            job.completed_at.is_some(),
            job.status.is_terminal(),
            "completed_at must be set iff status is terminal (status {})",
            job.status
        );
    }

    #[test]
    fn test_start_sets_initializing() {
        let now = Utc::now();
        let job = start(&pending_job(), now).unwrap();
        assert_eq!(job.status, JobStatus::Processing);
        assert_eq!(job.current_stage, Some(StageTag::Initializing));
        assert_eq!(job.started_at, Some(now));
        assert_completed_at_invariant(&job);
    }

    #[test]
    fn test_start_only_from_pending() {
        let err = start(&processing_job(), Utc::now()).unwrap_err();
        assert_eq!(err, TransitionError::NotPending(JobStatus::Processing));
    }

    #[test]
    fn test_advance_is_monotonic() {
        let job = processing_job();
        let job = advance(&job, 50, StageTag::Filter, Utc::now()).unwrap();
        assert_eq!(job.progress, 50);

        let job = advance(&job, 25, StageTag::Encode, Utc::now()).unwrap();
        assert_eq!(job.progress, 50);
        assert_eq!(job.current_stage, Some(StageTag::Encode));

        let job = advance(&job, 250, StageTag::Encode, Utc::now()).unwrap();
        assert_eq!(job.progress, 100);
    }

    #[test]
    fn test_complete_sets_results() {
        let job = complete(
            &processing_job(),
            Completion {
                output_record_count: 80,
                pii_detected_count: 3,
            },
            Utc::now(),
        )
        .unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.progress, 100);
        assert_eq!(job.output_record_count, Some(80));
        assert_eq!(job.pii_detected_count, Some(3));
        assert_completed_at_invariant(&job);
    }

    #[test]
    fn test_fail_keeps_stage_and_sets_error() {
        let job = failed_job();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error_message.as_deref(), Some("stage X crashed"));
        assert_eq!(job.current_stage, Some(StageTag::Filter));
        assert!(job.output_record_count.is_none());
        assert_completed_at_invariant(&job);
    }

    #[test]
    fn test_cancel_from_pending_and_processing() {
        for job in [pending_job(), processing_job()] {
            let cancelled = cancel(&job, Utc::now()).unwrap();
            assert_eq!(cancelled.status, JobStatus::Cancelled);
            assert_completed_at_invariant(&cancelled);
        }
    }

    #[test]
    fn test_cancel_rejected_from_terminal_states() {
        let completed = complete(
            &processing_job(),
            Completion {
                output_record_count: 1,
                pii_detected_count: 0,
            },
            Utc::now(),
        )
        .unwrap();
        let cancelled = cancel(&pending_job(), Utc::now()).unwrap();

        for job in [completed, failed_job(), cancelled] {
            let err = cancel(&job, Utc::now()).unwrap_err();
            assert_eq!(err, TransitionError::NotCancellable(job.status));
            assert!(err
                .to_string()
                .contains("only pending or processing jobs can be cancelled"));
        }
    }

    #[test]
    fn test_retry_resets_run_fields() {
        let failed = failed_job();
        let later = Utc::now() + Duration::seconds(5);
        let job = retry(&failed, later).unwrap();

        assert_eq!(job.id, failed.id);
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.progress, 0);
        assert_eq!(job.attempt, 2);
        assert!(job.error_message.is_none());
        assert!(job.current_stage.is_none());
        assert!(job.started_at.is_none());
        assert!(job.output_record_count.is_none());
        assert!(job.pii_detected_count.is_none());
        assert_eq!(job.input_record_count, failed.input_record_count);
        assert_completed_at_invariant(&job);

        let restarted = start(&job, later).unwrap();
        assert_eq!(restarted.status, JobStatus::Processing);
        assert_eq!(restarted.progress, 0);
    }

    #[test]
    fn test_retry_only_from_failed() {
        for job in [pending_job(), processing_job()] {
            let err = retry(&job, Utc::now()).unwrap_err();
            assert_eq!(err, TransitionError::NotRetryable(job.status));
            assert_eq!(err.status(), job.status);
        }
    }

    #[test]
    fn test_finish_requires_processing() {
        let pending = pending_job();
        assert!(fail(&pending, "boom", Utc::now()).is_err());
        assert!(advance(&pending, 10, StageTag::Ingest, Utc::now()).is_err());
        assert!(complete(
            &pending,
            Completion {
                output_record_count: 0,
                pii_detected_count: 0
            },
            Utc::now()
        )
        .is_err());
    }

    #[test]
    fn test_stage_progress_rounding() {
        assert_eq!(stage_progress(0, 4), 0);
        assert_eq!(stage_progress(1, 4), 25);
        assert_eq!(stage_progress(2, 4), 50);
        assert_eq!(stage_progress(1, 3), 33);
        assert_eq!(stage_progress(2, 3), 67);
        assert_eq!(stage_progress(4, 4), 100);
        assert_eq!(stage_progress(0, 0), 100);
    }

    #[test]
    fn test_within_stage_progress() {
        assert_eq!(within_stage_progress(1, 4, 0.5), 38);
        assert_eq!(within_stage_progress(0, 4, 2.0), 25);
        assert_eq!(within_stage_progress(0, 4, f64::NAN), 0);
        assert_eq!(within_stage_progress(3, 4, 1.0), 100);
    }
}
