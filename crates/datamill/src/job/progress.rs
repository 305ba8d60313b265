//! Progress snapshots derived from a job record.

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::model::{JobStatus, ProcessingJob, StageTag};

/// Point-in-time view of a job's progress.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressSnapshot {
    pub job_id: String,
    pub status: JobStatus,
    pub current_stage: Option<StageTag>,
    pub overall_progress: u8,
    pub processed_records: u64,
    pub total_records: u64,
    /// Whole seconds; `None` when no estimate is possible.
    pub estimated_time_remaining: Option<u64>,
    pub pii_detected_count: Option<u64>,
}

impl ProgressSnapshot {
    pub fn compute(job: &ProcessingJob, now: DateTime<Utc>) -> Self {
        let estimated_time_remaining = if job.status == JobStatus::Processing {
            job.started_at
                .and_then(|started_at| estimate_remaining_secs(started_at, job.progress, now))
        } else {
            None
        };

        Self {
            job_id: job.id.clone(),
            status: job.status,
            current_stage: job.current_stage,
            overall_progress: job.progress,
            processed_records: processed_records(job.input_record_count, job.progress),
            total_records: job.input_record_count,
            estimated_time_remaining,
            pii_detected_count: job.pii_detected_count,
        }
    }
}

/// `round(total * progress / 100)`.
pub fn processed_records(total: u64, progress: u8) -> u64 {
    (total as f64 * f64::from(progress.min(100)) / 100.0).round() as u64
}

/// Linear extrapolation from elapsed time:
/// `estimated_total = elapsed / (progress / 100)`,
/// `remaining = max(0, estimated_total - elapsed)`.
///
/// At constant progress the estimate grows with elapsed time; only a higher
/// progress lowers it. Returns `None` when progress is zero.
pub fn estimate_remaining_secs(
    started_at: DateTime<Utc>,
    progress: u8,
    now: DateTime<Utc>,
) -> Option<u64> {
    if progress == 0 {
        return None;
    }
    let elapsed_ms = (now - started_at).num_milliseconds().max(0) as f64;
    let estimated_total_ms = elapsed_ms / (f64::from(progress.min(100)) / 100.0);
    let remaining_ms = (estimated_total_ms - elapsed_ms).max(0.0);
    Some((remaining_ms / 1000.0).round() as u64)
}
