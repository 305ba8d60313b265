//! Job progress broadcaster for real-time job status streaming.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;

use crate::job::{JobStatus, StageTag};

/// Progress event for a job.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobProgressEvent {
    /// Unique job identifier.
    pub job_id: String,
    /// Job status at the time of the event.
    pub status: JobStatus,
    /// Stage the job is in, if any.
    pub stage: Option<StageTag>,
    /// Overall progress percentage.
    pub progress: u8,
    /// Human-readable message describing current activity.
    pub message: String,
    /// Timestamp of this event.
    pub timestamp: DateTime<Utc>,
    /// Dataset file (set on completion).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dataset_path: Option<String>,
    /// Records written to the dataset (set on completion).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_record_count: Option<u64>,
    /// PII findings (set on completion).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pii_detected_count: Option<u64>,
    /// Error message (set on failure).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl JobProgressEvent {
    /// Creates a new progress event.
    pub fn new(
        job_id: &str,
        status: JobStatus,
        stage: Option<StageTag>,
        progress: u8,
        message: &str,
    ) -> Self {
        Self {
            job_id: job_id.to_string(),
            status,
            stage,
            progress,
            message: message.to_string(),
            timestamp: Utc::now(),
            dataset_path: None,
            output_record_count: None,
            pii_detected_count: None,
            error: None,
        }
    }

    /// Creates a completion event.
    pub fn completed(
        job_id: &str,
        dataset_path: &str,
        output_record_count: u64,
        pii_detected_count: u64,
    ) -> Self {
        Self {
            dataset_path: Some(dataset_path.to_string()),
            output_record_count: Some(output_record_count),
            pii_detected_count: Some(pii_detected_count),
            ..Self::new(
                job_id,
                JobStatus::Completed,
                None,
                100,
                "Processing completed successfully",
            )
        }
    }

    /// Creates a failure event.
    pub fn failed(job_id: &str, stage: Option<StageTag>, progress: u8, error: &str) -> Self {
        Self {
            error: Some(error.to_string()),
            ..Self::new(job_id, JobStatus::Failed, stage, progress, "Processing failed")
        }
    }

    /// Creates a cancellation event.
    pub fn cancelled(job_id: &str, stage: Option<StageTag>, progress: u8) -> Self {
        Self::new(job_id, JobStatus::Cancelled, stage, progress, "Job cancelled")
    }
}

/// Broadcasts job progress events for streaming.
#[derive(Clone)]
pub struct JobProgressBroadcaster {
    sender: Arc<broadcast::Sender<JobProgressEvent>>,
}

impl JobProgressBroadcaster {
    /// Creates a new job progress broadcaster with the specified channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Sends a progress event to all subscribers.
    pub fn send(&self, event: JobProgressEvent) {
        // No active receivers is fine
        let _ = self.sender.send(event);
    }

    /// Creates a new subscriber for progress events.
    pub fn subscribe(&self) -> broadcast::Receiver<JobProgressEvent> {
        self.sender.subscribe()
    }

    /// Creates a tracker for one job.
    pub fn track(&self, job_id: &str) -> JobProgressTracker {
        JobProgressTracker::new(job_id, Arc::clone(&self.sender))
    }

    /// Gets the inner sender for creating trackers.
    pub fn sender(&self) -> Arc<broadcast::Sender<JobProgressEvent>> {
        Arc::clone(&self.sender)
    }
}

impl Default for JobProgressBroadcaster {
    fn default() -> Self {
        Self::new(100)
    }
}

/// Tracks progress for a single job.
pub struct JobProgressTracker {
    job_id: String,
    sender: Arc<broadcast::Sender<JobProgressEvent>>,
}

impl JobProgressTracker {
    pub fn new(job_id: &str, sender: Arc<broadcast::Sender<JobProgressEvent>>) -> Self {
        Self {
            job_id: job_id.to_string(),
            sender,
        }
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// Reports that the job is processing `stage` at `progress` percent.
    pub fn update_stage(&self, stage: StageTag, progress: u8, message: &str) {
        let event = JobProgressEvent::new(
            &self.job_id,
            JobStatus::Processing,
            Some(stage),
            progress,
            message,
        );
        let _ = self.sender.send(event);
    }

    /// Marks the job as completed with result details.
    pub fn completed(&self, dataset_path: &str, output_record_count: u64, pii_detected_count: u64) {
        let event = JobProgressEvent::completed(
            &self.job_id,
            dataset_path,
            output_record_count,
            pii_detected_count,
        );
        let _ = self.sender.send(event);
    }

    /// Marks the job as failed with an error message.
    pub fn failed(&self, stage: Option<StageTag>, progress: u8, error: &str) {
        let event = JobProgressEvent::failed(&self.job_id, stage, progress, error);
        let _ = self.sender.send(event);
    }

    pub fn cancelled(&self, stage: Option<StageTag>, progress: u8) {
        let event = JobProgressEvent::cancelled(&self.job_id, stage, progress);
        let _ = self.sender.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_broadcaster_send_receive() {
        let broadcaster = JobProgressBroadcaster::new(10);
        let mut rx = broadcaster.subscribe();

        broadcaster.send(JobProgressEvent::new(
            "test-job",
            JobStatus::Processing,
            Some(StageTag::Ingest),
            0,
            "Testing",
        ));

        let received = rx.try_recv().unwrap();
        assert_eq!(received.job_id, "test-job");
        assert_eq!(received.status, JobStatus::Processing);
        assert_eq!(received.stage, Some(StageTag::Ingest));
    }

    #[test]
    fn test_tracker_stage_updates() {
        let broadcaster = JobProgressBroadcaster::new(10);
        let mut rx = broadcaster.subscribe();

        let tracker = broadcaster.track("job-1");
        tracker.update_stage(StageTag::Filter, 50, "Filtering records");

        let received = rx.try_recv().unwrap();
        assert_eq!(received.job_id, "job-1");
        assert_eq!(received.stage, Some(StageTag::Filter));
        assert_eq!(received.progress, 50);
        assert_eq!(received.message, "Filtering records");
    }

    #[test]
    fn test_job_completion() {
        let broadcaster = JobProgressBroadcaster::new(10);
        let mut rx = broadcaster.subscribe();

        broadcaster
            .track("job-2")
            .completed("/out/proj/job-2/out.csv", 80, 3);

        let received = rx.try_recv().unwrap();
        assert_eq!(received.status, JobStatus::Completed);
        assert_eq!(received.progress, 100);
        assert_eq!(received.stage, None);
        assert_eq!(
            received.dataset_path.as_deref(),
            Some("/out/proj/job-2/out.csv")
        );
        assert_eq!(received.output_record_count, Some(80));
        assert_eq!(received.pii_detected_count, Some(3));
    }

    #[test]
    fn test_job_failure_and_cancel() {
        let broadcaster = JobProgressBroadcaster::new(10);
        let mut rx = broadcaster.subscribe();
        let tracker = broadcaster.track("job-3");

        tracker.failed(Some(StageTag::Ingest), 0, "data source missing");
        let received = rx.try_recv().unwrap();
        assert_eq!(received.status, JobStatus::Failed);
        assert_eq!(received.error.as_deref(), Some("data source missing"));

        tracker.cancelled(Some(StageTag::Encode), 75);
        let received = rx.try_recv().unwrap();
        assert_eq!(received.status, JobStatus::Cancelled);
        assert_eq!(received.progress, 75);
    }

    #[test]
    fn test_event_serializes_camel_case() {
        let event = JobProgressEvent::completed("job", "/x.json", 1, 0);
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["jobId"], "job");
        assert_eq!(json["status"], "completed");
        assert_eq!(json["outputRecordCount"], 1);
        assert!(json.get("error").is_none());
    }

    #[test]
    fn test_send_without_subscribers() {
        let broadcaster = JobProgressBroadcaster::default();
        broadcaster.send(JobProgressEvent::cancelled("job", None, 0));
    }
}
