use std::sync::Arc;

use tokio::sync::broadcast;

use crate::broadcast::job_progress::{JobProgressEvent, JobProgressTracker};
use crate::job::StageTag;

/// Events emitted by the pipeline during a run.
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    Stage {
        stage: StageTag,
        progress: u8,
        message: String,
    },
    Completed {
        dataset_path: String,
        output_record_count: u64,
        pii_detected_count: u64,
    },
    Failed {
        stage: Option<StageTag>,
        progress: u8,
        error: String,
    },
    Cancelled {
        stage: Option<StageTag>,
        progress: u8,
    },
}

pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: ProgressEvent);
}

/// Drops every event. Used when nobody subscribes to progress.
pub struct NoopProgress;

impl ProgressReporter for NoopProgress {
    fn report(&self, _event: ProgressEvent) {}
}

/// Bridges pipeline events to the broadcast channel.
pub struct BroadcastProgress {
    tracker: JobProgressTracker,
}

impl BroadcastProgress {
    pub fn new(job_id: &str, sender: Arc<broadcast::Sender<JobProgressEvent>>) -> Self {
        Self {
            tracker: JobProgressTracker::new(job_id, sender),
        }
    }
}

impl ProgressReporter for BroadcastProgress {
    fn report(&self, event: ProgressEvent) {
        match event {
            ProgressEvent::Stage {
                stage,
                progress,
                message,
            } => self.tracker.update_stage(stage, progress, &message),
            ProgressEvent::Completed {
                dataset_path,
                output_record_count,
                pii_detected_count,
            } => self
                .tracker
                .completed(&dataset_path, output_record_count, pii_detected_count),
            ProgressEvent::Failed {
                stage,
                progress,
                error,
            } => self.tracker.failed(stage, progress, &error),
            ProgressEvent::Cancelled { stage, progress } => {
                self.tracker.cancelled(stage, progress)
            }
        }
    }
}
