//! Broadcasting of job progress for real-time streaming.
//!
//! Any integration (an HTTP server-sent-events route, a CLI) can subscribe.

pub mod job_progress;

pub use job_progress::{JobProgressBroadcaster, JobProgressEvent, JobProgressTracker};
