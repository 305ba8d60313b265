//! Processing pipeline: claim a pending job, run its stages, record the result.

pub mod codec;
pub mod config;
pub mod pii;
pub mod progress;
pub mod runner;
pub mod stage;
pub mod stages;

pub use config::PipelineConfig;
pub use progress::{BroadcastProgress, NoopProgress, ProgressEvent, ProgressReporter};
pub use runner::{Pipeline, RunOutcome, RunResult};
pub use stage::{Artifact, Stage, StageContext, StageError, StageOutcome};
