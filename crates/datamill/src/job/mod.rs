//! Processing jobs: records, the state machine and the persistent store.

pub mod model;
pub mod progress;
pub mod state;
pub mod store;

pub use model::{
    Dataset, JobLogEntry, JobStatus, LogLevel, NewJob, NewLogEntry, OutputFormat, ParseTagError,
    ProcessingJob, StageTag,
};
pub use progress::ProgressSnapshot;
pub use state::{Completion, TransitionError};
pub use store::{JobStore, StoreError};
