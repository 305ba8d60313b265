pub mod broadcast;
pub mod catalog;
pub mod config;
pub mod controller;
pub mod db;
pub mod error;
pub mod job;
pub mod logging;
pub mod pipeline;
pub mod storage;
pub mod worker;

pub use broadcast::{JobProgressBroadcaster, JobProgressEvent};
pub use catalog::Catalog;
pub use config::{load_config, Config};
pub use controller::{ApiError, Caller, CreateJobRequest, ErrorCode, JobController};
pub use error::{ConfigError, DatamillError, Result, StorageError, WorkerError};
pub use job::{JobStatus, JobStore, ProcessingJob};
pub use pipeline::{Pipeline, PipelineConfig, RunOutcome};
pub use worker::{InlineDispatcher, JobDispatcher, WorkerPool};
