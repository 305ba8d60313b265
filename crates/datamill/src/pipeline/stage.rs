use std::path::PathBuf;

use thiserror::Error;

use crate::catalog::{DataSource, SchemaMapping};
use crate::error::StorageError;
use crate::job::{ProcessingJob, StageTag};

use super::codec::{DecodeError, Record};

/// Data handed from one stage to the next.
#[derive(Debug, Clone, PartialEq)]
pub enum Artifact {
    /// Input of the first stage.
    Empty,
    Records(Vec<Record>),
    Encoded(EncodedOutput),
}

impl Artifact {
    fn kind(&self) -> &'static str {
        match self {
            Artifact::Empty => "nothing",
            Artifact::Records(_) => "records",
            Artifact::Encoded(_) => "an encoded dataset",
        }
    }

    /// Unwraps record input, or reports what the stage got instead.
    pub fn into_records(self, stage: StageTag) -> Result<Vec<Record>, StageError> {
        match self {
            Artifact::Records(records) => Ok(records),
            other => Err(StageError::UnexpectedInput {
                stage,
                found: other.kind(),
            }),
        }
    }
}

/// A dataset file written by the encode stage.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedOutput {
    pub path: PathBuf,
    pub file_size: u64,
    pub record_count: u64,
}

/// What a stage hands back on success.
#[derive(Debug, Clone, PartialEq)]
pub struct StageOutcome {
    pub artifact: Artifact,
    pub records_processed: u64,
    /// Set by stages that look for personal data.
    pub pii_findings: Option<u64>,
}

#[derive(Error, Debug)]
pub enum StageError {
    #[error("failed to read data source '{path}': {source}")]
    ReadSource {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed data source '{path}': {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: DecodeError,
    },

    #[error("{stage} stage received {found} instead of records")]
    UnexpectedInput { stage: StageTag, found: &'static str },

    #[error("failed to encode dataset: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("failed to store dataset: {0}")]
    Storage(#[from] StorageError),

    #[error("job was cancelled")]
    Cancelled,

    #[error("{0}")]
    Failed(String),
}

/// Hooks the runner gives a stage while it executes.
pub trait StageMonitor {
    /// Records that `fraction` (0.0..=1.0) of the current stage is done.
    /// Fails with [`StageError::Cancelled`] once the job has been cancelled.
    fn progress(&mut self, fraction: f64) -> Result<(), StageError>;

    fn is_cancelled(&mut self) -> bool;
}

/// Everything a stage may read about the job it runs for.
pub struct StageContext<'a> {
    pub job: &'a ProcessingJob,
    pub data_source: &'a DataSource,
    pub mapping: &'a SchemaMapping,
    monitor: &'a mut dyn StageMonitor,
}

impl<'a> StageContext<'a> {
    pub fn new(
        job: &'a ProcessingJob,
        data_source: &'a DataSource,
        mapping: &'a SchemaMapping,
        monitor: &'a mut dyn StageMonitor,
    ) -> Self {
        Self {
            job,
            data_source,
            mapping,
            monitor,
        }
    }

    pub fn report_progress(&mut self, fraction: f64) -> Result<(), StageError> {
        self.monitor.progress(fraction)
    }

    pub fn check_cancelled(&mut self) -> Result<(), StageError> {
        if self.monitor.is_cancelled() {
            return Err(StageError::Cancelled);
        }
        Ok(())
    }

    /// Reports progress every `every` items; call once per item with its
    /// zero-based index.
    pub fn tick(&mut self, index: usize, total: usize, every: usize) -> Result<(), StageError> {
        if total > 0 && every > 0 && (index + 1) % every == 0 {
            self.report_progress((index + 1) as f64 / total as f64)?;
        }
        Ok(())
    }
}

/// One unit of the processing pipeline.
pub trait Stage: Send + Sync {
    fn tag(&self) -> StageTag;

    fn execute(
        &self,
        ctx: &mut StageContext<'_>,
        input: Artifact,
    ) -> Result<StageOutcome, StageError>;
}

/// Monitor that never cancels and ignores progress. Used when a stage runs
/// on its own.
pub struct DetachedMonitor;

impl StageMonitor for DetachedMonitor {
    fn progress(&mut self, _fraction: f64) -> Result<(), StageError> {
        Ok(())
    }

    fn is_cancelled(&mut self) -> bool {
        false
    }
}
