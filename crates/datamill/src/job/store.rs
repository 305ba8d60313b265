//! Persistent job record store and job log sink.

use chrono::Utc;
use thiserror::Error;

use super::model::{Dataset, JobLogEntry, JobStatus, NewLogEntry, ProcessingJob};
use crate::db::job_repo::{self, JobFilter};
use crate::db::{dataset_repo, log_repo, Database, DatabaseError};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("job not found: {0}")]
    NotFound(String),

    /// The row changed between read and write.
    #[error("job {job_id} was modified concurrently (expected version {expected_version})")]
    Conflict {
        job_id: String,
        expected_version: i64,
    },

    #[error("inconsistent job write: {0}")]
    Corrupt(String),
}

/// Facade over the job, log and dataset tables.
///
/// Every status-changing write goes through [`JobStore::commit`], which only
/// lands if nobody else wrote the job since it was read.
#[derive(Clone)]
pub struct JobStore {
    db: Database,
}

impl JobStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Inserts a new job together with its initial log entries.
    pub fn insert(&self, job: &ProcessingJob, logs: &[NewLogEntry]) -> Result<(), StoreError> {
        let now = Utc::now();
        self.db.with_transaction(|tx| {
            job_repo::insert(tx, job)?;
            for entry in logs {
                log_repo::append(tx, entry, now)?;
            }
            Ok(())
        })?;
        Ok(())
    }

    pub fn find(&self, job_id: &str) -> Result<Option<ProcessingJob>, StoreError> {
        Ok(job_repo::find_by_id(&self.db, job_id)?)
    }

    pub fn get(&self, job_id: &str) -> Result<ProcessingJob, StoreError> {
        self.find(job_id)?
            .ok_or_else(|| StoreError::NotFound(job_id.to_string()))
    }

    /// Reads only the status; used by workers polling for cancellation.
    pub fn status(&self, job_id: &str) -> Result<JobStatus, StoreError> {
        job_repo::find_status(&self.db, job_id)?
            .ok_or_else(|| StoreError::NotFound(job_id.to_string()))
    }

    /// Writes `next` over `current` if the stored row is still at
    /// `current.version`, appending `logs` and inserting `dataset` in the
    /// same transaction. Returns the stored record with its new version.
    pub fn commit(
        &self,
        current: &ProcessingJob,
        mut next: ProcessingJob,
        logs: &[NewLogEntry],
        dataset: Option<&Dataset>,
    ) -> Result<ProcessingJob, StoreError> {
        if next.id != current.id {
            return Err(StoreError::Corrupt(format!(
                "record for job {} committed over job {}",
                next.id, current.id
            )));
        }
        if let Some(dataset) = dataset {
            if dataset.job_id != current.id {
                return Err(StoreError::Corrupt(format!(
                    "dataset {} belongs to job {}, not {}",
                    dataset.id, dataset.job_id, current.id
                )));
            }
        }

        next.version = current.version + 1;
        let now = Utc::now();
        let swapped = self.db.with_transaction(|tx| {
            if !job_repo::compare_and_swap(tx, &next, current.version)? {
                return Ok(false);
            }
            for entry in logs {
                log_repo::append(tx, entry, now)?;
            }
            if let Some(dataset) = dataset {
                dataset_repo::insert(tx, dataset)?;
            }
            Ok(true)
        })?;

        if !swapped {
            return Err(StoreError::Conflict {
                job_id: current.id.clone(),
                expected_version: current.version,
            });
        }
        Ok(next)
    }

    /// Appends a log entry outside of a transition.
    pub fn append_log(&self, entry: &NewLogEntry) -> Result<i64, StoreError> {
        let now = Utc::now();
        Ok(self.db.with_conn(|conn| log_repo::append(conn, entry, now))?)
    }

    pub fn logs(
        &self,
        job_id: &str,
        limit: u64,
        offset: u64,
    ) -> Result<(Vec<JobLogEntry>, u64), StoreError> {
        Ok(log_repo::list_for_job(&self.db, job_id, limit, offset)?)
    }

    pub fn list(&self, filter: &JobFilter) -> Result<(Vec<ProcessingJob>, u64), StoreError> {
        Ok(job_repo::query(&self.db, filter)?)
    }

    /// Ids of every `pending` job, oldest first.
    pub fn pending_ids(&self) -> Result<Vec<String>, StoreError> {
        Ok(job_repo::ids_with_status(&self.db, JobStatus::Pending)?)
    }

    /// Ids of every `processing` job, oldest first.
    pub fn processing_ids(&self) -> Result<Vec<String>, StoreError> {
        Ok(job_repo::ids_with_status(&self.db, JobStatus::Processing)?)
    }

    pub fn dataset(&self, job_id: &str) -> Result<Option<Dataset>, StoreError> {
        Ok(dataset_repo::find_by_job(&self.db, job_id)?)
    }
}
