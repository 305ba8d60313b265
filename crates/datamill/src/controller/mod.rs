//! Boundary-facing job API.
//!
//! Translates caller requests into state-machine operations and maps every
//! failure to an [`ApiError`]. Transport wiring (routes, auth, rate limits)
//! lives outside this crate; an adapter only has to serialise the returned
//! envelopes and use [`ApiError::http_status`].

pub mod api;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::{info, warn};
use serde::Deserialize;
use serde_json::json;

use crate::catalog::{Catalog, DataSource, DataSourceStatus, Project};
use crate::db::job_repo::JobFilter;
use crate::db::DatabaseError;
use crate::error::WorkerError;
use crate::job::state::{self, TransitionError};
use crate::job::{
    JobLogEntry, JobStatus, JobStore, NewJob, NewLogEntry, OutputFormat, ProcessingJob,
    ProgressSnapshot, StoreError,
};
use crate::worker::JobDispatcher;

pub use api::{
    ApiError, DatasetEnvelope, ErrorCode, ErrorEnvelope, JobEnvelope, MessageEnvelope, Page,
    PageRequest, Pagination, ProgressEnvelope,
};

/// Attempts at a cancel or retry write before answering `CONFLICT`.
const MAX_TRANSITION_ATTEMPTS: usize = 3;

pub const DEFAULT_LOGS_PAGE_SIZE: u64 = 50;
pub const DEFAULT_JOBS_PAGE_SIZE: u64 = 20;

const MAX_OUTPUT_NAME_LEN: usize = 255;

/// The authenticated principal making a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    pub user_id: String,
    pub organisation_id: String,
}

impl Caller {
    pub fn new(user_id: impl Into<String>, organisation_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            organisation_id: organisation_id.into(),
        }
    }
}

/// Body of `POST /projects/:projectId/jobs`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateJobRequest {
    pub schema_mapping_id: String,
    pub output_format: OutputFormat,
    #[serde(default)]
    pub output_name: Option<String>,
}

pub struct JobController {
    store: JobStore,
    catalog: Catalog,
    dispatcher: Arc<dyn JobDispatcher>,
    logs_page_size: u64,
}

impl JobController {
    pub fn new(store: JobStore, catalog: Catalog, dispatcher: Arc<dyn JobDispatcher>) -> Self {
        Self {
            store,
            catalog,
            dispatcher,
            logs_page_size: DEFAULT_LOGS_PAGE_SIZE,
        }
    }

    pub fn with_logs_page_size(mut self, page_size: u64) -> Self {
        self.logs_page_size = page_size;
        self
    }

    /// `POST /projects/:projectId/jobs`
    ///
    /// Inserts the job as `pending` and hands it to the dispatcher. A
    /// dispatcher that cannot take it right now leaves it for the next sweep.
    pub fn create_job(
        &self,
        caller: &Caller,
        project_id: &str,
        request: CreateJobRequest,
    ) -> Result<JobEnvelope, ApiError> {
        self.authorized_project(caller, project_id)?;

        let mapping = self
            .catalog
            .schema_mapping(&request.schema_mapping_id)
            .map_err(ApiError::internal)?
            .filter(|m| m.project_id == project_id)
            .ok_or_else(|| ApiError::not_found("Schema mapping", &request.schema_mapping_id))?;
        if !mapping.is_active {
            return Err(ApiError::bad_request(format!(
                "Schema mapping {} is not active",
                mapping.id
            )));
        }

        let source = self
            .catalog
            .data_source(&mapping.data_source_id)
            .map_err(ApiError::internal)?
            .filter(|s| s.project_id == project_id)
            .ok_or_else(|| ApiError::not_found("Data source", &mapping.data_source_id))?;
        if source.organisation_id != caller.organisation_id {
            return Err(ApiError::forbidden());
        }
        if source.status != DataSourceStatus::Ready {
            return Err(ApiError::bad_request(format!(
                "Data source {} is not ready (status: {})",
                source.id, source.status
            )));
        }

        let now = Utc::now();
        let output_name = match request.output_name {
            Some(name) => validate_output_name(&name)?,
            None => default_output_name(&source, now),
        };

        let job = ProcessingJob::new(
            NewJob {
                organisation_id: caller.organisation_id.clone(),
                project_id: project_id.to_string(),
                data_source_id: source.id.clone(),
                schema_mapping_id: mapping.id.clone(),
                output_format: request.output_format,
                output_name,
                input_record_count: source.record_count,
            },
            now,
        );
        let logs = [
            NewLogEntry::info(&job.id, "Job created")
                .with_details(json!({
                    "createdBy": caller.user_id,
                    "schemaMappingId": job.schema_mapping_id,
                    "outputFormat": job.output_format,
                    "outputName": job.output_name,
                }))
                .with_attempt(job.attempt),
            NewLogEntry::info(&job.id, "Job queued").with_attempt(job.attempt),
        ];
        self.store.insert(&job, &logs).map_err(store_error)?;
        info!(
            "Created job {} for data source {} in project {}",
            job.id, source.id, project_id
        );

        self.dispatch(&job.id);
        let job = self.store.get(&job.id).map_err(store_error)?;
        Ok(JobEnvelope { job })
    }

    /// `GET /jobs/:jobId`
    pub fn get_job(&self, caller: &Caller, job_id: &str) -> Result<JobEnvelope, ApiError> {
        let job = self.authorized_job(caller, job_id)?;
        Ok(JobEnvelope { job })
    }

    /// `GET /jobs/:jobId/progress`
    pub fn get_progress(
        &self,
        caller: &Caller,
        job_id: &str,
    ) -> Result<ProgressEnvelope, ApiError> {
        self.get_progress_at(caller, job_id, Utc::now())
    }

    /// Progress as seen at `now`.
    pub fn get_progress_at(
        &self,
        caller: &Caller,
        job_id: &str,
        now: DateTime<Utc>,
    ) -> Result<ProgressEnvelope, ApiError> {
        let job = self.authorized_job(caller, job_id)?;
        Ok(ProgressEnvelope {
            progress: ProgressSnapshot::compute(&job, now),
        })
    }

    /// `GET /jobs/:jobId/logs`, oldest entry first.
    pub fn get_logs(
        &self,
        caller: &Caller,
        job_id: &str,
        page: PageRequest,
    ) -> Result<Page<JobLogEntry>, ApiError> {
        self.authorized_job(caller, job_id)?;
        let (page, limit, offset) = page.resolve(self.logs_page_size)?;
        let (data, total) = self
            .store
            .logs(job_id, limit, offset)
            .map_err(store_error)?;
        Ok(Page {
            data,
            pagination: Pagination::new(page, limit, total),
        })
    }

    /// `POST /jobs/:jobId/cancel`
    ///
    /// A running worker notices the new status at its next check and stops.
    pub fn cancel_job(&self, caller: &Caller, job_id: &str) -> Result<MessageEnvelope, ApiError> {
        let job = self.transition(caller, job_id, state::cancel, |job, next| {
            vec![NewLogEntry::info(&job.id, "Job cancelled by user")
                .with_details(json!({
                    "cancelledBy": caller.user_id,
                    "previousStatus": job.status,
                    "stage": job.current_stage,
                    "progress": job.progress,
                }))
                .with_attempt(next.attempt)]
        })?;
        info!("Job {} cancelled by {}", job.id, caller.user_id);
        Ok(MessageEnvelope::new("Job cancelled"))
    }

    /// `POST /jobs/:jobId/retry`
    ///
    /// Resets the failed job in place (same id, next attempt) and queues it.
    pub fn retry_job(&self, caller: &Caller, job_id: &str) -> Result<MessageEnvelope, ApiError> {
        let job = self.transition(caller, job_id, state::retry, |job, next| {
            vec![
                NewLogEntry::info(&job.id, "Job retried")
                    .with_details(json!({
                        "retriedBy": caller.user_id,
                        "previousError": job.error_message,
                        "previousAttempt": job.attempt,
                    }))
                    .with_attempt(next.attempt),
                NewLogEntry::info(&job.id, "Job queued").with_attempt(next.attempt),
            ]
        })?;
        info!(
            "Job {} queued for attempt {} by {}",
            job.id, job.attempt, caller.user_id
        );

        self.dispatch(&job.id);
        Ok(MessageEnvelope::new("Job queued for retry"))
    }

    /// Jobs of one project, newest first.
    pub fn list_jobs(
        &self,
        caller: &Caller,
        project_id: &str,
        status: Option<JobStatus>,
        page: PageRequest,
    ) -> Result<Page<ProcessingJob>, ApiError> {
        self.authorized_project(caller, project_id)?;
        let (page, limit, offset) = page.resolve(DEFAULT_JOBS_PAGE_SIZE)?;
        let filter = JobFilter {
            organisation_id: Some(caller.organisation_id.clone()),
            project_id: Some(project_id.to_string()),
            status,
            limit: Some(limit),
            offset: Some(offset),
        };
        let (data, total) = self.store.list(&filter).map_err(store_error)?;
        Ok(Page {
            data,
            pagination: Pagination::new(page, limit, total),
        })
    }

    /// The dataset produced by a completed job.
    pub fn get_dataset(&self, caller: &Caller, job_id: &str) -> Result<DatasetEnvelope, ApiError> {
        let job = self.authorized_job(caller, job_id)?;
        if job.status != JobStatus::Completed {
            return Err(ApiError::bad_request(format!(
                "Job {} has no dataset (status: {})",
                job.id, job.status
            )));
        }
        let dataset = self
            .store
            .dataset(job_id)
            .map_err(store_error)?
            .ok_or_else(|| ApiError::internal(format!("completed job {} has no dataset", job_id)))?;
        Ok(DatasetEnvelope { dataset })
    }

    /// Applies `transition` and commits it with the entries from `logs`,
    /// re-reading the job when a concurrent write moved its version.
    fn transition<T, L>(
        &self,
        caller: &Caller,
        job_id: &str,
        transition: T,
        logs: L,
    ) -> Result<ProcessingJob, ApiError>
    where
        T: Fn(&ProcessingJob, DateTime<Utc>) -> Result<ProcessingJob, TransitionError>,
        L: Fn(&ProcessingJob, &ProcessingJob) -> Vec<NewLogEntry>,
    {
        for _ in 0..MAX_TRANSITION_ATTEMPTS {
            let job = self.authorized_job(caller, job_id)?;
            let next = transition(&job, Utc::now()).map_err(ApiError::invalid_transition)?;
            let entries = logs(&job, &next);
            match self.store.commit(&job, next, &entries, None) {
                Ok(stored) => return Ok(stored),
                Err(StoreError::Conflict { .. }) => {
                    warn!("Job {} changed during update, retrying", job_id);
                }
                Err(e) => return Err(store_error(e)),
            }
        }
        Err(ApiError::conflict(format!(
            "Job {} is being modified concurrently, try again",
            job_id
        )))
    }

    fn dispatch(&self, job_id: &str) {
        match self.dispatcher.dispatch(job_id) {
            Ok(()) => {}
            Err(WorkerError::QueueFull) => {
                warn!("Queue full, job {} stays pending until the next sweep", job_id);
            }
            Err(e) => warn!("Could not dispatch job {}: {}", job_id, e),
        }
    }

    fn authorized_job(&self, caller: &Caller, job_id: &str) -> Result<ProcessingJob, ApiError> {
        let job = self
            .store
            .find(job_id)
            .map_err(store_error)?
            .ok_or_else(|| ApiError::not_found("Job", job_id))?;
        if job.organisation_id != caller.organisation_id {
            return Err(ApiError::forbidden());
        }
        Ok(job)
    }

    fn authorized_project(&self, caller: &Caller, project_id: &str) -> Result<Project, ApiError> {
        let project = self
            .catalog
            .project(project_id)
            .map_err(catalog_error)?
            .ok_or_else(|| ApiError::not_found("Project", project_id))?;
        if project.organisation_id != caller.organisation_id {
            return Err(ApiError::forbidden());
        }
        Ok(project)
    }
}

fn store_error(err: StoreError) -> ApiError {
    match err {
        StoreError::NotFound(id) => ApiError::not_found("Job", &id),
        StoreError::Conflict { job_id, .. } => ApiError::conflict(format!(
            "Job {} is being modified concurrently, try again",
            job_id
        )),
        other => ApiError::internal(other),
    }
}

fn catalog_error(err: DatabaseError) -> ApiError {
    ApiError::internal(err)
}

/// Checks a caller-supplied output name. Leading and trailing whitespace is
/// dropped.
pub fn validate_output_name(name: &str) -> Result<String, ApiError> {
    let name = name.trim();
    let len = name.chars().count();
    if len == 0 || len > MAX_OUTPUT_NAME_LEN {
        return Err(ApiError::validation(format!(
            "outputName must be 1 to {} characters",
            MAX_OUTPUT_NAME_LEN
        ))
        .with_details(json!({ "field": "outputName" })));
    }
    if name.contains(['/', '\\', '\0']) || name.contains("..") {
        return Err(ApiError::validation(
            "outputName must not contain path separators or '..'",
        )
        .with_details(json!({ "field": "outputName" })));
    }
    Ok(name.to_string())
}

/// `<data source name>-<YYYYMMDD-HHMMSS>`, with separators in the source
/// name replaced.
pub fn default_output_name(source: &DataSource, now: DateTime<Utc>) -> String {
    let base: String = source
        .name
        .chars()
        .map(|c| match c {
            '/' | '\\' | '\0' => '-',
            other => other,
        })
        .collect::<String>()
        .replace("..", ".");
    let base = if base.trim().is_empty() {
        "dataset".to_string()
    } else {
        base.trim().chars().take(200).collect()
    };
    format!("{}-{}", base, now.format("%Y%m%d-%H%M%S"))
}
