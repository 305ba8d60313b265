use std::time::Instant;

use chrono::Utc;
use serde_json::json;
use tracing::{debug, error, info, info_span, warn};

use crate::catalog::Catalog;
use crate::job::state::{self, Completion, TransitionError};
use crate::job::{
    Dataset, JobStatus, JobStore, NewLogEntry, ProcessingJob, StageTag, StoreError,
};

use super::config::PipelineConfig;
use super::progress::{ProgressEvent, ProgressReporter};
use super::stage::{Artifact, Stage, StageContext, StageError, StageMonitor};
use super::stages::default_stages;

/// Attempts at a versioned write before the run gives up on it.
const MAX_COMMIT_ATTEMPTS: usize = 3;

/// How a single run of a job ended.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Completed {
        dataset_id: String,
        output_record_count: u64,
        pii_detected_count: u64,
    },
    Failed {
        error: String,
    },
    Cancelled,
    /// The job was not pending, or another worker claimed it first.
    Skipped,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunResult {
    pub job_id: String,
    pub outcome: RunOutcome,
}

/// Why a run stopped before completing.
enum Interrupt {
    Cancelled,
    Failed(String),
}

impl Interrupt {
    fn from_transition(err: TransitionError) -> Self {
        if err.status() == JobStatus::Cancelled {
            Interrupt::Cancelled
        } else {
            Interrupt::Failed(err.to_string())
        }
    }

    fn from_store(err: StoreError) -> Self {
        Interrupt::Failed(format!("job store error: {}", err))
    }
}

pub struct Pipeline {
    store: JobStore,
    catalog: Catalog,
    stages: Vec<Box<dyn Stage>>,
}

impl Pipeline {
    /// Production constructor with the default stages.
    pub fn from_config(store: JobStore, catalog: Catalog, config: &PipelineConfig) -> Self {
        Self::with_stages(store, catalog, default_stages(config))
    }

    /// Constructor with an explicit stage list.
    pub fn with_stages(store: JobStore, catalog: Catalog, stages: Vec<Box<dyn Stage>>) -> Self {
        Self {
            store,
            catalog,
            stages,
        }
    }

    pub fn store(&self) -> &JobStore {
        &self.store
    }

    pub fn stage_tags(&self) -> Vec<StageTag> {
        self.stages.iter().map(|s| s.tag()).collect()
    }

    /// Moves a pending job to processing.
    ///
    /// Returns `None` when the job is missing, not pending, or another
    /// worker won the write.
    pub fn claim(&self, job_id: &str) -> Result<Option<ProcessingJob>, StoreError> {
        let Some(job) = self.store.find(job_id)? else {
            return Ok(None);
        };
        let Ok(next) = state::start(&job, Utc::now()) else {
            return Ok(None);
        };
        let logs = [NewLogEntry::info(&job.id, "Job started").with_attempt(next.attempt)];
        match self.store.commit(&job, next, &logs, None) {
            Ok(claimed) => Ok(Some(claimed)),
            Err(StoreError::Conflict { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Claims and runs a job to a terminal state.
    ///
    /// Stage failures are recorded on the job and never returned as errors.
    pub fn run(&self, job_id: &str, progress: &dyn ProgressReporter) -> RunResult {
        let _pipeline_span = info_span!("pipeline", job_id = %job_id).entered();

        let outcome = match self.claim(job_id) {
            Ok(Some(job)) => {
                info!("Processing job {} (attempt {})", job.id, job.attempt);
                self.execute(job, progress)
            }
            Ok(None) => {
                debug!("Job {} is not claimable, skipping", job_id);
                RunOutcome::Skipped
            }
            Err(e) => {
                error!("Failed to claim job {}: {}", job_id, e);
                RunOutcome::Skipped
            }
        };

        RunResult {
            job_id: job_id.to_string(),
            outcome,
        }
    }

    fn execute(&self, job: ProcessingJob, progress: &dyn ProgressReporter) -> RunOutcome {
        let mut run = Run {
            store: &self.store,
            job,
            progress,
            stage_index: 0,
            stage_count: self.stages.len(),
        };

        match self.run_stages(&mut run) {
            Ok(outcome) => outcome,
            Err(Interrupt::Cancelled) => run.cancelled(),
            Err(Interrupt::Failed(message)) => run.fail(message),
        }
    }

    fn run_stages(&self, run: &mut Run<'_>) -> Result<RunOutcome, Interrupt> {
        let data_source = self
            .catalog
            .data_source(&run.job.data_source_id)
            .map_err(|e| Interrupt::Failed(format!("catalog error: {}", e)))?
            .ok_or_else(|| {
                Interrupt::Failed(format!(
                    "data source {} no longer exists",
                    run.job.data_source_id
                ))
            })?;
        let mapping = self
            .catalog
            .schema_mapping(&run.job.schema_mapping_id)
            .map_err(|e| Interrupt::Failed(format!("catalog error: {}", e)))?
            .ok_or_else(|| {
                Interrupt::Failed(format!(
                    "schema mapping {} no longer exists",
                    run.job.schema_mapping_id
                ))
            })?;

        let mut artifact = Artifact::Empty;
        let mut pii_total: Option<u64> = None;
        let mut finished_logs: Vec<NewLogEntry> = Vec::new();

        for (index, stage) in self.stages.iter().enumerate() {
            let tag = stage.tag();
            let _step = info_span!("stage", stage = %tag).entered();

            if run.is_cancelled() {
                return Err(Interrupt::Cancelled);
            }

            run.stage_index = index;
            let stage_start = state::stage_progress(index, run.stage_count);
            let mut logs = std::mem::take(&mut finished_logs);
            logs.push(
                NewLogEntry::info(&run.job.id, format!("{} started", tag.label()))
                    .with_details(json!({ "stage": tag }))
                    .with_attempt(run.job.attempt),
            );
            run.commit(
                |job| state::advance(job, stage_start, tag, Utc::now()),
                &logs,
                None,
            )?;
            run.report_stage(tag.label());

            let started = Instant::now();
            let result = {
                let job = run.job.clone();
                let mut ctx = StageContext::new(&job, &data_source, &mapping, &mut *run);
                stage.execute(&mut ctx, artifact)
            };

            let outcome = match result {
                Ok(outcome) => outcome,
                Err(StageError::Cancelled) => return Err(Interrupt::Cancelled),
                Err(e) => return Err(Interrupt::Failed(format!("{} stage failed: {}", tag, e))),
            };

            let elapsed_ms = started.elapsed().as_millis() as u64;
            debug!(
                "Stage {} processed {} records in {}ms",
                tag, outcome.records_processed, elapsed_ms
            );
            if let Some(found) = outcome.pii_findings {
                pii_total = Some(pii_total.unwrap_or(0) + found);
            }
            finished_logs.push(
                NewLogEntry::info(&run.job.id, format!("{} finished", tag.label()))
                    .with_details(json!({
                        "stage": tag,
                        "recordsProcessed": outcome.records_processed,
                        "piiFindings": outcome.pii_findings,
                        "elapsedMs": elapsed_ms,
                    }))
                    .with_attempt(run.job.attempt),
            );
            artifact = outcome.artifact;
        }

        let Artifact::Encoded(output) = artifact else {
            return Err(Interrupt::Failed(
                "pipeline finished without an encoded dataset".to_string(),
            ));
        };

        let completion = Completion {
            output_record_count: output.record_count,
            pii_detected_count: pii_total.unwrap_or(0),
        };
        let dataset = Dataset {
            id: uuid::Uuid::new_v4().to_string(),
            job_id: run.job.id.clone(),
            data_source_id: run.job.data_source_id.clone(),
            project_id: run.job.project_id.clone(),
            name: run.job.output_name.clone(),
            format: run.job.output_format,
            file_path: output.path.display().to_string(),
            file_size: output.file_size,
            record_count: output.record_count,
            metadata: json!({
                "schemaMappingId": run.job.schema_mapping_id,
                "inputRecordCount": run.job.input_record_count,
                "piiDetectedCount": completion.pii_detected_count,
                "attempt": run.job.attempt,
            }),
            created_at: Utc::now(),
        };

        finished_logs.push(
            NewLogEntry::info(&run.job.id, "Job completed")
                .with_details(json!({
                    "datasetId": dataset.id,
                    "outputRecordCount": completion.output_record_count,
                    "piiDetectedCount": completion.pii_detected_count,
                }))
                .with_attempt(run.job.attempt),
        );

        if let Err(interrupt) = run.commit(
            |job| state::complete(job, completion, Utc::now()),
            &finished_logs,
            Some(&dataset),
        ) {
            if let Err(e) = std::fs::remove_file(&output.path) {
                warn!("Failed to remove {}: {}", output.path.display(), e);
            }
            return Err(interrupt);
        }

        info!(
            "Job {} completed: {} records, {} PII findings",
            run.job.id, completion.output_record_count, completion.pii_detected_count
        );
        run.progress.report(ProgressEvent::Completed {
            dataset_path: dataset.file_path.clone(),
            output_record_count: completion.output_record_count,
            pii_detected_count: completion.pii_detected_count,
        });

        Ok(RunOutcome::Completed {
            dataset_id: dataset.id,
            output_record_count: completion.output_record_count,
            pii_detected_count: completion.pii_detected_count,
        })
    }
}

/// State of one in-flight run. Holds the latest committed job record.
struct Run<'a> {
    store: &'a JobStore,
    job: ProcessingJob,
    progress: &'a dyn ProgressReporter,
    stage_index: usize,
    stage_count: usize,
}

impl Run<'_> {
    /// Applies `transition` to the latest record and commits it, reloading
    /// and re-applying when another writer got there first.
    fn commit<F>(
        &mut self,
        transition: F,
        logs: &[NewLogEntry],
        dataset: Option<&Dataset>,
    ) -> Result<(), Interrupt>
    where
        F: Fn(&ProcessingJob) -> Result<ProcessingJob, TransitionError>,
    {
        for _ in 0..MAX_COMMIT_ATTEMPTS {
            let next = transition(&self.job).map_err(Interrupt::from_transition)?;
            match self.store.commit(&self.job, next, logs, dataset) {
                Ok(stored) => {
                    self.job = stored;
                    return Ok(());
                }
                Err(StoreError::Conflict { .. }) => {
                    debug!("Job {} changed concurrently, reloading", self.job.id);
                    self.job = self.store.get(&self.job.id).map_err(Interrupt::from_store)?;
                }
                Err(e) => return Err(Interrupt::from_store(e)),
            }
        }
        Err(Interrupt::Failed(format!(
            "job {} kept changing during the run",
            self.job.id
        )))
    }

    fn report_stage(&self, message: &str) {
        if let Some(stage) = self.job.current_stage {
            self.progress.report(ProgressEvent::Stage {
                stage,
                progress: self.job.progress,
                message: message.to_string(),
            });
        }
    }

    fn cancelled(&self) -> RunOutcome {
        info!("Job {} was cancelled, stopping", self.job.id);
        self.progress.report(ProgressEvent::Cancelled {
            stage: self.job.current_stage,
            progress: self.job.progress,
        });
        RunOutcome::Cancelled
    }

    fn fail(&mut self, message: String) -> RunOutcome {
        warn!("Job {} failed: {}", self.job.id, message);
        let logs = [NewLogEntry::error(&self.job.id, message.clone())
            .with_details(json!({ "stage": self.job.current_stage }))
            .with_attempt(self.job.attempt)];

        let recorded = self.commit(|job| state::fail(job, message.clone(), Utc::now()), &logs, None);
        let error = match recorded {
            Ok(()) => message,
            Err(Interrupt::Cancelled) => return self.cancelled(),
            Err(Interrupt::Failed(e)) => {
                // The row stays `processing` until the next startup recovery.
                error!("Could not record failure of job {}: {}", self.job.id, e);
                format!("{} (failure not recorded: {})", message, e)
            }
        };

        self.progress.report(ProgressEvent::Failed {
            stage: self.job.current_stage,
            progress: self.job.progress,
            error: error.clone(),
        });
        RunOutcome::Failed { error }
    }
}

impl StageMonitor for Run<'_> {
    fn progress(&mut self, fraction: f64) -> Result<(), StageError> {
        let target = state::within_stage_progress(self.stage_index, self.stage_count, fraction);
        if target <= self.job.progress {
            return Ok(());
        }
        let Some(stage) = self.job.current_stage else {
            return Ok(());
        };

        self.commit(|job| state::advance(job, target, stage, Utc::now()), &[], None)
            .map_err(|interrupt| match interrupt {
                Interrupt::Cancelled => StageError::Cancelled,
                Interrupt::Failed(message) => StageError::Failed(message),
            })?;
        self.report_stage(stage.label());
        Ok(())
    }

    fn is_cancelled(&mut self) -> bool {
        match self.store.status(&self.job.id) {
            Ok(status) => status == JobStatus::Cancelled,
            Err(e) => {
                warn!("Could not read status of job {}: {}", self.job.id, e);
                false
            }
        }
    }
}
