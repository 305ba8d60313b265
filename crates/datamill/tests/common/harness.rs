//! Test harness for isolated test execution.
//!
//! The `TestHarness` struct provides an isolated environment for exercising
//! the job pipeline end to end:
//! - Temporary directories for source files, datasets and config
//! - An in-memory database with the catalog, job store and migrations
//! - Pipeline, dispatcher and controller construction

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tempfile::TempDir;

use datamill::catalog::{Catalog, DataSource, Project, SchemaMapping};
use datamill::controller::{Caller, CreateJobRequest, JobController};
use datamill::db::Database;
use datamill::job::{JobStatus, JobStore, OutputFormat, ProcessingJob};
use datamill::pipeline::pii::PiiKind;
use datamill::pipeline::{Pipeline, PipelineConfig, Stage};
use datamill::worker::{InlineDispatcher, JobDispatcher};

use super::builders::{DataSourceBuilder, ProjectBuilder, SchemaMappingBuilder};

pub const ORG: &str = "org-1";
pub const PROJECT: &str = "proj-1";

/// Test harness providing an isolated execution environment.
pub struct TestHarness {
    /// Temporary directory containing input/output/config subdirectories.
    temp_dir: TempDir,
    /// Source files for data sources.
    pub input_dir: PathBuf,
    /// Root directory for generated datasets.
    pub output_dir: PathBuf,
    /// Config files written by tests.
    pub config_dir: PathBuf,
    pub db: Database,
    pub store: JobStore,
    pub catalog: Catalog,
}

impl TestHarness {
    /// Creates a harness with `proj-1` owned by `org-1` already in the catalog.
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let base = temp_dir.path();

        let input_dir = base.join("input");
        let output_dir = base.join("output");
        let config_dir = base.join("config");

        std::fs::create_dir_all(&input_dir).expect("Failed to create input dir");
        std::fs::create_dir_all(&output_dir).expect("Failed to create output dir");
        std::fs::create_dir_all(&config_dir).expect("Failed to create config dir");

        let db = Database::open_in_memory().expect("Failed to open database");
        let harness = Self {
            temp_dir,
            input_dir,
            output_dir,
            config_dir,
            store: JobStore::new(db.clone()),
            catalog: Catalog::new(db.clone()),
            db,
        };
        harness.add_project(ProjectBuilder::new(PROJECT, ORG).build());
        harness
    }

    /// Get the base temp directory path.
    pub fn temp_path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Write a source file to the input directory.
    pub fn write_input(&self, filename: &str, content: &str) -> PathBuf {
        let path = self.input_dir.join(filename);
        std::fs::write(&path, content).expect("Failed to write input file");
        path
    }

    pub fn add_project(&self, project: Project) {
        self.catalog
            .add_project(&project)
            .expect("Failed to insert project");
    }

    pub fn add_data_source(&self, source: DataSource) {
        self.catalog
            .add_data_source(&source)
            .expect("Failed to insert data source");
    }

    pub fn add_mapping(&self, mapping: SchemaMapping) {
        self.catalog
            .add_schema_mapping(&mapping)
            .expect("Failed to insert schema mapping");
    }

    /// Writes `content` as the `ds-1` source file and registers `ds-1` plus
    /// the given mapping.
    pub fn seed_source(&self, filename: &str, content: &str, mapping: SchemaMappingBuilder) {
        let path = self.write_input(filename, content);
        self.add_data_source(DataSourceBuilder::new("ds-1", &path).build());
        self.add_mapping(mapping.data_source("ds-1").build());
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            output_directory: self.output_dir.clone(),
            pii_mask: "[REDACTED]".to_string(),
            pii_detectors: PiiKind::ALL.to_vec(),
            progress_every: 1,
        }
    }

    /// Pipeline with the default stages.
    pub fn pipeline(&self) -> Arc<Pipeline> {
        Arc::new(Pipeline::from_config(
            self.store.clone(),
            self.catalog.clone(),
            &self.pipeline_config(),
        ))
    }

    /// Pipeline with custom stages.
    pub fn pipeline_with(&self, stages: Vec<Box<dyn Stage>>) -> Arc<Pipeline> {
        Arc::new(Pipeline::with_stages(
            self.store.clone(),
            self.catalog.clone(),
            stages,
        ))
    }

    pub fn controller(&self, dispatcher: Arc<dyn JobDispatcher>) -> JobController {
        JobController::new(self.store.clone(), self.catalog.clone(), dispatcher)
    }

    /// Controller that runs every job synchronously on create/retry.
    pub fn inline_controller(&self) -> JobController {
        self.controller(Arc::new(InlineDispatcher::new(self.pipeline())))
    }

    /// Creates a job for `map-1` through `controller`.
    pub fn create_job(
        &self,
        controller: &JobController,
        format: OutputFormat,
        name: &str,
    ) -> ProcessingJob {
        controller
            .create_job(
                &caller(),
                PROJECT,
                CreateJobRequest {
                    schema_mapping_id: "map-1".to_string(),
                    output_format: format,
                    output_name: Some(name.to_string()),
                },
            )
            .expect("Failed to create job")
            .job
    }

    /// Polls the store until the job reaches `status`.
    pub fn wait_for_status(&self, job_id: &str, status: JobStatus, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if self.store.status(job_id).ok() == Some(status) {
                return true;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        false
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// Member of `org-1`.
pub fn caller() -> Caller {
    Caller::new("user-1", ORG)
}

/// Member of another organisation.
pub fn outsider() -> Caller {
    Caller::new("user-9", "org-9")
}
