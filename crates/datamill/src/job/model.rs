//! Processing job records, log entries and datasets.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Returned when a stored enum tag cannot be parsed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown {kind} '{value}'")]
pub struct ParseTagError {
    pub kind: &'static str,
    pub value: String,
}

impl ParseTagError {
    pub(crate) fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

/// Lifecycle status of a processing job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    /// Terminal states carry a `completed_at` timestamp.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = ParseTagError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "processing" => Ok(JobStatus::Processing),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            "cancelled" => Ok(JobStatus::Cancelled),
            other => Err(ParseTagError::new("job status", other)),
        }
    }
}

/// Serialization format of the produced dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Json,
    Csv,
    Jsonl,
}

impl OutputFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputFormat::Json => "json",
            OutputFormat::Csv => "csv",
            OutputFormat::Jsonl => "jsonl",
        }
    }

    /// File extension used for encoded datasets.
    pub fn extension(&self) -> &'static str {
        self.as_str()
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutputFormat {
    type Err = ParseTagError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "json" => Ok(OutputFormat::Json),
            "csv" => Ok(OutputFormat::Csv),
            "jsonl" => Ok(OutputFormat::Jsonl),
            other => Err(ParseTagError::new("output format", other)),
        }
    }
}

/// Tag of the stage a job is currently in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageTag {
    Initializing,
    Ingest,
    MapRedact,
    Filter,
    Encode,
}

impl StageTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageTag::Initializing => "initializing",
            StageTag::Ingest => "ingest",
            StageTag::MapRedact => "map_redact",
            StageTag::Filter => "filter",
            StageTag::Encode => "encode",
        }
    }

    /// Human-readable description used in log messages and events.
    pub fn label(&self) -> &'static str {
        match self {
            StageTag::Initializing => "Initializing",
            StageTag::Ingest => "Ingesting records",
            StageTag::MapRedact => "Applying schema mapping and PII policy",
            StageTag::Filter => "Filtering records",
            StageTag::Encode => "Encoding dataset",
        }
    }
}

impl fmt::Display for StageTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StageTag {
    type Err = ParseTagError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "initializing" => Ok(StageTag::Initializing),
            "ingest" => Ok(StageTag::Ingest),
            "map_redact" => Ok(StageTag::MapRedact),
            "filter" => Ok(StageTag::Filter),
            "encode" => Ok(StageTag::Encode),
            other => Err(ParseTagError::new("stage", other)),
        }
    }
}

/// One requested transformation run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingJob {
    pub id: String,
    pub organisation_id: String,
    pub project_id: String,
    pub data_source_id: String,
    pub schema_mapping_id: String,
    pub status: JobStatus,
    pub output_format: OutputFormat,
    pub output_name: String,
    /// Snapshot of the data source size at creation. Never changes.
    pub input_record_count: u64,
    pub output_record_count: Option<u64>,
    pub pii_detected_count: Option<u64>,
    /// Percentage in `0..=100`.
    pub progress: u8,
    pub current_stage: Option<StageTag>,
    pub error_message: Option<String>,
    /// Run number; starts at 1 and is bumped by every retry.
    pub attempt: u32,
    /// Optimistic concurrency counter, bumped on every committed write.
    #[serde(skip_serializing)]
    pub version: i64,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Inputs needed to create a job.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub organisation_id: String,
    pub project_id: String,
    pub data_source_id: String,
    pub schema_mapping_id: String,
    pub output_format: OutputFormat,
    pub output_name: String,
    pub input_record_count: u64,
}

impl ProcessingJob {
    /// Builds a fresh `pending` job with a new id.
    pub fn new(new_job: NewJob, now: DateTime<Utc>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            organisation_id: new_job.organisation_id,
            project_id: new_job.project_id,
            data_source_id: new_job.data_source_id,
            schema_mapping_id: new_job.schema_mapping_id,
            status: JobStatus::Pending,
            output_format: new_job.output_format,
            output_name: new_job.output_name,
            input_record_count: new_job.input_record_count,
            output_record_count: None,
            pii_detected_count: None,
            progress: 0,
            current_stage: None,
            error_message: None,
            attempt: 1,
            version: 0,
            started_at: None,
            completed_at: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Severity of a job log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = ParseTagError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "info" => Ok(LogLevel::Info),
            "warn" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            other => Err(ParseTagError::new("log level", other)),
        }
    }
}

/// A persisted, immutable job log entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobLogEntry {
    pub id: i64,
    pub job_id: String,
    pub level: LogLevel,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
    pub created_at: DateTime<Utc>,
}

/// A log entry waiting to be appended.
#[derive(Debug, Clone, PartialEq)]
pub struct NewLogEntry {
    pub job_id: String,
    pub level: LogLevel,
    pub message: String,
    pub details: Option<Value>,
}

impl NewLogEntry {
    pub fn new(job_id: &str, level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            job_id: job_id.to_string(),
            level,
            message: message.into(),
            details: None,
        }
    }

    pub fn info(job_id: &str, message: impl Into<String>) -> Self {
        Self::new(job_id, LogLevel::Info, message)
    }

    pub fn warn(job_id: &str, message: impl Into<String>) -> Self {
        Self::new(job_id, LogLevel::Warn, message)
    }

    pub fn error(job_id: &str, message: impl Into<String>) -> Self {
        Self::new(job_id, LogLevel::Error, message)
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Tags the entry with the run it belongs to. Existing object details
    /// are kept; any other details move under `"value"`.
    pub fn with_attempt(mut self, attempt: u32) -> Self {
        let mut map = match self.details.take() {
            Some(Value::Object(map)) => map,
            Some(other) => {
                let mut map = serde_json::Map::new();
                map.insert("value".to_string(), other);
                map
            }
            None => serde_json::Map::new(),
        };
        map.insert("attempt".to_string(), Value::from(attempt));
        self.details = Some(Value::Object(map));
        self
    }
}

/// Output artifact of a successfully completed job.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Dataset {
    pub id: String,
    pub job_id: String,
    pub data_source_id: String,
    pub project_id: String,
    pub name: String,
    pub format: OutputFormat,
    pub file_path: String,
    pub file_size: u64,
    pub record_count: u64,
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
}
