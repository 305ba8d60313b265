//! Projects, data sources and schema mappings referenced by jobs.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::job::ParseTagError;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: String,
    pub organisation_id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// Readiness of an uploaded or connected data source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataSourceStatus {
    Pending,
    Processing,
    Ready,
    Error,
}

impl DataSourceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataSourceStatus::Pending => "pending",
            DataSourceStatus::Processing => "processing",
            DataSourceStatus::Ready => "ready",
            DataSourceStatus::Error => "error",
        }
    }
}

impl fmt::Display for DataSourceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DataSourceStatus {
    type Err = ParseTagError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(DataSourceStatus::Pending),
            "processing" => Ok(DataSourceStatus::Processing),
            "ready" => Ok(DataSourceStatus::Ready),
            "error" => Ok(DataSourceStatus::Error),
            other => Err(ParseTagError::new("data source status", other)),
        }
    }
}

/// On-disk layout of a data source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceFormat {
    /// A single JSON array of objects.
    Json,
    /// One JSON object per line.
    Jsonl,
    /// Comma-separated values with a header row.
    Csv,
}

impl SourceFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceFormat::Json => "json",
            SourceFormat::Jsonl => "jsonl",
            SourceFormat::Csv => "csv",
        }
    }
}

impl fmt::Display for SourceFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceFormat {
    type Err = ParseTagError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "json" => Ok(SourceFormat::Json),
            "jsonl" => Ok(SourceFormat::Jsonl),
            "csv" => Ok(SourceFormat::Csv),
            other => Err(ParseTagError::new("source format", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DataSource {
    pub id: String,
    pub organisation_id: String,
    pub project_id: String,
    pub name: String,
    pub status: DataSourceStatus,
    pub format: SourceFormat,
    pub file_path: String,
    pub record_count: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// How a field flagged as personal data is rewritten.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PiiStrategy {
    /// Replace the value with the configured mask.
    Mask,
    /// Replace the value with a truncated SHA-256 digest.
    Hash,
    /// Drop the field from the record.
    Remove,
}

/// Maps one source field to one output field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldMapping {
    pub source: String,
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pii: Option<PiiStrategy>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOp {
    Eq,
    Ne,
    Contains,
    Gt,
    Lt,
    Exists,
    NotExists,
}

impl FilterOp {
    /// Whether the operator compares against a rule value.
    pub fn needs_value(&self) -> bool {
        !matches!(self, FilterOp::Exists | FilterOp::NotExists)
    }
}

/// Inclusion rule evaluated against mapped (target) field names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterRule {
    pub field: String,
    pub op: FilterOp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

impl FilterRule {
    /// Checks the rule is well-formed.
    pub fn validate(&self) -> Result<(), String> {
        if self.field.trim().is_empty() {
            return Err("filter rule field must not be empty".to_string());
        }
        match (self.op.needs_value(), &self.value) {
            (true, None) => Err(format!(
                "filter rule on '{}' needs a value for operator {:?}",
                self.field, self.op
            )),
            (true, Some(v)) if matches!(self.op, FilterOp::Gt | FilterOp::Lt) && !v.is_number() => {
                Err(format!(
                    "filter rule on '{}' compares numerically but value is not a number",
                    self.field
                ))
            }
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaMapping {
    pub id: String,
    pub project_id: String,
    pub data_source_id: String,
    pub name: String,
    pub is_active: bool,
    pub detect_pii: bool,
    pub fields: Vec<FieldMapping>,
    pub filters: Vec<FilterRule>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SchemaMapping {
    /// Checks every field mapping and filter rule.
    pub fn validate(&self) -> Result<(), String> {
        for field in &self.fields {
            if field.source.is_empty() || field.target.is_empty() {
                return Err(format!(
                    "mapping '{}' has a field with an empty source or target",
                    self.name
                ));
            }
        }
        for rule in &self.filters {
            rule.validate()?;
        }
        Ok(())
    }
}
