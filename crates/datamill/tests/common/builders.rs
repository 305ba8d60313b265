//! Builder patterns for test fixtures.
//!
//! Catalog entities and config documents with sensible defaults, so each
//! test only spells out what it actually exercises.

#![allow(dead_code)]

use std::path::Path;

use chrono::Utc;
use serde_json::{json, Value};

use datamill::catalog::{
    DataSource, DataSourceStatus, FieldMapping, FilterOp, FilterRule, PiiStrategy, Project,
    SchemaMapping, SourceFormat,
};

/// Builder for projects.
pub struct ProjectBuilder {
    id: String,
    organisation_id: String,
    name: String,
}

impl ProjectBuilder {
    pub fn new(id: &str, organisation_id: &str) -> Self {
        Self {
            id: id.to_string(),
            organisation_id: organisation_id.to_string(),
            name: format!("Project {}", id),
        }
    }

    pub fn name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    pub fn build(self) -> Project {
        Project {
            id: self.id,
            organisation_id: self.organisation_id,
            name: self.name,
            created_at: Utc::now(),
        }
    }
}

/// Builder for data sources. Defaults to a ready CSV source in `proj-1`.
pub struct DataSourceBuilder {
    id: String,
    organisation_id: String,
    project_id: String,
    name: String,
    status: DataSourceStatus,
    format: SourceFormat,
    file_path: String,
    record_count: u64,
}

impl DataSourceBuilder {
    pub fn new(id: &str, file_path: &Path) -> Self {
        let format = match file_path.extension().and_then(|e| e.to_str()) {
            Some("json") => SourceFormat::Json,
            Some("jsonl") => SourceFormat::Jsonl,
            _ => SourceFormat::Csv,
        };
        Self {
            id: id.to_string(),
            organisation_id: "org-1".to_string(),
            project_id: "proj-1".to_string(),
            name: "customers".to_string(),
            status: DataSourceStatus::Ready,
            format,
            file_path: file_path.to_string_lossy().into_owned(),
            record_count: 3,
        }
    }

    pub fn project(mut self, project_id: &str, organisation_id: &str) -> Self {
        self.project_id = project_id.to_string();
        self.organisation_id = organisation_id.to_string();
        self
    }

    pub fn name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    pub fn status(mut self, status: DataSourceStatus) -> Self {
        self.status = status;
        self
    }

    pub fn format(mut self, format: SourceFormat) -> Self {
        self.format = format;
        self
    }

    pub fn record_count(mut self, count: u64) -> Self {
        self.record_count = count;
        self
    }

    pub fn build(self) -> DataSource {
        let now = Utc::now();
        DataSource {
            id: self.id,
            organisation_id: self.organisation_id,
            project_id: self.project_id,
            name: self.name,
            status: self.status,
            format: self.format,
            file_path: self.file_path,
            record_count: self.record_count,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Builder for schema mappings. Starts active, with PII detection off and
/// no fields or filters.
pub struct SchemaMappingBuilder {
    id: String,
    project_id: String,
    data_source_id: String,
    name: String,
    is_active: bool,
    detect_pii: bool,
    fields: Vec<FieldMapping>,
    filters: Vec<FilterRule>,
}

impl SchemaMappingBuilder {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            project_id: "proj-1".to_string(),
            data_source_id: "ds-1".to_string(),
            name: format!("mapping {}", id),
            is_active: true,
            detect_pii: false,
            fields: Vec::new(),
            filters: Vec::new(),
        }
    }

    pub fn project(mut self, project_id: &str) -> Self {
        self.project_id = project_id.to_string();
        self
    }

    pub fn data_source(mut self, data_source_id: &str) -> Self {
        self.data_source_id = data_source_id.to_string();
        self
    }

    /// Copies `name` to an output field of the same name.
    pub fn field(self, name: &str) -> Self {
        self.rename(name, name)
    }

    pub fn rename(mut self, source: &str, target: &str) -> Self {
        self.fields.push(FieldMapping {
            source: source.to_string(),
            target: target.to_string(),
            pii: None,
        });
        self
    }

    pub fn pii_field(mut self, source: &str, target: &str, strategy: PiiStrategy) -> Self {
        self.fields.push(FieldMapping {
            source: source.to_string(),
            target: target.to_string(),
            pii: Some(strategy),
        });
        self
    }

    pub fn filter(mut self, field: &str, op: FilterOp, value: Option<Value>) -> Self {
        self.filters.push(FilterRule {
            field: field.to_string(),
            op,
            value,
        });
        self
    }

    pub fn detect_pii(mut self, on: bool) -> Self {
        self.detect_pii = on;
        self
    }

    pub fn inactive(mut self) -> Self {
        self.is_active = false;
        self
    }

    pub fn build(self) -> SchemaMapping {
        let now = Utc::now();
        SchemaMapping {
            id: self.id,
            project_id: self.project_id,
            data_source_id: self.data_source_id,
            name: self.name,
            is_active: self.is_active,
            detect_pii: self.detect_pii,
            fields: self.fields,
            filters: self.filters,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Builder for config documents.
pub struct ConfigBuilder {
    version: String,
    output_directory: String,
    database_path: Option<String>,
    worker_count: Option<u64>,
    logs_page_size: Option<u64>,
    pii: Option<Value>,
    logging: Option<Value>,
}

impl ConfigBuilder {
    pub fn new(output_directory: &str) -> Self {
        Self {
            version: "1.0".to_string(),
            output_directory: output_directory.to_string(),
            database_path: None,
            worker_count: None,
            logs_page_size: None,
            pii: None,
            logging: None,
        }
    }

    pub fn version(mut self, version: &str) -> Self {
        self.version = version.to_string();
        self
    }

    pub fn database_path(mut self, path: &str) -> Self {
        self.database_path = Some(path.to_string());
        self
    }

    pub fn worker_count(mut self, count: u64) -> Self {
        self.worker_count = Some(count);
        self
    }

    pub fn logs_page_size(mut self, size: u64) -> Self {
        self.logs_page_size = Some(size);
        self
    }

    pub fn pii(mut self, mask: &str, detectors: &[&str]) -> Self {
        self.pii = Some(json!({ "mask": mask, "detectors": detectors }));
        self
    }

    pub fn logging(mut self, level: &str, json: bool) -> Self {
        self.logging = Some(json!({ "level": level, "json": json }));
        self
    }

    pub fn build_json(&self) -> Value {
        let mut doc = json!({
            "version": self.version,
            "output_directory": self.output_directory,
        });
        if let Some(path) = &self.database_path {
            doc["database_path"] = json!(path);
        }
        if let Some(count) = self.worker_count {
            doc["worker_count"] = json!(count);
        }
        if let Some(size) = self.logs_page_size {
            doc["logs_page_size"] = json!(size);
        }
        if let Some(pii) = &self.pii {
            doc["pii"] = pii.clone();
        }
        if let Some(logging) = &self.logging {
            doc["logging"] = logging.clone();
        }
        doc
    }

    pub fn build_string(&self) -> String {
        serde_json::to_string_pretty(&self.build_json()).expect("Failed to serialize config")
    }

    pub fn build_yaml(&self) -> String {
        serde_yaml::to_string(&self.build_json()).expect("Failed to serialize config")
    }
}
