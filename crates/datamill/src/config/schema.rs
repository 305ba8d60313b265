use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::pipeline::pii::PiiKind;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub version: String,
    /// SQLite file; `~/.datamill/data/datamill.db` when unset.
    #[serde(default)]
    pub database_path: Option<String>,
    pub output_directory: String,
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_sweep_interval_ms")]
    pub sweep_interval_ms: u64,
    #[serde(default = "default_logs_page_size")]
    pub logs_page_size: u64,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub pii: PiiConfig,
}

fn default_worker_count() -> usize {
    num_cpus::get()
}

fn default_queue_capacity() -> usize {
    64
}

fn default_sweep_interval_ms() -> u64 {
    5_000
}

fn default_logs_page_size() -> u64 {
    50
}

impl Config {
    /// Resolved database location.
    pub fn database_path(&self) -> Option<PathBuf> {
        match &self.database_path {
            Some(path) => Some(PathBuf::from(path)),
            None => crate::db::default_database_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PiiConfig {
    #[serde(default = "default_mask")]
    pub mask: String,
    /// Detector names: email, credit_card, ssn, ipv4, phone.
    #[serde(default = "default_detectors")]
    pub detectors: Vec<String>,
}

fn default_mask() -> String {
    "[REDACTED]".to_string()
}

fn default_detectors() -> Vec<String> {
    PiiKind::ALL.iter().map(|k| k.as_str().to_string()).collect()
}

impl Default for PiiConfig {
    fn default() -> Self {
        Self {
            mask: default_mask(),
            detectors: default_detectors(),
        }
    }
}
