use std::path::PathBuf;

use crate::config::Config;

use super::pii::PiiKind;

/// Default number of records between progress reports inside a stage.
pub const DEFAULT_PROGRESS_EVERY: usize = 500;

pub struct PipelineConfig {
    pub output_directory: PathBuf,
    pub pii_mask: String,
    pub pii_detectors: Vec<PiiKind>,
    pub progress_every: usize,
}

impl PipelineConfig {
    pub fn from_config(config: &Config) -> Self {
        let pii_detectors = config
            .pii
            .detectors
            .iter()
            .filter_map(|name| match name.parse::<PiiKind>() {
                Ok(kind) => Some(kind),
                Err(e) => {
                    log::warn!("Ignoring {}", e);
                    None
                }
            })
            .collect();

        Self {
            output_directory: PathBuf::from(&config.output_directory),
            pii_mask: config.pii.mask.clone(),
            pii_detectors,
            progress_every: DEFAULT_PROGRESS_EVERY,
        }
    }
}
