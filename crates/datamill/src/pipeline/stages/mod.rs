//! The default stage executors, in execution order.

pub mod encode;
pub mod filter;
pub mod ingest;
pub mod map_redact;

pub use encode::EncodeStage;
pub use filter::FilterStage;
pub use ingest::IngestStage;
pub use map_redact::MapRedactStage;

use super::config::PipelineConfig;
use super::pii::PiiDetector;
use super::stage::Stage;
use crate::storage::DatasetStorage;

/// ingest -> map+redact -> filter -> encode.
pub fn default_stages(config: &PipelineConfig) -> Vec<Box<dyn Stage>> {
    let detector = PiiDetector::new(&config.pii_detectors, config.pii_mask.clone());
    vec![
        Box::new(IngestStage),
        Box::new(MapRedactStage::new(detector, config.progress_every)),
        Box::new(FilterStage::new(config.progress_every)),
        Box::new(EncodeStage::new(DatasetStorage::new(&config.output_directory))),
    ]
}
