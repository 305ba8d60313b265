use std::path::PathBuf;

use log::{debug, warn};

use crate::job::StageTag;
use crate::pipeline::codec;
use crate::pipeline::stage::{Artifact, Stage, StageContext, StageError, StageOutcome};

/// Materialises the data source file into records.
pub struct IngestStage;

impl Stage for IngestStage {
    fn tag(&self) -> StageTag {
        StageTag::Ingest
    }

    fn execute(
        &self,
        ctx: &mut StageContext<'_>,
        _input: Artifact,
    ) -> Result<StageOutcome, StageError> {
        ctx.check_cancelled()?;

        let path = PathBuf::from(&ctx.data_source.file_path);
        let text = std::fs::read_to_string(&path).map_err(|e| StageError::ReadSource {
            path: path.clone(),
            source: e,
        })?;
        ctx.report_progress(0.5)?;

        let records = codec::decode(ctx.data_source.format, &text)
            .map_err(|e| StageError::Decode { path, source: e })?;

        let count = records.len() as u64;
        if count != ctx.job.input_record_count {
            warn!(
                "Data source {} has {} records, job was created with {}",
                ctx.data_source.id, count, ctx.job.input_record_count
            );
        }
        debug!("Ingested {} records from {}", count, ctx.data_source.id);

        Ok(StageOutcome {
            artifact: Artifact::Records(records),
            records_processed: count,
            pii_findings: None,
        })
    }
}
