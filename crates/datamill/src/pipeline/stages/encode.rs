use crate::job::StageTag;
use crate::pipeline::codec;
use crate::pipeline::stage::{
    Artifact, EncodedOutput, Stage, StageContext, StageError, StageOutcome,
};
use crate::storage::DatasetStorage;

/// Serialises the records in the job's output format and writes the
/// dataset file.
pub struct EncodeStage {
    storage: DatasetStorage,
}

impl EncodeStage {
    pub fn new(storage: DatasetStorage) -> Self {
        Self { storage }
    }
}

impl Stage for EncodeStage {
    fn tag(&self) -> StageTag {
        StageTag::Encode
    }

    fn execute(
        &self,
        ctx: &mut StageContext<'_>,
        input: Artifact,
    ) -> Result<StageOutcome, StageError> {
        let records = input.into_records(self.tag())?;
        let format = ctx.job.output_format;

        let bytes = codec::encode(format, &records)?;
        ctx.report_progress(0.5)?;

        let path = self.storage.store(
            &ctx.job.project_id,
            &ctx.job.id,
            &ctx.job.output_name,
            format.extension(),
            &bytes,
        )?;

        // The file is written; a cancel arriving now must not leave it behind.
        if let Err(e) = ctx.check_cancelled() {
            if let Err(remove_err) = self.storage.remove(&path) {
                log::warn!("Failed to remove {}: {}", path.display(), remove_err);
            }
            return Err(e);
        }

        let record_count = records.len() as u64;
        Ok(StageOutcome {
            artifact: Artifact::Encoded(EncodedOutput {
                path,
                file_size: bytes.len() as u64,
                record_count,
            }),
            records_processed: record_count,
            pii_findings: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::SourceFormat;
    use crate::job::OutputFormat;
    use crate::pipeline::stage::{DetachedMonitor, StageMonitor};
    use crate::pipeline::stages::fixtures;
    use serde_json::json;
    use tempfile::TempDir;

    struct CancelledMonitor;

    impl StageMonitor for CancelledMonitor {
        fn progress(&mut self, _fraction: f64) -> Result<(), StageError> {
            Ok(())
        }

        fn is_cancelled(&mut self) -> bool {
            true
        }
    }

    #[test]
    fn test_encode_writes_dataset_file() {
        let temp = TempDir::new().unwrap();
        let stage = EncodeStage::new(DatasetStorage::new(temp.path()));

        let mut job = fixtures::job(2);
        job.output_format = OutputFormat::Jsonl;
        job.output_name = "clean".to_string();
        let source = fixtures::data_source(std::path::Path::new("/unused"), SourceFormat::Csv);
        let mapping = fixtures::mapping(vec![], vec![], false);
        let mut monitor = DetachedMonitor;
        let mut ctx = StageContext::new(&job, &source, &mapping, &mut monitor);

        let records = vec![
            fixtures::record(json!({"a": 1})),
            fixtures::record(json!({"a": 2})),
        ];
        let outcome = stage.execute(&mut ctx, Artifact::Records(records)).unwrap();

        let Artifact::Encoded(output) = outcome.artifact else {
            panic!("expected an encoded artifact");
        };
        assert_eq!(
            output.path,
            temp.path()
                .join(&job.project_id)
                .join(&job.id)
                .join("clean.jsonl")
        );
        assert_eq!(output.record_count, 2);
        let written = std::fs::read(&output.path).unwrap();
        assert_eq!(written.len() as u64, output.file_size);
        assert_eq!(String::from_utf8(written).unwrap(), "{\"a\":1}\n{\"a\":2}\n");
    }

    #[test]
    fn test_encode_removes_file_when_cancelled() {
        let temp = TempDir::new().unwrap();
        let stage = EncodeStage::new(DatasetStorage::new(temp.path()));

        let job = fixtures::job(1);
        let source = fixtures::data_source(std::path::Path::new("/unused"), SourceFormat::Csv);
        let mapping = fixtures::mapping(vec![], vec![], false);
        let mut monitor = CancelledMonitor;
        let mut ctx = StageContext::new(&job, &source, &mapping, &mut monitor);

        let err = stage
            .execute(
                &mut ctx,
                Artifact::Records(vec![fixtures::record(json!({"a": 1}))]),
            )
            .unwrap_err();
        assert!(matches!(err, StageError::Cancelled));

        let job_dir = temp.path().join(&job.project_id).join(&job.id);
        assert_eq!(std::fs::read_dir(job_dir).unwrap().count(), 0);
    }
}
