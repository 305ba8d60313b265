use serde_json::Value;

use crate::catalog::SchemaMapping;
use crate::job::StageTag;
use crate::pipeline::codec::Record;
use crate::pipeline::pii::{self, PiiDetector};
use crate::pipeline::stage::{Artifact, Stage, StageContext, StageError, StageOutcome};

/// Projects source fields onto the mapping's targets and applies the PII
/// policy.
///
/// A mapping without fields keeps every field as is. Fields with an explicit
/// strategy count one finding per non-null value; when the mapping turns on
/// detection, the remaining string values are scanned as well.
pub struct MapRedactStage {
    detector: PiiDetector,
    progress_every: usize,
}

impl MapRedactStage {
    pub fn new(detector: PiiDetector, progress_every: usize) -> Self {
        Self {
            detector,
            progress_every,
        }
    }

    fn map_record(&self, mapping: &SchemaMapping, record: Record) -> (Record, u64) {
        let mut findings = 0u64;
        let mut redacted_fields = Vec::new();

        let mut out = if mapping.fields.is_empty() {
            record
        } else {
            let mut out = Record::new();
            for field in &mapping.fields {
                let Some(value) = record.get(&field.source) else {
                    continue;
                };
                match field.pii {
                    Some(strategy) => {
                        if !value.is_null() {
                            findings += 1;
                        }
                        if let Some(v) = pii::apply_strategy(strategy, value, self.detector.mask())
                        {
                            out.insert(field.target.clone(), v);
                        }
                        redacted_fields.push(field.target.as_str());
                    }
                    None => {
                        out.insert(field.target.clone(), value.clone());
                    }
                }
            }
            out
        };

        if mapping.detect_pii {
            for (key, value) in out.iter_mut() {
                if redacted_fields.contains(&key.as_str()) {
                    continue;
                }
                if let Value::String(text) = value {
                    let (redacted, found) = self.detector.redact(text);
                    if found > 0 {
                        findings += found;
                        *text = redacted;
                    }
                }
            }
        }

        (out, findings)
    }
}

impl Stage for MapRedactStage {
    fn tag(&self) -> StageTag {
        StageTag::MapRedact
    }

    fn execute(
        &self,
        ctx: &mut StageContext<'_>,
        input: Artifact,
    ) -> Result<StageOutcome, StageError> {
        let records = input.into_records(self.tag())?;
        let total = records.len();
        let mut findings = 0u64;
        let mut mapped = Vec::with_capacity(total);

        for (i, record) in records.into_iter().enumerate() {
            let (record, found) = self.map_record(ctx.mapping, record);
            findings += found;
            mapped.push(record);
            ctx.tick(i, total, self.progress_every)?;
        }

        log::debug!(
            "Mapped {} records for job {} ({} PII findings)",
            total,
            ctx.job.id,
            findings
        );

        Ok(StageOutcome {
            artifact: Artifact::Records(mapped),
            records_processed: total as u64,
            pii_findings: Some(findings),
        })
    }
}
