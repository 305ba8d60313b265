use serde_json::Value;

use crate::catalog::{FilterOp, FilterRule};
use crate::job::StageTag;
use crate::pipeline::codec::Record;
use crate::pipeline::pii::value_text;
use crate::pipeline::stage::{Artifact, Stage, StageContext, StageError, StageOutcome};

/// Keeps the records that satisfy every filter rule of the mapping.
pub struct FilterStage {
    progress_every: usize,
}

impl FilterStage {
    pub fn new(progress_every: usize) -> Self {
        Self { progress_every }
    }
}

impl Stage for FilterStage {
    fn tag(&self) -> StageTag {
        StageTag::Filter
    }

    fn execute(
        &self,
        ctx: &mut StageContext<'_>,
        input: Artifact,
    ) -> Result<StageOutcome, StageError> {
        let records = input.into_records(self.tag())?;
        let total = records.len();
        let rules = &ctx.mapping.filters;

        let mut kept = Vec::with_capacity(total);
        for (i, record) in records.into_iter().enumerate() {
            if rules.iter().all(|rule| matches(rule, &record)) {
                kept.push(record);
            }
            ctx.tick(i, total, self.progress_every)?;
        }

        log::debug!(
            "Filter kept {} of {} records for job {}",
            kept.len(),
            total,
            ctx.job.id
        );

        Ok(StageOutcome {
            artifact: Artifact::Records(kept),
            records_processed: total as u64,
            pii_findings: None,
        })
    }
}

/// Evaluates one rule against a record.
pub fn matches(rule: &FilterRule, record: &Record) -> bool {
    let field = record.get(&rule.field).filter(|v| !v.is_null());
    match rule.op {
        FilterOp::Exists => field.is_some(),
        FilterOp::NotExists => field.is_none(),
        FilterOp::Eq => match (field, &rule.value) {
            (Some(a), Some(b)) => values_equal(a, b),
            (None, Some(b)) => b.is_null(),
            _ => false,
        },
        FilterOp::Ne => match (field, &rule.value) {
            (Some(a), Some(b)) => !values_equal(a, b),
            (None, Some(b)) => !b.is_null(),
            _ => true,
        },
        FilterOp::Contains => match (field, &rule.value) {
            (Some(Value::Array(items)), Some(b)) => items.iter().any(|a| values_equal(a, b)),
            (Some(a), Some(b)) => value_text(a).contains(&value_text(b)),
            _ => false,
        },
        FilterOp::Gt => compare_numbers(field, rule.value.as_ref(), |a, b| a > b),
        FilterOp::Lt => compare_numbers(field, rule.value.as_ref(), |a, b| a < b),
    }
}

/// Numbers compare numerically even when one side is a numeric string
/// (CSV sources decode every value as a string).
fn values_equal(a: &Value, b: &Value) -> bool {
    if let (Some(x), Some(y)) = (as_number(a), as_number(b)) {
        if a.is_number() || b.is_number() {
            return x == y;
        }
    }
    match (a, b) {
        (Value::String(_), _) | (_, Value::String(_)) => value_text(a) == value_text(b),
        _ => a == b,
    }
}

fn compare_numbers(
    field: Option<&Value>,
    rule_value: Option<&Value>,
    cmp: impl Fn(f64, f64) -> bool,
) -> bool {
    match (field.and_then(as_number), rule_value.and_then(as_number)) {
        (Some(a), Some(b)) => cmp(a, b),
        _ => false,
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
