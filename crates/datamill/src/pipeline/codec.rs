//! Record decoding (data source files) and encoding (datasets).

use serde_json::{Map, Value};
use thiserror::Error;

use crate::catalog::SourceFormat;
use crate::job::OutputFormat;

use super::pii::value_text;

/// One flat record: field name to JSON value.
pub type Record = Map<String, Value>;

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("expected a JSON array of objects")]
    NotAnArray,

    #[error("record {index} is not an object")]
    NotAnObject { index: usize },

    #[error("line {line}: {reason}")]
    Line { line: usize, reason: String },
}

/// Parses a whole data source file.
pub fn decode(format: SourceFormat, text: &str) -> Result<Vec<Record>, DecodeError> {
    match format {
        SourceFormat::Json => decode_json(text),
        SourceFormat::Jsonl => decode_jsonl(text),
        SourceFormat::Csv => decode_csv(text),
    }
}

fn decode_json(text: &str) -> Result<Vec<Record>, DecodeError> {
    let value: Value = serde_json::from_str(text)?;
    let Value::Array(items) = value else {
        return Err(DecodeError::NotAnArray);
    };
    items
        .into_iter()
        .enumerate()
        .map(|(index, item)| match item {
            Value::Object(map) => Ok(map),
            _ => Err(DecodeError::NotAnObject { index }),
        })
        .collect()
}

fn decode_jsonl(text: &str) -> Result<Vec<Record>, DecodeError> {
    let mut records = Vec::new();
    for (i, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let value: Value = serde_json::from_str(line).map_err(|e| DecodeError::Line {
            line: i + 1,
            reason: e.to_string(),
        })?;
        match value {
            Value::Object(map) => records.push(map),
            _ => {
                return Err(DecodeError::Line {
                    line: i + 1,
                    reason: "not a JSON object".to_string(),
                })
            }
        }
    }
    Ok(records)
}

/// CSV with a header row. Fields may be quoted with `"`; a doubled quote
/// inside a quoted field is a literal quote. All values decode as strings.
fn decode_csv(text: &str) -> Result<Vec<Record>, DecodeError> {
    let rows = split_csv_rows(text)?;
    let mut rows = rows.into_iter();
    let Some((_, header)) = rows.next() else {
        return Ok(Vec::new());
    };

    let mut records = Vec::new();
    for (line, row) in rows {
        if row.len() == 1 && row[0].is_empty() {
            continue;
        }
        if row.len() != header.len() {
            return Err(DecodeError::Line {
                line,
                reason: format!("expected {} fields, found {}", header.len(), row.len()),
            });
        }
        let record = header
            .iter()
            .cloned()
            .zip(row.into_iter().map(Value::String))
            .collect();
        records.push(record);
    }
    Ok(records)
}

/// Splits CSV text into rows of fields, tagging each row with the line it
/// starts on.
fn split_csv_rows(text: &str) -> Result<Vec<(usize, Vec<String>)>, DecodeError> {
    let mut rows = Vec::new();
    let mut row = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut line = 1;
    let mut row_start = 1;
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        if in_quotes {
            match c {
                '"' if chars.peek() == Some(&'"') => {
                    chars.next();
                    field.push('"');
                }
                '"' => in_quotes = false,
                '\n' => {
                    line += 1;
                    field.push(c);
                }
                _ => field.push(c),
            }
            continue;
        }
        match c {
            '"' if field.is_empty() => in_quotes = true,
            ',' => row.push(std::mem::take(&mut field)),
            '\r' if chars.peek() == Some(&'\n') => {}
            '\n' => {
                row.push(std::mem::take(&mut field));
                rows.push((row_start, std::mem::take(&mut row)));
                line += 1;
                row_start = line;
            }
            _ => field.push(c),
        }
    }

    if in_quotes {
        return Err(DecodeError::Line {
            line: row_start,
            reason: "unterminated quoted field".to_string(),
        });
    }
    if !field.is_empty() || !row.is_empty() {
        row.push(field);
        rows.push((row_start, row));
    }
    Ok(rows)
}

/// Serialises records in the requested output format.
pub fn encode(format: OutputFormat, records: &[Record]) -> Result<Vec<u8>, serde_json::Error> {
    match format {
        OutputFormat::Json => serde_json::to_vec_pretty(records),
        OutputFormat::Jsonl => {
            let mut out = Vec::new();
            for record in records {
                serde_json::to_writer(&mut out, record)?;
                out.push(b'\n');
            }
            Ok(out)
        }
        OutputFormat::Csv => Ok(encode_csv(records).into_bytes()),
    }
}

/// Columns are the union of all record keys in first-seen order.
fn encode_csv(records: &[Record]) -> String {
    let mut columns: Vec<&str> = Vec::new();
    for record in records {
        for key in record.keys() {
            if !columns.contains(&key.as_str()) {
                columns.push(key);
            }
        }
    }

    let mut out = String::new();
    if columns.is_empty() {
        return out;
    }
    push_csv_row(&mut out, columns.iter().map(|c| c.to_string()));
    for record in records {
        push_csv_row(
            &mut out,
            columns
                .iter()
                .map(|c| record.get(*c).map(value_text).unwrap_or_default()),
        );
    }
    out
}

fn push_csv_row(out: &mut String, fields: impl Iterator<Item = String>) {
    for (i, field) in fields.enumerate() {
        if i > 0 {
            out.push(',');
        }
        out.push_str(&escape_csv(&field));
    }
    out.push('\n');
}

fn escape_csv(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_json_array() {
        let records = decode(SourceFormat::Json, r#"[{"a": 1}, {"a": 2, "b": "x"}]"#).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1]["b"], "x");

        assert!(matches!(
            decode(SourceFormat::Json, r#"{"a": 1}"#),
            Err(DecodeError::NotAnArray)
        ));
        assert!(matches!(
            decode(SourceFormat::Json, "[1]"),
            Err(DecodeError::NotAnObject { index: 0 })
        ));
    }

    #[test]
    fn test_decode_jsonl_skips_blank_lines() {
        let records = decode(SourceFormat::Jsonl, "{\"a\":1}\n\n{\"a\":2}\n").unwrap();
        assert_eq!(records.len(), 2);

        let err = decode(SourceFormat::Jsonl, "{\"a\":1}\n[2]\n").unwrap_err();
        assert!(err.to_string().starts_with("line 2"));
    }

    #[test]
    fn test_decode_csv_with_quotes() {
        let text = "name,note\r\nAda,\"likes, commas\"\n\"Bob \"\"B\"\"\",\"two\nlines\"\n";
        let records = decode(SourceFormat::Csv, text).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0]["note"], "likes, commas");
        assert_eq!(records[1]["name"], "Bob \"B\"");
        assert_eq!(records[1]["note"], "two\nlines");
    }

    #[test]
    fn test_decode_csv_field_count_mismatch() {
        let err = decode(SourceFormat::Csv, "a,b\n1,2\n3\n").unwrap_err();
        assert_eq!(err.to_string(), "line 3: expected 2 fields, found 1");

        let err = decode(SourceFormat::Csv, "a\n\"open").unwrap_err();
        assert!(err.to_string().contains("unterminated"));
    }

    #[test]
    fn test_decode_csv_header_only() {
        assert!(decode(SourceFormat::Csv, "a,b\n").unwrap().is_empty());
        assert!(decode(SourceFormat::Csv, "").unwrap().is_empty());
    }

    fn sample() -> Vec<Record> {
        vec![
            json!({"id": 1, "name": "Ada"}).as_object().unwrap().clone(),
            json!({"id": 2, "city": "Oslo, NO"}).as_object().unwrap().clone(),
        ]
    }

    #[test]
    fn test_encode_csv_union_of_columns() {
        let out = String::from_utf8(encode(OutputFormat::Csv, &sample()).unwrap()).unwrap();
        assert_eq!(out, "id,name,city\n1,Ada,\n2,,\"Oslo, NO\"\n");
    }

    #[test]
    fn test_encode_jsonl_one_object_per_line() {
        let out = String::from_utf8(encode(OutputFormat::Jsonl, &sample()).unwrap()).unwrap();
        let lines: Vec<_> = out.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(
            serde_json::from_str::<Value>(lines[0]).unwrap(),
            json!({"id": 1, "name": "Ada"})
        );
    }

    #[test]
    fn test_encode_json_array() {
        let out = encode(OutputFormat::Json, &sample()).unwrap();
        let value: Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(value.as_array().unwrap().len(), 2);
        assert!(encode(OutputFormat::Csv, &[]).unwrap().is_empty());
    }
}
