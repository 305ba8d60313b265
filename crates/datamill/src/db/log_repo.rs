//! Job log repository: append-only entries in `job_logs`.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};

use super::{get_json_opt, get_parsed, to_json, to_sql_int, Database, DatabaseError};
use crate::job::{JobLogEntry, NewLogEntry};

fn entry_from_row(row: &Row<'_>) -> Result<JobLogEntry, rusqlite::Error> {
    Ok(JobLogEntry {
        id: row.get("id")?,
        job_id: row.get("job_id")?,
        level: get_parsed(row, "level")?,
        message: row.get("message")?,
        details: get_json_opt(row, "details")?,
        created_at: row.get("created_at")?,
    })
}

/// Appends one entry. Entries are never updated afterwards.
pub fn append(
    conn: &Connection,
    entry: &NewLogEntry,
    now: DateTime<Utc>,
) -> Result<i64, DatabaseError> {
    let details = entry
        .details
        .as_ref()
        .map(|d| to_json("details", d))
        .transpose()?;
    conn.execute(
        "INSERT INTO job_logs (job_id, level, message, details, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            entry.job_id,
            entry.level.as_str(),
            entry.message,
            details,
            now
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Lists a page of a job's entries in write order, with the total count.
pub fn list_for_job(
    db: &Database,
    job_id: &str,
    limit: u64,
    offset: u64,
) -> Result<(Vec<JobLogEntry>, u64), DatabaseError> {
    let limit = to_sql_int("limit", limit)?;
    let offset = to_sql_int("offset", offset)?;
    db.with_conn(|conn| {
        let total: u64 = conn.query_row(
            "SELECT COUNT(*) FROM job_logs WHERE job_id = ?1",
            params![job_id],
            |r| r.get(0),
        )?;
        let mut stmt = conn.prepare(
            "SELECT * FROM job_logs WHERE job_id = ?1 ORDER BY id ASC LIMIT ?2 OFFSET ?3",
        )?;
        let rows = stmt
            .query_map(params![job_id, limit, offset], entry_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok((rows, total))
    })
}
