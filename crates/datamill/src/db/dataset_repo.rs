//! Dataset repository: one row per completed job.

use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{get_json, get_parsed, to_json, Database, DatabaseError};
use crate::job::Dataset;

fn dataset_from_row(row: &Row<'_>) -> Result<Dataset, rusqlite::Error> {
    Ok(Dataset {
        id: row.get("id")?,
        job_id: row.get("job_id")?,
        data_source_id: row.get("data_source_id")?,
        project_id: row.get("project_id")?,
        name: row.get("name")?,
        format: get_parsed(row, "format")?,
        file_path: row.get("file_path")?,
        file_size: row.get("file_size")?,
        record_count: row.get("record_count")?,
        metadata: get_json(row, "metadata")?,
        created_at: row.get("created_at")?,
    })
}

/// Inserts a dataset. The `job_id` column is unique, so a second dataset
/// for the same job fails.
pub fn insert(conn: &Connection, dataset: &Dataset) -> Result<(), DatabaseError> {
    let metadata = to_json("metadata", &dataset.metadata)?;
    conn.execute(
        "INSERT INTO datasets (id, job_id, data_source_id, project_id, name, format,
         file_path, file_size, record_count, metadata, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        params![
            dataset.id,
            dataset.job_id,
            dataset.data_source_id,
            dataset.project_id,
            dataset.name,
            dataset.format.as_str(),
            dataset.file_path,
            dataset.file_size as i64,
            dataset.record_count as i64,
            metadata,
            dataset.created_at,
        ],
    )?;
    Ok(())
}

pub fn find_by_job(db: &Database, job_id: &str) -> Result<Option<Dataset>, DatabaseError> {
    db.with_conn(|conn| {
        Ok(conn
            .query_row(
                "SELECT * FROM datasets WHERE job_id = ?1",
                params![job_id],
                dataset_from_row,
            )
            .optional()?)
    })
}
