//! Job repository: reads and versioned writes for `processing_jobs`.

use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{get_parsed, get_parsed_opt, to_sql_int, Database, DatabaseError};
use crate::job::{JobStatus, ProcessingJob};

fn job_from_row(row: &Row<'_>) -> Result<ProcessingJob, rusqlite::Error> {
    Ok(ProcessingJob {
        id: row.get("id")?,
        organisation_id: row.get("organisation_id")?,
        project_id: row.get("project_id")?,
        data_source_id: row.get("data_source_id")?,
        schema_mapping_id: row.get("schema_mapping_id")?,
        status: get_parsed(row, "status")?,
        output_format: get_parsed(row, "output_format")?,
        output_name: row.get("output_name")?,
        input_record_count: row.get("input_record_count")?,
        output_record_count: row.get("output_record_count")?,
        pii_detected_count: row.get("pii_detected_count")?,
        progress: row.get("progress")?,
        current_stage: get_parsed_opt(row, "current_stage")?,
        error_message: row.get("error_message")?,
        attempt: row.get("attempt")?,
        version: row.get("version")?,
        started_at: row.get("started_at")?,
        completed_at: row.get("completed_at")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

/// Query filter parameters for job listing.
#[derive(Debug, Default, Clone)]
pub struct JobFilter {
    pub organisation_id: Option<String>,
    pub project_id: Option<String>,
    pub status: Option<JobStatus>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

/// Inserts a new job row.
pub fn insert(conn: &Connection, job: &ProcessingJob) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO processing_jobs (id, organisation_id, project_id, data_source_id,
         schema_mapping_id, status, output_format, output_name, input_record_count,
         output_record_count, pii_detected_count, progress, current_stage, error_message,
         attempt, version, started_at, completed_at, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16,
                 ?17, ?18, ?19, ?20)",
        params![
            job.id,
            job.organisation_id,
            job.project_id,
            job.data_source_id,
            job.schema_mapping_id,
            job.status.as_str(),
            job.output_format.as_str(),
            job.output_name,
            job.input_record_count as i64,
            job.output_record_count.map(|c| c as i64),
            job.pii_detected_count.map(|c| c as i64),
            job.progress,
            job.current_stage.map(|s| s.as_str()),
            job.error_message,
            job.attempt,
            job.version,
            job.started_at,
            job.completed_at,
            job.created_at,
            job.updated_at,
        ],
    )?;
    Ok(())
}

/// Overwrites the mutable columns of `job` if the stored row still has
/// `expected_version`. The stored version becomes `job.version`.
///
/// Returns `false` when the row was changed (or removed) since it was read.
pub fn compare_and_swap(
    conn: &Connection,
    job: &ProcessingJob,
    expected_version: i64,
) -> Result<bool, DatabaseError> {
    let changed = conn.execute(
        "UPDATE processing_jobs SET status = ?3, output_record_count = ?4,
         pii_detected_count = ?5, progress = ?6, current_stage = ?7, error_message = ?8,
         attempt = ?9, version = ?10, started_at = ?11, completed_at = ?12, updated_at = ?13
         WHERE id = ?1 AND version = ?2",
        params![
            job.id,
            expected_version,
            job.status.as_str(),
            job.output_record_count.map(|c| c as i64),
            job.pii_detected_count.map(|c| c as i64),
            job.progress,
            job.current_stage.map(|s| s.as_str()),
            job.error_message,
            job.attempt,
            job.version,
            job.started_at,
            job.completed_at,
            job.updated_at,
        ],
    )?;
    Ok(changed == 1)
}

/// Finds a job by its ID.
pub fn find_by_id(db: &Database, id: &str) -> Result<Option<ProcessingJob>, DatabaseError> {
    db.with_conn(|conn| {
        let job = conn
            .query_row(
                "SELECT * FROM processing_jobs WHERE id = ?1",
                params![id],
                job_from_row,
            )
            .optional()?;
        Ok(job)
    })
}

/// Reads only the status column of a job.
pub fn find_status(db: &Database, id: &str) -> Result<Option<JobStatus>, DatabaseError> {
    db.with_conn(|conn| {
        let status = conn
            .query_row(
                "SELECT status FROM processing_jobs WHERE id = ?1",
                params![id],
                |row| get_parsed(row, "status"),
            )
            .optional()?;
        Ok(status)
    })
}

/// Queries jobs with filters, returning (rows, total_count). Newest first.
pub fn query(
    db: &Database,
    filter: &JobFilter,
) -> Result<(Vec<ProcessingJob>, u64), DatabaseError> {
    db.with_conn(|conn| {
        let mut conditions = Vec::new();
        let mut param_values: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

        if let Some(ref organisation_id) = filter.organisation_id {
            conditions.push(format!("organisation_id = ?{}", param_values.len() + 1));
            param_values.push(Box::new(organisation_id.clone()));
        }
        if let Some(ref project_id) = filter.project_id {
            conditions.push(format!("project_id = ?{}", param_values.len() + 1));
            param_values.push(Box::new(project_id.clone()));
        }
        if let Some(status) = filter.status {
            conditions.push(format!("status = ?{}", param_values.len() + 1));
            param_values.push(Box::new(status.as_str()));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        let count_sql = format!("SELECT COUNT(*) FROM processing_jobs {}", where_clause);
        let params_ref: Vec<&dyn rusqlite::types::ToSql> =
            param_values.iter().map(|p| p.as_ref()).collect();
        let total: u64 = conn.query_row(&count_sql, params_ref.as_slice(), |r| r.get(0))?;

        let limit = to_sql_int("limit", filter.limit.unwrap_or(100))?;
        let offset = to_sql_int("offset", filter.offset.unwrap_or(0))?;
        param_values.push(Box::new(limit));
        param_values.push(Box::new(offset));
        let query_sql = format!(
            "SELECT * FROM processing_jobs {} ORDER BY created_at DESC, id ASC LIMIT ?{} OFFSET ?{}",
            where_clause,
            param_values.len() - 1,
            param_values.len()
        );

        let params_ref: Vec<&dyn rusqlite::types::ToSql> =
            param_values.iter().map(|p| p.as_ref()).collect();
        let mut stmt = conn.prepare(&query_sql)?;
        let rows: Vec<ProcessingJob> = stmt
            .query_map(params_ref.as_slice(), job_from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok((rows, total))
    })
}

/// Returns the ids of all jobs in `status`, oldest first.
pub fn ids_with_status(db: &Database, status: JobStatus) -> Result<Vec<String>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT id FROM processing_jobs WHERE status = ?1 ORDER BY created_at ASC, id ASC",
        )?;
        let ids = stmt
            .query_map(params![status.as_str()], |r| r.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(ids)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::catalog_repo::tests::seed_catalog;
    use crate::job::{state, NewJob, OutputFormat, StageTag};
    use chrono::{Duration, Utc};

    fn test_db() -> Database {
        let db = Database::open_in_memory().expect("Failed to create test database");
        seed_catalog(&db);
        db
    }

    fn sample_job() -> ProcessingJob {
        ProcessingJob::new(
            NewJob {
                organisation_id: "org-1".to_string(),
                project_id: "proj-1".to_string(),
                data_source_id: "ds-1".to_string(),
                schema_mapping_id: "map-1".to_string(),
                output_format: OutputFormat::Csv,
                output_name: "export".to_string(),
                input_record_count: 12,
            },
            Utc::now(),
        )
    }

    fn insert_job(db: &Database, job: &ProcessingJob) {
        db.with_conn(|conn| insert(conn, job)).unwrap();
    }

    #[test]
    fn test_insert_and_find() {
        let db = test_db();
        let job = sample_job();
        insert_job(&db, &job);

        let found = find_by_id(&db, &job.id).unwrap().unwrap();
        assert_eq!(found.id, job.id);
        assert_eq!(found.status, JobStatus::Pending);
        assert_eq!(found.output_format, OutputFormat::Csv);
        assert_eq!(found.input_record_count, 12);
        assert_eq!(found.created_at, job.created_at);
        assert!(found.current_stage.is_none());
    }

    #[test]
    fn test_find_nonexistent() {
        let db = test_db();
        assert!(find_by_id(&db, "nonexistent").unwrap().is_none());
        assert!(find_status(&db, "nonexistent").unwrap().is_none());
    }

    #[test]
    fn test_compare_and_swap_checks_version() {
        let db = test_db();
        let job = sample_job();
        insert_job(&db, &job);

        let mut next = state::start(&job, Utc::now()).unwrap();
        next.version = job.version + 1;

        let swapped = db.with_conn(|conn| compare_and_swap(conn, &next, job.version)).unwrap();
        assert!(swapped);

        // A second writer still holding the old version loses.
        let mut stale = state::cancel(&job, Utc::now()).unwrap();
        stale.version = job.version + 1;
        let swapped = db.with_conn(|conn| compare_and_swap(conn, &stale, job.version)).unwrap();
        assert!(!swapped);

        let found = find_by_id(&db, &job.id).unwrap().unwrap();
        assert_eq!(found.status, JobStatus::Processing);
        assert_eq!(found.current_stage, Some(StageTag::Initializing));
        assert_eq!(found.version, 1);
        assert_eq!(find_status(&db, &job.id).unwrap(), Some(JobStatus::Processing));
    }

    #[test]
    fn test_query_filters_and_pagination() {
        let db = test_db();
        let base = Utc::now();
        for i in 0..5 {
            let mut job = sample_job();
            job.created_at = base + Duration::seconds(i);
            if i % 2 == 0 {
                job.status = JobStatus::Failed;
            }
            insert_job(&db, &job);
        }

        let (rows, total) = query(&db, &JobFilter::default()).unwrap();
        assert_eq!(total, 5);
        assert_eq!(rows.len(), 5);
        assert!(rows[0].created_at > rows[4].created_at);

        let (rows, total) = query(
            &db,
            &JobFilter {
                status: Some(JobStatus::Failed),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(total, 3);
        assert!(rows.iter().all(|j| j.status == JobStatus::Failed));

        let (rows, total) = query(
            &db,
            &JobFilter {
                project_id: Some("proj-1".to_string()),
                limit: Some(2),
                offset: Some(4),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(total, 5);
        assert_eq!(rows.len(), 1);
    }

    #[test]
    fn test_ids_with_status_oldest_first() {
        let db = test_db();
        let base = Utc::now();
        let mut first = sample_job();
        first.created_at = base;
        let mut second = sample_job();
        second.created_at = base + Duration::seconds(1);
        insert_job(&db, &second);
        insert_job(&db, &first);

        let ids = ids_with_status(&db, JobStatus::Pending).unwrap();
        assert_eq!(ids, vec![first.id, second.id]);
        assert!(ids_with_status(&db, JobStatus::Completed).unwrap().is_empty());
    }
}
