//! Catalog repository: projects, data sources and schema mappings.

use rusqlite::{params, OptionalExtension, Row};

use super::{get_json, get_parsed, to_json, Database, DatabaseError};
use crate::catalog::{DataSource, DataSourceStatus, Project, SchemaMapping};

fn project_from_row(row: &Row<'_>) -> Result<Project, rusqlite::Error> {
    Ok(Project {
        id: row.get("id")?,
        organisation_id: row.get("organisation_id")?,
        name: row.get("name")?,
        created_at: row.get("created_at")?,
    })
}

fn data_source_from_row(row: &Row<'_>) -> Result<DataSource, rusqlite::Error> {
    Ok(DataSource {
        id: row.get("id")?,
        organisation_id: row.get("organisation_id")?,
        project_id: row.get("project_id")?,
        name: row.get("name")?,
        status: get_parsed(row, "status")?,
        format: get_parsed(row, "format")?,
        file_path: row.get("file_path")?,
        record_count: row.get("record_count")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

fn mapping_from_row(row: &Row<'_>) -> Result<SchemaMapping, rusqlite::Error> {
    Ok(SchemaMapping {
        id: row.get("id")?,
        project_id: row.get("project_id")?,
        data_source_id: row.get("data_source_id")?,
        name: row.get("name")?,
        is_active: row.get("is_active")?,
        detect_pii: row.get("detect_pii")?,
        fields: get_json(row, "fields")?,
        filters: get_json(row, "filters")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

pub fn insert_project(db: &Database, project: &Project) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO projects (id, organisation_id, name, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![
                project.id,
                project.organisation_id,
                project.name,
                project.created_at
            ],
        )?;
        Ok(())
    })
}

pub fn find_project(db: &Database, id: &str) -> Result<Option<Project>, DatabaseError> {
    db.with_conn(|conn| {
        Ok(conn
            .query_row(
                "SELECT * FROM projects WHERE id = ?1",
                params![id],
                project_from_row,
            )
            .optional()?)
    })
}

pub fn insert_data_source(db: &Database, source: &DataSource) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO data_sources (id, organisation_id, project_id, name, status, format,
             file_path, record_count, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                source.id,
                source.organisation_id,
                source.project_id,
                source.name,
                source.status.as_str(),
                source.format.as_str(),
                source.file_path,
                source.record_count as i64,
                source.created_at,
                source.updated_at,
            ],
        )?;
        Ok(())
    })
}

pub fn find_data_source(db: &Database, id: &str) -> Result<Option<DataSource>, DatabaseError> {
    db.with_conn(|conn| {
        Ok(conn
            .query_row(
                "SELECT * FROM data_sources WHERE id = ?1",
                params![id],
                data_source_from_row,
            )
            .optional()?)
    })
}

/// Updates the readiness of a data source. Returns `false` if it does not exist.
pub fn set_data_source_status(
    db: &Database,
    id: &str,
    status: DataSourceStatus,
    now: chrono::DateTime<chrono::Utc>,
) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE data_sources SET status = ?2, updated_at = ?3 WHERE id = ?1",
            params![id, status.as_str(), now],
        )?;
        Ok(changed == 1)
    })
}

pub fn insert_schema_mapping(db: &Database, mapping: &SchemaMapping) -> Result<(), DatabaseError> {
    let fields = to_json("fields", &mapping.fields)?;
    let filters = to_json("filters", &mapping.filters)?;
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO schema_mappings (id, project_id, data_source_id, name, is_active,
             detect_pii, fields, filters, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                mapping.id,
                mapping.project_id,
                mapping.data_source_id,
                mapping.name,
                mapping.is_active,
                mapping.detect_pii,
                fields,
                filters,
                mapping.created_at,
                mapping.updated_at,
            ],
        )?;
        Ok(())
    })
}

pub fn find_schema_mapping(
    db: &Database,
    id: &str,
) -> Result<Option<SchemaMapping>, DatabaseError> {
    db.with_conn(|conn| {
        Ok(conn
            .query_row(
                "SELECT * FROM schema_mappings WHERE id = ?1",
                params![id],
                mapping_from_row,
            )
            .optional()?)
    })
}
