//! Catalog of entities a job borrows by id.

pub mod model;

pub use model::{
    DataSource, DataSourceStatus, FieldMapping, FilterOp, FilterRule, PiiStrategy, Project,
    SchemaMapping, SourceFormat,
};

use crate::db::{catalog_repo, Database, DatabaseError};

/// Read/insert access to projects, data sources and schema mappings.
#[derive(Clone)]
pub struct Catalog {
    db: Database,
}

impl Catalog {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn add_project(&self, project: &Project) -> Result<(), DatabaseError> {
        catalog_repo::insert_project(&self.db, project)
    }

    pub fn project(&self, id: &str) -> Result<Option<Project>, DatabaseError> {
        catalog_repo::find_project(&self.db, id)
    }

    pub fn add_data_source(&self, source: &DataSource) -> Result<(), DatabaseError> {
        catalog_repo::insert_data_source(&self.db, source)
    }

    pub fn data_source(&self, id: &str) -> Result<Option<DataSource>, DatabaseError> {
        catalog_repo::find_data_source(&self.db, id)
    }

    pub fn set_data_source_status(
        &self,
        id: &str,
        status: DataSourceStatus,
    ) -> Result<bool, DatabaseError> {
        catalog_repo::set_data_source_status(&self.db, id, status, chrono::Utc::now())
    }

    /// Inserts a mapping after checking its field mappings and filter rules.
    pub fn add_schema_mapping(&self, mapping: &SchemaMapping) -> Result<(), CatalogError> {
        mapping.validate().map_err(CatalogError::InvalidMapping)?;
        catalog_repo::insert_schema_mapping(&self.db, mapping)?;
        Ok(())
    }

    pub fn schema_mapping(&self, id: &str) -> Result<Option<SchemaMapping>, DatabaseError> {
        catalog_repo::find_schema_mapping(&self.db, id)
    }
}

#[derive(thiserror::Error, Debug)]
pub enum CatalogError {
    #[error("invalid schema mapping: {0}")]
    InvalidMapping(String),

    #[error(transparent)]
    Database(#[from] DatabaseError),
}
