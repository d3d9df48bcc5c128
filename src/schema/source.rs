//! Schema state loading
//!
//! The registry asks a [`SchemaSource`] for the current state whenever it
//! is told something changed. [`ReloadSource`] simply refetches everything.

use crate::error::AppError;
use crate::schema::models::{LogicalColumn, LogicalSchema, TableDefinition};
use crate::schema::store::SchemaStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// Everything the registry knows about one database
#[derive(Debug, Clone)]
pub struct SchemaState {
    pub database_id: Uuid,
    pub schemas: Vec<LogicalSchema>,
    /// Schema id -> columns ordered by `order`
    pub columns: HashMap<Uuid, Vec<LogicalColumn>>,
    pub loaded_at: DateTime<Utc>,
}

impl SchemaState {
    pub fn empty(database_id: Uuid) -> Self {
        Self {
            database_id,
            schemas: Vec::new(),
            columns: HashMap::new(),
            loaded_at: Utc::now(),
        }
    }

    pub fn schema(&self, schema_id: Uuid) -> Option<&LogicalSchema> {
        self.schemas.iter().find(|s| s.id == schema_id)
    }

    pub fn columns_of(&self, schema_id: Uuid) -> &[LogicalColumn] {
        self.columns.get(&schema_id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn tables(&self) -> Vec<TableDefinition> {
        self.schemas
            .iter()
            .map(|s| TableDefinition {
                schema: s.clone(),
                columns: self.columns_of(s.id).to_vec(),
            })
            .collect()
    }
}

/// Produces a fresh view of a database's logical schema
#[async_trait]
pub trait SchemaSource: Send + Sync {
    async fn refresh(&self, database_id: Uuid) -> Result<SchemaState, AppError>;
}

/// Invalidate-and-reload: refetch every schema and column
pub struct ReloadSource {
    store: Arc<dyn SchemaStore>,
}

impl ReloadSource {
    pub fn new(store: Arc<dyn SchemaStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl SchemaSource for ReloadSource {
    async fn refresh(&self, database_id: Uuid) -> Result<SchemaState, AppError> {
        let schemas = self.store.list_schemas(database_id).await?;
        let all_columns = self.store.list_database_columns(database_id).await?;

        let mut columns: HashMap<Uuid, Vec<LogicalColumn>> = HashMap::new();
        for column in all_columns {
            columns.entry(column.schema_id).or_default().push(column);
        }
        for list in columns.values_mut() {
            list.sort_by_key(|c| c.order);
        }

        debug!(
            "Reloaded {} schemas for database {}",
            schemas.len(),
            database_id
        );

        Ok(SchemaState {
            database_id,
            schemas,
            columns,
            loaded_at: Utc::now(),
        })
    }
}
