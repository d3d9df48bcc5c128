//! Logical metadata persistence
//!
//! Row CRUD over `database_schemas` and `schema_columns`. Every write is
//! announced on the [`ChangeFeed`] so registries can resynchronize.

use crate::db::queries::*;
use crate::ddl::{Dialect, PostgresDialect};
use crate::error::AppError;
use crate::schema::feed::{ChangeFeed, FeedEvent, FeedEventType};
use crate::schema::models::{LogicalColumn, LogicalSchema};
use async_trait::async_trait;
use deadpool_postgres::Pool;
use std::sync::Arc;
use tokio_postgres::Row;
use tracing::debug;
use uuid::Uuid;

pub const SCHEMAS_TABLE: &str = "database_schemas";
pub const COLUMNS_TABLE: &str = "schema_columns";

/// Store for logical schema metadata
#[async_trait]
pub trait SchemaStore: Send + Sync {
    async fn insert_schema(&self, schema: &LogicalSchema) -> Result<(), AppError>;
    async fn get_schema(&self, schema_id: Uuid) -> Result<Option<LogicalSchema>, AppError>;
    async fn list_schemas(&self, database_id: Uuid) -> Result<Vec<LogicalSchema>, AppError>;
    async fn set_column_count(&self, schema_id: Uuid, count: i32) -> Result<(), AppError>;
    /// Deletes the schema row; its columns go with it
    async fn delete_schema(&self, schema_id: Uuid) -> Result<bool, AppError>;

    async fn insert_columns(&self, columns: &[LogicalColumn]) -> Result<(), AppError>;
    async fn get_column(&self, column_id: Uuid) -> Result<Option<LogicalColumn>, AppError>;
    /// Columns of one schema, ordered by `order`
    async fn list_columns(&self, schema_id: Uuid) -> Result<Vec<LogicalColumn>, AppError>;
    async fn list_database_columns(&self, database_id: Uuid) -> Result<Vec<LogicalColumn>, AppError>;
    async fn update_column(&self, column: &LogicalColumn) -> Result<bool, AppError>;
    async fn delete_column(&self, column_id: Uuid) -> Result<bool, AppError>;

    /// Every row of a physical dynamic table as JSON
    async fn fetch_table_rows(&self, table_name: &str) -> Result<Vec<serde_json::Value>, AppError>;
}

/// PostgreSQL-backed schema store
pub struct PgSchemaStore {
    pool: Pool,
    feed: Arc<ChangeFeed>,
}

impl PgSchemaStore {
    pub fn new(pool: Pool, feed: Arc<ChangeFeed>) -> Self {
        Self { pool, feed }
    }

    async fn announce<T: serde::Serialize>(
        &self,
        event_type: FeedEventType,
        table: &str,
        database_id: Uuid,
        row: &T,
    ) {
        let event = FeedEvent {
            event_type,
            table: table.to_string(),
            database_id,
            row: serde_json::to_value(row).unwrap_or_default(),
        };
        let delivered = self.feed.publish(event).await;
        debug!("Announced {:?} on {} to {} subscribers", event_type, table, delivered);
    }

    async fn database_of(&self, schema_id: Uuid) -> Result<Option<Uuid>, AppError> {
        Ok(self.get_schema(schema_id).await?.map(|s| s.database_id))
    }
}

fn schema_from_row(row: &Row) -> LogicalSchema {
    LogicalSchema {
        id: row.get("id"),
        database_id: row.get("database_id"),
        table_name: row.get("table_name"),
        display_name: row.get("display_name"),
        column_count: row.get("column_count"),
        record_count: row.get("record_count"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

fn column_from_row(row: &Row) -> Result<LogicalColumn, AppError> {
    let references: Option<serde_json::Value> = row.get("references");
    let references = references
        .map(serde_json::from_value)
        .transpose()
        .map_err(|e| AppError::Serialization(format!("Invalid column reference: {}", e)))?;

    Ok(LogicalColumn {
        id: row.get("id"),
        schema_id: row.get("schema_id"),
        name: row.get("name"),
        data_type: row.get("type"),
        nullable: row.get("nullable"),
        is_primary_key: row.get("is_primary_key"),
        is_unique: row.get("is_unique"),
        default_value: row.get("default_value"),
        order: row.get("order"),
        max_length: row.get("max_length"),
        references,
        comment: row.get("comment"),
    })
}

fn references_json(column: &LogicalColumn) -> Result<Option<serde_json::Value>, AppError> {
    column
        .references
        .as_ref()
        .map(serde_json::to_value)
        .transpose()
        .map_err(|e| AppError::Serialization(e.to_string()))
}

#[async_trait]
impl SchemaStore for PgSchemaStore {
    async fn insert_schema(&self, schema: &LogicalSchema) -> Result<(), AppError> {
        let client = self.pool.get().await?;
        client
            .execute(
                INSERT_SCHEMA,
                &[
                    &schema.id,
                    &schema.database_id,
                    &schema.table_name,
                    &schema.display_name,
                    &schema.column_count,
                    &schema.record_count,
                    &schema.created_at,
                    &schema.updated_at,
                ],
            )
            .await?;

        self.announce(FeedEventType::Insert, SCHEMAS_TABLE, schema.database_id, schema)
            .await;
        Ok(())
    }

    async fn get_schema(&self, schema_id: Uuid) -> Result<Option<LogicalSchema>, AppError> {
        let client = self.pool.get().await?;
        let row = client.query_opt(GET_SCHEMA, &[&schema_id]).await?;
        Ok(row.as_ref().map(schema_from_row))
    }

    async fn list_schemas(&self, database_id: Uuid) -> Result<Vec<LogicalSchema>, AppError> {
        let client = self.pool.get().await?;
        let rows = client.query(LIST_SCHEMAS, &[&database_id]).await?;
        Ok(rows.iter().map(schema_from_row).collect())
    }

    async fn set_column_count(&self, schema_id: Uuid, count: i32) -> Result<(), AppError> {
        let client = self.pool.get().await?;
        client
            .execute(UPDATE_SCHEMA_COLUMN_COUNT, &[&schema_id, &count])
            .await?;

        if let Some(schema) = self.get_schema(schema_id).await? {
            self.announce(FeedEventType::Update, SCHEMAS_TABLE, schema.database_id, &schema)
                .await;
        }
        Ok(())
    }

    async fn delete_schema(&self, schema_id: Uuid) -> Result<bool, AppError> {
        let Some(schema) = self.get_schema(schema_id).await? else {
            return Ok(false);
        };

        let client = self.pool.get().await?;
        let deleted = client.execute(DELETE_SCHEMA, &[&schema_id]).await? > 0;
        if deleted {
            self.announce(FeedEventType::Delete, SCHEMAS_TABLE, schema.database_id, &schema)
                .await;
        }
        Ok(deleted)
    }

    async fn insert_columns(&self, columns: &[LogicalColumn]) -> Result<(), AppError> {
        let Some(first) = columns.first() else {
            return Ok(());
        };
        let database_id = self
            .database_of(first.schema_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Schema {} not found", first.schema_id)))?;

        // All columns land or none do
        let mut client = self.pool.get().await?;
        let transaction = client.transaction().await?;
        let insert = transaction.prepare(INSERT_COLUMN).await?;
        for column in columns {
            let references = references_json(column)?;
            transaction
                .execute(
                    &insert,
                    &[
                        &column.id,
                        &column.schema_id,
                        &column.name,
                        &column.data_type,
                        &column.nullable,
                        &column.is_primary_key,
                        &column.is_unique,
                        &column.default_value,
                        &column.order,
                        &column.max_length,
                        &references,
                        &column.comment,
                    ],
                )
                .await?;
        }
        transaction.commit().await?;

        for column in columns {
            self.announce(FeedEventType::Insert, COLUMNS_TABLE, database_id, column)
                .await;
        }
        Ok(())
    }

    async fn get_column(&self, column_id: Uuid) -> Result<Option<LogicalColumn>, AppError> {
        let client = self.pool.get().await?;
        let row = client.query_opt(GET_COLUMN, &[&column_id]).await?;
        row.as_ref().map(column_from_row).transpose()
    }

    async fn list_columns(&self, schema_id: Uuid) -> Result<Vec<LogicalColumn>, AppError> {
        let client = self.pool.get().await?;
        let rows = client.query(LIST_COLUMNS, &[&schema_id]).await?;
        rows.iter().map(column_from_row).collect()
    }

    async fn list_database_columns(&self, database_id: Uuid) -> Result<Vec<LogicalColumn>, AppError> {
        let client = self.pool.get().await?;
        let rows = client.query(LIST_COLUMNS_FOR_DATABASE, &[&database_id]).await?;
        rows.iter().map(column_from_row).collect()
    }

    async fn update_column(&self, column: &LogicalColumn) -> Result<bool, AppError> {
        let references = references_json(column)?;
        let client = self.pool.get().await?;
        let updated = client
            .execute(
                UPDATE_COLUMN,
                &[
                    &column.id,
                    &column.name,
                    &column.data_type,
                    &column.nullable,
                    &column.is_primary_key,
                    &column.is_unique,
                    &column.default_value,
                    &column.max_length,
                    &references,
                    &column.comment,
                ],
            )
            .await?
            > 0;

        if updated {
            if let Some(database_id) = self.database_of(column.schema_id).await? {
                self.announce(FeedEventType::Update, COLUMNS_TABLE, database_id, column)
                    .await;
            }
        }
        Ok(updated)
    }

    async fn delete_column(&self, column_id: Uuid) -> Result<bool, AppError> {
        let Some(column) = self.get_column(column_id).await? else {
            return Ok(false);
        };
        let database_id = self.database_of(column.schema_id).await?;

        let client = self.pool.get().await?;
        let deleted = client.execute(DELETE_COLUMN, &[&column_id]).await? > 0;
        if let (true, Some(database_id)) = (deleted, database_id) {
            self.announce(FeedEventType::Delete, COLUMNS_TABLE, database_id, &column)
                .await;
        }
        Ok(deleted)
    }

    async fn fetch_table_rows(&self, table_name: &str) -> Result<Vec<serde_json::Value>, AppError> {
        let sql = format!(
            "SELECT to_jsonb(t) AS row FROM {} t",
            PostgresDialect::new().quote_ident(table_name)
        );
        let client = self.pool.get().await?;
        let rows = client.query(sql.as_str(), &[]).await?;
        Ok(rows.iter().map(|r| r.get::<_, serde_json::Value>("row")).collect())
    }
}
