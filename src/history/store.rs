//! Change-log and snapshot persistence
//!
//! Append-only inserts into `database_changes`, plus snapshot rows in
//! `database_snapshots`. Both tables are announced on the [`ChangeFeed`].

use crate::db::queries::*;
use crate::error::AppError;
use crate::history::models::{
    page, ChangeRecord, ChangeType, HistoryQuery, Snapshot, SnapshotData, SnapshotQuery,
    SnapshotType,
};
use crate::schema::feed::{ChangeFeed, FeedEvent, FeedEventType};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_postgres::Pool;
use std::sync::Arc;
use tokio_postgres::Row;
use uuid::Uuid;

pub const CHANGES_TABLE: &str = "database_changes";
pub const SNAPSHOTS_TABLE: &str = "database_snapshots";

/// Store for the audit log and snapshots
#[async_trait]
pub trait HistoryStore: Send + Sync {
    async fn insert_change(&self, record: &ChangeRecord) -> Result<(), AppError>;
    /// Newest first
    async fn list_changes(
        &self,
        database_id: Uuid,
        query: &HistoryQuery,
    ) -> Result<Vec<ChangeRecord>, AppError>;

    async fn insert_snapshot(&self, snapshot: &Snapshot) -> Result<(), AppError>;
    /// Newest first
    async fn list_snapshots(
        &self,
        database_id: Uuid,
        query: &SnapshotQuery,
    ) -> Result<Vec<Snapshot>, AppError>;
    async fn get_snapshot(&self, snapshot_id: Uuid) -> Result<Option<Snapshot>, AppError>;
    /// Delete snapshots of one type created strictly before `cutoff`
    async fn delete_snapshots_before(
        &self,
        database_id: Uuid,
        snapshot_type: SnapshotType,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, AppError>;
}

/// PostgreSQL-backed history store
pub struct PgHistoryStore {
    pool: Pool,
    feed: Arc<ChangeFeed>,
}

impl PgHistoryStore {
    pub fn new(pool: Pool, feed: Arc<ChangeFeed>) -> Self {
        Self { pool, feed }
    }
}

fn change_from_row(row: &Row) -> Result<ChangeRecord, AppError> {
    let change_type: String = row.get("change_type");
    let change_type = change_type
        .parse::<ChangeType>()
        .map_err(AppError::Serialization)?;

    Ok(ChangeRecord {
        id: row.get("id"),
        database_id: row.get("database_id"),
        change_type,
        table_name: row.get("table_name"),
        record_id: row.get("record_id"),
        changes: row.get("changes"),
        previous_values: row.get("previous_values"),
        batch_id: row.get("batch_id"),
        created_by: row.get("created_by"),
        created_at: row.get("created_at"),
    })
}

fn snapshot_from_row(row: &Row) -> Result<Snapshot, AppError> {
    let snapshot_type: String = row.get("snapshot_type");
    let data: serde_json::Value = row.get("snapshot_data");
    let snapshot_data: SnapshotData = serde_json::from_value(data)
        .map_err(|e| AppError::Serialization(format!("Invalid snapshot document: {}", e)))?;

    Ok(Snapshot {
        id: row.get("id"),
        database_id: row.get("database_id"),
        snapshot_data,
        snapshot_type: snapshot_type.parse().map_err(AppError::Serialization)?,
        description: row.get("description"),
        created_by: row.get("created_by"),
        created_at: row.get("created_at"),
        size_bytes: row.get("size_bytes"),
    })
}

#[async_trait]
impl HistoryStore for PgHistoryStore {
    async fn insert_change(&self, record: &ChangeRecord) -> Result<(), AppError> {
        let client = self.pool.get().await?;
        client
            .execute(
                INSERT_CHANGE,
                &[
                    &record.id,
                    &record.database_id,
                    &record.change_type.as_str(),
                    &record.table_name,
                    &record.record_id,
                    &record.changes,
                    &record.previous_values,
                    &record.batch_id,
                    &record.created_by,
                    &record.created_at,
                ],
            )
            .await?;

        self.feed
            .publish(FeedEvent {
                event_type: FeedEventType::Insert,
                table: CHANGES_TABLE.to_string(),
                database_id: record.database_id,
                row: serde_json::to_value(record).unwrap_or_default(),
            })
            .await;
        Ok(())
    }

    async fn list_changes(
        &self,
        database_id: Uuid,
        query: &HistoryQuery,
    ) -> Result<Vec<ChangeRecord>, AppError> {
        let (limit, offset) = page(query.limit, query.offset);
        let change_type = query.change_type.map(|t| t.as_str());

        let client = self.pool.get().await?;
        let rows = client
            .query(
                LIST_CHANGES,
                &[&database_id, &change_type, &query.table_name, &limit, &offset],
            )
            .await?;
        rows.iter().map(change_from_row).collect()
    }

    async fn insert_snapshot(&self, snapshot: &Snapshot) -> Result<(), AppError> {
        let data = serde_json::to_value(&snapshot.snapshot_data)?;
        let client = self.pool.get().await?;
        client
            .execute(
                INSERT_SNAPSHOT,
                &[
                    &snapshot.id,
                    &snapshot.database_id,
                    &data,
                    &snapshot.snapshot_type.as_str(),
                    &snapshot.description,
                    &snapshot.created_by,
                    &snapshot.created_at,
                    &snapshot.size_bytes,
                ],
            )
            .await?;

        // Announce the row without the document itself
        self.feed
            .publish(FeedEvent {
                event_type: FeedEventType::Insert,
                table: SNAPSHOTS_TABLE.to_string(),
                database_id: snapshot.database_id,
                row: serde_json::json!({
                    "id": snapshot.id,
                    "snapshotType": snapshot.snapshot_type,
                    "sizeBytes": snapshot.size_bytes,
                }),
            })
            .await;
        Ok(())
    }

    async fn list_snapshots(
        &self,
        database_id: Uuid,
        query: &SnapshotQuery,
    ) -> Result<Vec<Snapshot>, AppError> {
        let (limit, offset) = page(query.limit, query.offset);
        let snapshot_type = query.snapshot_type.map(|t| t.as_str());

        let client = self.pool.get().await?;
        let rows = client
            .query(LIST_SNAPSHOTS, &[&database_id, &snapshot_type, &limit, &offset])
            .await?;
        rows.iter().map(snapshot_from_row).collect()
    }

    async fn get_snapshot(&self, snapshot_id: Uuid) -> Result<Option<Snapshot>, AppError> {
        let client = self.pool.get().await?;
        let row = client.query_opt(GET_SNAPSHOT, &[&snapshot_id]).await?;
        row.as_ref().map(snapshot_from_row).transpose()
    }

    async fn delete_snapshots_before(
        &self,
        database_id: Uuid,
        snapshot_type: SnapshotType,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, AppError> {
        let client = self.pool.get().await?;
        let deleted = client
            .execute(
                DELETE_SNAPSHOTS_BEFORE,
                &[&database_id, &snapshot_type.as_str(), &cutoff],
            )
            .await?;
        Ok(deleted)
    }
}
