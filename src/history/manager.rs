//! Change/History Manager
//!
//! Append-only audit log plus point-in-time snapshots of a database's
//! logical state. Restores are advisory: they back up current state, record
//! what a restore would change, and rewrite nothing.

use crate::error::AppError;
use crate::history::diff::{self, SnapshotDiff};
use crate::history::models::*;
use crate::history::store::HistoryStore;
use crate::schema::store::SchemaStore;
use chrono::{Duration, Utc};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const DEFAULT_RETENTION_DAYS: i64 = 30;

pub struct HistoryManager {
    store: Arc<dyn HistoryStore>,
    /// Read-only access to the logical metadata being captured
    schemas: Arc<dyn SchemaStore>,
    default_actor: String,
}

impl HistoryManager {
    pub fn new(store: Arc<dyn HistoryStore>, schemas: Arc<dyn SchemaStore>) -> Self {
        Self {
            store,
            schemas,
            default_actor: "system".to_string(),
        }
    }

    pub fn with_default_actor(mut self, actor: impl Into<String>) -> Self {
        self.default_actor = actor.into();
        self
    }

    fn actor(&self, created_by: Option<String>) -> String {
        created_by
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| self.default_actor.clone())
    }

    /// Append one change record, returns it as stored
    pub async fn record_change(
        &self,
        database_id: Uuid,
        change_type: ChangeType,
        changes: serde_json::Value,
        options: RecordOptions,
    ) -> Result<ChangeRecord, AppError> {
        let record = ChangeRecord {
            id: Uuid::new_v4(),
            database_id,
            change_type,
            table_name: options.table_name,
            record_id: options.record_id,
            changes,
            previous_values: options.previous_values,
            batch_id: options.batch_id.unwrap_or_else(Uuid::new_v4),
            created_by: self.actor(options.created_by),
            created_at: Utc::now(),
        };

        self.store.insert_change(&record).await?;
        debug!(
            "Recorded {} for database {} (table: {:?})",
            record.change_type, database_id, record.table_name
        );
        Ok(record)
    }

    /// Capture current schemas, columns and table rows
    async fn capture(&self, database_id: Uuid) -> Result<SnapshotData, AppError> {
        let schemas = self.schemas.list_schemas(database_id).await?;
        let mut columns = self.schemas.list_database_columns(database_id).await?;
        columns.sort_by(|a, b| a.schema_id.cmp(&b.schema_id).then(a.order.cmp(&b.order)));

        let mut tables = BTreeMap::new();
        for schema in &schemas {
            match self.schemas.fetch_table_rows(&schema.table_name).await {
                Ok(rows) => {
                    tables.insert(schema.table_name.clone(), rows);
                }
                Err(e) => warn!("Skipping rows of {} in snapshot: {}", schema.table_name, e),
            }
        }

        Ok(SnapshotData::new(schemas, columns, tables))
    }

    /// Serialize current state into a new snapshot, returns its id
    pub async fn create_snapshot(
        &self,
        database_id: Uuid,
        options: SnapshotOptions,
    ) -> Result<Uuid, AppError> {
        let snapshot_data = self.capture(database_id).await?;
        let size_bytes = serde_json::to_vec(&snapshot_data)?.len() as i64;

        let snapshot = Snapshot {
            id: Uuid::new_v4(),
            database_id,
            snapshot_data,
            snapshot_type: options.snapshot_type,
            description: options.description,
            created_by: self.actor(options.created_by),
            created_at: Utc::now(),
            size_bytes,
        };
        self.store.insert_snapshot(&snapshot).await?;

        info!(
            "Created {} snapshot {} for database {}: {} tables, {} rows, {} bytes",
            snapshot.snapshot_type.as_str(),
            snapshot.id,
            database_id,
            snapshot.snapshot_data.schemas.len(),
            snapshot.snapshot_data.row_count(),
            size_bytes
        );
        Ok(snapshot.id)
    }

    pub async fn get_snapshot(&self, snapshot_id: Uuid) -> Result<Snapshot, AppError> {
        self.store
            .get_snapshot(snapshot_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Snapshot {} not found", snapshot_id)))
    }

    pub async fn get_snapshots(
        &self,
        database_id: Uuid,
        query: &SnapshotQuery,
    ) -> Result<Vec<Snapshot>, AppError> {
        self.store.list_snapshots(database_id, query).await
    }

    pub async fn get_change_history(
        &self,
        database_id: Uuid,
        query: &HistoryQuery,
    ) -> Result<Vec<ChangeRecord>, AppError> {
        self.store.list_changes(database_id, query).await
    }

    /// What would change to bring current state back to the snapshot
    pub async fn diff_snapshot(&self, snapshot_id: Uuid) -> Result<SnapshotDiff, AppError> {
        let snapshot = self.get_snapshot(snapshot_id).await?;
        let current = self.capture(snapshot.database_id).await?;
        Ok(diff::diff(&current, &snapshot.snapshot_data))
    }

    /// Advisory restore.
    ///
    /// Always takes an auto backup of current state first, then records a
    /// `schema_update` change carrying the restore plan. No schema, column
    /// or table rows are rewritten.
    pub async fn restore_from_snapshot(
        &self,
        snapshot_id: Uuid,
        created_by: Option<String>,
    ) -> Result<RestoreReport, AppError> {
        let snapshot = self.get_snapshot(snapshot_id).await?;
        let database_id = snapshot.database_id;
        let actor = self.actor(created_by);

        let backup_snapshot_id = self
            .create_snapshot(
                database_id,
                SnapshotOptions {
                    snapshot_type: SnapshotType::Auto,
                    description: Some(format!("Backup before restore of snapshot {}", snapshot_id)),
                    created_by: Some(actor.clone()),
                },
            )
            .await?;

        let backup = self.get_snapshot(backup_snapshot_id).await?;
        let plan = diff::diff(&backup.snapshot_data, &snapshot.snapshot_data);

        let record = self
            .record_change(
                database_id,
                ChangeType::SchemaUpdate,
                json!({
                    "action": "restore",
                    "snapshotId": snapshot_id,
                    "backupSnapshotId": backup_snapshot_id,
                    "applied": false,
                    "plan": &plan,
                }),
                RecordOptions {
                    created_by: Some(actor),
                    ..Default::default()
                },
            )
            .await?;

        warn!(
            "Restore of snapshot {} recorded as advisory ({} pending differences); nothing was applied",
            snapshot_id,
            plan.items.len()
        );

        Ok(RestoreReport {
            snapshot_id,
            backup_snapshot_id,
            change_record_id: record.id,
            plan,
            applied: false,
        })
    }

    /// Delete auto snapshots older than `retention_days`, returns how many
    pub async fn cleanup_old_snapshots(
        &self,
        database_id: Uuid,
        retention_days: i64,
    ) -> Result<u64, AppError> {
        if retention_days < 0 {
            return Err(AppError::Validation(
                "retention days must not be negative".to_string(),
            ));
        }
        let cutoff = Duration::try_days(retention_days)
            .and_then(|age| Utc::now().checked_sub_signed(age))
            .ok_or_else(|| {
                AppError::Validation(format!(
                    "retention of {} days is out of range",
                    retention_days
                ))
            })?;
        let deleted = self
            .store
            .delete_snapshots_before(database_id, SnapshotType::Auto, cutoff)
            .await?;

        info!(
            "Removed {} auto snapshots older than {} days for database {}",
            deleted, retention_days, database_id
        );
        Ok(deleted)
    }
}
