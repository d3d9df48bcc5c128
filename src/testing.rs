//! In-memory test doubles for the store and execution seams

use crate::db::{ExecResponse, SqlExecutor};
use crate::error::AppError;
use crate::history::models::{
    page, ChangeRecord, HistoryQuery, Snapshot, SnapshotQuery, SnapshotType,
};
use crate::history::store::{HistoryStore, CHANGES_TABLE, SNAPSHOTS_TABLE};
use crate::schema::feed::{ChangeFeed, FeedEvent, FeedEventType};
use crate::schema::models::{LogicalColumn, LogicalSchema};
use crate::schema::store::{SchemaStore, COLUMNS_TABLE, SCHEMAS_TABLE};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::RwLock;
use uuid::Uuid;

/// Records every batch; can be told to reject the next one
#[derive(Default)]
pub struct RecordingExecutor {
    batches: Mutex<Vec<String>>,
    fail_next: Mutex<Option<String>>,
    /// (pattern, error): reject the first batch containing `pattern`
    fail_matching: Mutex<Option<(String, String)>>,
}

impl RecordingExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Successfully executed batches, in order
    pub fn batches(&self) -> Vec<String> {
        self.batches.lock().unwrap().clone()
    }

    pub fn fail_next(&self, error: &str) {
        *self.fail_next.lock().unwrap() = Some(error.to_string());
    }

    pub fn fail_when_contains(&self, pattern: &str, error: &str) {
        *self.fail_matching.lock().unwrap() = Some((pattern.to_string(), error.to_string()));
    }
}

#[async_trait]
impl SqlExecutor for RecordingExecutor {
    async fn execute_batch(&self, sql: &str) -> ExecResponse {
        if let Some(error) = self.fail_next.lock().unwrap().take() {
            return ExecResponse::failed(error);
        }
        {
            let mut matching = self.fail_matching.lock().unwrap();
            if matching.as_ref().is_some_and(|(pattern, _)| sql.contains(pattern.as_str())) {
                if let Some((_, error)) = matching.take() {
                    return ExecResponse::failed(error);
                }
            }
        }
        self.batches.lock().unwrap().push(sql.to_string());
        ExecResponse::ok(None)
    }
}

async fn announce<T: serde::Serialize>(
    feed: &ChangeFeed,
    event_type: FeedEventType,
    table: &str,
    database_id: Uuid,
    row: &T,
) {
    feed.publish(FeedEvent {
        event_type,
        table: table.to_string(),
        database_id,
        row: serde_json::to_value(row).unwrap(),
    })
    .await;
}

/// Schema store backed by hash maps
pub struct MemorySchemaStore {
    feed: Arc<ChangeFeed>,
    schemas: RwLock<HashMap<Uuid, LogicalSchema>>,
    columns: RwLock<HashMap<Uuid, LogicalColumn>>,
    rows: RwLock<HashMap<String, Vec<serde_json::Value>>>,
    fail_column_inserts: AtomicBool,
}

impl MemorySchemaStore {
    pub fn new(feed: Arc<ChangeFeed>) -> Self {
        Self {
            feed,
            schemas: RwLock::new(HashMap::new()),
            columns: RwLock::new(HashMap::new()),
            rows: RwLock::new(HashMap::new()),
            fail_column_inserts: AtomicBool::new(false),
        }
    }

    pub fn fail_column_inserts(&self, fail: bool) {
        self.fail_column_inserts.store(fail, Ordering::SeqCst);
    }

    pub async fn put_rows(&self, table: &str, rows: Vec<serde_json::Value>) {
        self.rows.write().await.insert(table.to_string(), rows);
    }

    pub async fn schema_rows_named(&self, table_name: &str) -> usize {
        self.schemas
            .read()
            .await
            .values()
            .filter(|s| s.table_name == table_name)
            .count()
    }

    async fn database_of(&self, schema_id: Uuid) -> Option<Uuid> {
        self.schemas.read().await.get(&schema_id).map(|s| s.database_id)
    }
}

#[async_trait]
impl SchemaStore for MemorySchemaStore {
    async fn insert_schema(&self, schema: &LogicalSchema) -> Result<(), AppError> {
        self.schemas.write().await.insert(schema.id, schema.clone());
        announce(&self.feed, FeedEventType::Insert, SCHEMAS_TABLE, schema.database_id, schema).await;
        Ok(())
    }

    async fn get_schema(&self, schema_id: Uuid) -> Result<Option<LogicalSchema>, AppError> {
        Ok(self.schemas.read().await.get(&schema_id).cloned())
    }

    async fn list_schemas(&self, database_id: Uuid) -> Result<Vec<LogicalSchema>, AppError> {
        let mut schemas: Vec<LogicalSchema> = self
            .schemas
            .read()
            .await
            .values()
            .filter(|s| s.database_id == database_id)
            .cloned()
            .collect();
        schemas.sort_by_key(|s| s.created_at);
        Ok(schemas)
    }

    async fn set_column_count(&self, schema_id: Uuid, count: i32) -> Result<(), AppError> {
        let updated = {
            let mut schemas = self.schemas.write().await;
            schemas.get_mut(&schema_id).map(|s| {
                s.column_count = count;
                s.updated_at = Utc::now();
                s.clone()
            })
        };
        if let Some(schema) = updated {
            announce(&self.feed, FeedEventType::Update, SCHEMAS_TABLE, schema.database_id, &schema)
                .await;
        }
        Ok(())
    }

    async fn delete_schema(&self, schema_id: Uuid) -> Result<bool, AppError> {
        let Some(schema) = self.schemas.write().await.remove(&schema_id) else {
            return Ok(false);
        };
        self.columns.write().await.retain(|_, c| c.schema_id != schema_id);
        announce(&self.feed, FeedEventType::Delete, SCHEMAS_TABLE, schema.database_id, &schema).await;
        Ok(true)
    }

    async fn insert_columns(&self, columns: &[LogicalColumn]) -> Result<(), AppError> {
        if self.fail_column_inserts.load(Ordering::SeqCst) {
            return Err(AppError::Internal("column insert rejected".to_string()));
        }
        let Some(first) = columns.first() else {
            return Ok(());
        };
        let database_id = self
            .database_of(first.schema_id)
            .await
            .ok_or_else(|| AppError::NotFound(format!("Schema {} not found", first.schema_id)))?;

        {
            let mut stored = self.columns.write().await;
            for column in columns {
                stored.insert(column.id, column.clone());
            }
        }
        for column in columns {
            announce(&self.feed, FeedEventType::Insert, COLUMNS_TABLE, database_id, column).await;
        }
        Ok(())
    }

    async fn get_column(&self, column_id: Uuid) -> Result<Option<LogicalColumn>, AppError> {
        Ok(self.columns.read().await.get(&column_id).cloned())
    }

    async fn list_columns(&self, schema_id: Uuid) -> Result<Vec<LogicalColumn>, AppError> {
        let mut columns: Vec<LogicalColumn> = self
            .columns
            .read()
            .await
            .values()
            .filter(|c| c.schema_id == schema_id)
            .cloned()
            .collect();
        columns.sort_by_key(|c| c.order);
        Ok(columns)
    }

    async fn list_database_columns(&self, database_id: Uuid) -> Result<Vec<LogicalColumn>, AppError> {
        let schema_ids: Vec<Uuid> = self
            .schemas
            .read()
            .await
            .values()
            .filter(|s| s.database_id == database_id)
            .map(|s| s.id)
            .collect();
        Ok(self
            .columns
            .read()
            .await
            .values()
            .filter(|c| schema_ids.contains(&c.schema_id))
            .cloned()
            .collect())
    }

    async fn update_column(&self, column: &LogicalColumn) -> Result<bool, AppError> {
        let replaced = {
            let mut columns = self.columns.write().await;
            match columns.get_mut(&column.id) {
                Some(existing) => {
                    *existing = column.clone();
                    true
                }
                None => false,
            }
        };
        if replaced {
            if let Some(database_id) = self.database_of(column.schema_id).await {
                announce(&self.feed, FeedEventType::Update, COLUMNS_TABLE, database_id, column).await;
            }
        }
        Ok(replaced)
    }

    async fn delete_column(&self, column_id: Uuid) -> Result<bool, AppError> {
        let Some(column) = self.columns.write().await.remove(&column_id) else {
            return Ok(false);
        };
        if let Some(database_id) = self.database_of(column.schema_id).await {
            announce(&self.feed, FeedEventType::Delete, COLUMNS_TABLE, database_id, &column).await;
        }
        Ok(true)
    }

    async fn fetch_table_rows(&self, table_name: &str) -> Result<Vec<serde_json::Value>, AppError> {
        self.rows
            .read()
            .await
            .get(table_name)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("Table {} has no rows", table_name)))
    }
}

/// History store backed by vectors
pub struct MemoryHistoryStore {
    feed: Arc<ChangeFeed>,
    changes: RwLock<Vec<ChangeRecord>>,
    snapshots: RwLock<Vec<Snapshot>>,
    fail_inserts: AtomicBool,
}

impl MemoryHistoryStore {
    pub fn new(feed: Arc<ChangeFeed>) -> Self {
        Self {
            feed,
            changes: RwLock::new(Vec::new()),
            snapshots: RwLock::new(Vec::new()),
            fail_inserts: AtomicBool::new(false),
        }
    }

    pub fn fail_inserts(&self, fail: bool) {
        self.fail_inserts.store(fail, Ordering::SeqCst);
    }

    pub async fn changes(&self) -> Vec<ChangeRecord> {
        self.changes.read().await.clone()
    }

    pub async fn snapshots(&self) -> Vec<Snapshot> {
        self.snapshots.read().await.clone()
    }

    fn check(&self) -> Result<(), AppError> {
        if self.fail_inserts.load(Ordering::SeqCst) {
            return Err(AppError::Internal("history insert rejected".to_string()));
        }
        Ok(())
    }
}

fn paginate<T>(mut items: Vec<T>, limit: Option<i64>, offset: Option<i64>) -> Vec<T> {
    let (limit, offset) = page(limit, offset);
    items
        .drain(..)
        .skip(offset as usize)
        .take(limit as usize)
        .collect()
}

#[async_trait]
impl HistoryStore for MemoryHistoryStore {
    async fn insert_change(&self, record: &ChangeRecord) -> Result<(), AppError> {
        self.check()?;
        self.changes.write().await.push(record.clone());
        announce(&self.feed, FeedEventType::Insert, CHANGES_TABLE, record.database_id, record).await;
        Ok(())
    }

    async fn list_changes(
        &self,
        database_id: Uuid,
        query: &HistoryQuery,
    ) -> Result<Vec<ChangeRecord>, AppError> {
        let mut changes: Vec<ChangeRecord> = self
            .changes
            .read()
            .await
            .iter()
            .filter(|c| c.database_id == database_id)
            .filter(|c| query.change_type.map_or(true, |t| c.change_type == t))
            .filter(|c| {
                query
                    .table_name
                    .as_ref()
                    .map_or(true, |t| c.table_name.as_ref() == Some(t))
            })
            .cloned()
            .collect();
        changes.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(paginate(changes, query.limit, query.offset))
    }

    async fn insert_snapshot(&self, snapshot: &Snapshot) -> Result<(), AppError> {
        self.check()?;
        self.snapshots.write().await.push(snapshot.clone());
        announce(
            &self.feed,
            FeedEventType::Insert,
            SNAPSHOTS_TABLE,
            snapshot.database_id,
            &snapshot.id,
        )
        .await;
        Ok(())
    }

    async fn list_snapshots(
        &self,
        database_id: Uuid,
        query: &SnapshotQuery,
    ) -> Result<Vec<Snapshot>, AppError> {
        let mut snapshots: Vec<Snapshot> = self
            .snapshots
            .read()
            .await
            .iter()
            .filter(|s| s.database_id == database_id)
            .filter(|s| query.snapshot_type.map_or(true, |t| s.snapshot_type == t))
            .cloned()
            .collect();
        snapshots.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(paginate(snapshots, query.limit, query.offset))
    }

    async fn get_snapshot(&self, snapshot_id: Uuid) -> Result<Option<Snapshot>, AppError> {
        Ok(self
            .snapshots
            .read()
            .await
            .iter()
            .find(|s| s.id == snapshot_id)
            .cloned())
    }

    async fn delete_snapshots_before(
        &self,
        database_id: Uuid,
        snapshot_type: SnapshotType,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, AppError> {
        let mut snapshots = self.snapshots.write().await;
        let before = snapshots.len();
        snapshots.retain(|s| {
            !(s.database_id == database_id && s.snapshot_type == snapshot_type && s.created_at < cutoff)
        });
        Ok((before - snapshots.len()) as u64)
    }
}
