//! Schema Registry
//!
//! Owns the logical metadata for dynamic tables. Every structural change
//! runs the physical DDL first and writes logical rows only after it
//! succeeded. A failed logical write triggers a compensating physical undo.
//!
//! The registry caches the state of one active database. It is refreshed
//! after local mutations and, once [`SchemaRegistry::start_sync`] is called,
//! on every change-feed notification for the metadata tables.

use crate::ddl::{sanitize_identifier, CreateTableOptions, DdlOutcome, TableCreator};
use crate::error::AppError;
use crate::history::{ChangeType, HistoryManager, RecordOptions};
use crate::models::ColumnSpec;
use crate::schema::feed::{ChangeFeed, Subscription};
use crate::schema::models::{ColumnUpdate, LogicalColumn, LogicalSchema, TableDefinition};
use crate::schema::saga::{Compensation, CompensationLog, PendingCompensation};
use crate::schema::source::{SchemaSource, SchemaState};
use crate::schema::store::{SchemaStore, COLUMNS_TABLE, SCHEMAS_TABLE};
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

type StateCache = Arc<RwLock<Option<SchemaState>>>;

struct SyncWorker {
    subscription_id: Uuid,
    task: JoinHandle<()>,
}

/// Feed-driven resync bookkeeping shared with [`SyncHandle`]
struct SyncSlot {
    feed: Arc<ChangeFeed>,
    enabled: AtomicBool,
    worker: Mutex<Option<SyncWorker>>,
}

impl SyncSlot {
    /// Abort the running worker, returns its subscription id
    fn halt(&self) -> Option<Uuid> {
        let worker = match self.worker.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        }?;
        worker.task.abort();
        Some(worker.subscription_id)
    }

    fn install(&self, worker: SyncWorker) -> Option<Uuid> {
        let previous = match self.worker.lock() {
            Ok(mut guard) => guard.replace(worker),
            Err(poisoned) => poisoned.into_inner().replace(worker),
        }?;
        previous.task.abort();
        Some(previous.subscription_id)
    }
}

/// Keeps feed-driven resync running until stopped or dropped
pub struct SyncHandle {
    slot: Arc<SyncSlot>,
}

impl SyncHandle {
    pub async fn stop(self) {
        self.slot.enabled.store(false, Ordering::SeqCst);
        if let Some(id) = self.slot.halt() {
            self.slot.feed.unsubscribe(id).await;
        }
        info!("Schema sync stopped");
    }
}

impl Drop for SyncHandle {
    fn drop(&mut self) {
        self.slot.enabled.store(false, Ordering::SeqCst);
        if let Some(id) = self.slot.halt() {
            let feed = self.slot.feed.clone();
            if let Ok(runtime) = tokio::runtime::Handle::try_current() {
                runtime.spawn(async move {
                    feed.unsubscribe(id).await;
                });
            }
        }
    }
}

/// Replace the cached state unless the active database changed meanwhile
async fn install_state(cache: &RwLock<Option<SchemaState>>, state: SchemaState) -> bool {
    let mut guard = cache.write().await;
    match guard.as_ref() {
        Some(current) if current.database_id == state.database_id => {
            *guard = Some(state);
            true
        }
        _ => false,
    }
}

async fn run_sync(
    mut subscription: Subscription,
    source: Arc<dyn SchemaSource>,
    cache: StateCache,
    database_id: Uuid,
) {
    while let Some(event) = subscription.recv().await {
        // Any queued events are covered by the same reload
        let coalesced = subscription.drain();
        debug!(
            "Feed {:?} on {} (+{} queued), reloading database {}",
            event.event_type, event.table, coalesced, database_id
        );
        match source.refresh(database_id).await {
            Ok(state) => {
                install_state(&cache, state).await;
            }
            Err(e) => warn!("Schema resync for database {} failed: {}", database_id, e),
        }
    }
    debug!("Sync worker for database {} finished", database_id);
}

pub struct SchemaRegistry {
    creator: Arc<TableCreator>,
    store: Arc<dyn SchemaStore>,
    source: Arc<dyn SchemaSource>,
    history: Arc<HistoryManager>,
    options: CreateTableOptions,
    compensations: CompensationLog,
    cache: StateCache,
    sync: Arc<SyncSlot>,
}

impl SchemaRegistry {
    pub fn new(
        creator: Arc<TableCreator>,
        store: Arc<dyn SchemaStore>,
        source: Arc<dyn SchemaSource>,
        history: Arc<HistoryManager>,
        feed: Arc<ChangeFeed>,
    ) -> Self {
        Self {
            creator,
            store,
            source,
            history,
            options: CreateTableOptions::default(),
            compensations: CompensationLog::new(),
            cache: Arc::new(RwLock::new(None)),
            sync: Arc::new(SyncSlot {
                feed,
                enabled: AtomicBool::new(false),
                worker: Mutex::new(None),
            }),
        }
    }

    pub fn with_options(mut self, options: CreateTableOptions) -> Self {
        self.options = options;
        self
    }

    // ==================== Sync ====================

    pub async fn active_database(&self) -> Option<Uuid> {
        self.cache.read().await.as_ref().map(|s| s.database_id)
    }

    /// Switch the cached database, moving the feed subscription along
    pub async fn set_active_database(&self, database_id: Uuid) -> Result<SchemaState, AppError> {
        *self.cache.write().await = Some(SchemaState::empty(database_id));
        info!("Active database set to {}", database_id);

        if self.sync.enabled.load(Ordering::SeqCst) {
            self.spawn_worker(database_id).await;
        }
        self.refresh().await
    }

    /// Reload the active database from the source
    pub async fn refresh(&self) -> Result<SchemaState, AppError> {
        let database_id = self
            .active_database()
            .await
            .ok_or_else(|| AppError::BadRequest("No active database selected".to_string()))?;

        let state = self.source.refresh(database_id).await?;
        install_state(&self.cache, state.clone()).await;
        Ok(state)
    }

    /// Resync on every feed notification for the active database
    pub async fn start_sync(&self) -> Result<SyncHandle, AppError> {
        let database_id = self
            .active_database()
            .await
            .ok_or_else(|| AppError::BadRequest("No active database selected".to_string()))?;

        self.sync.enabled.store(true, Ordering::SeqCst);
        self.spawn_worker(database_id).await;
        info!("Schema sync started for database {}", database_id);

        Ok(SyncHandle {
            slot: self.sync.clone(),
        })
    }

    async fn spawn_worker(&self, database_id: Uuid) {
        let subscription = self
            .sync
            .feed
            .subscribe(database_id, &[SCHEMAS_TABLE, COLUMNS_TABLE])
            .await;
        let subscription_id = subscription.id;
        let task = tokio::spawn(run_sync(
            subscription,
            self.source.clone(),
            self.cache.clone(),
            database_id,
        ));

        if let Some(previous) = self.sync.install(SyncWorker {
            subscription_id,
            task,
        }) {
            self.sync.feed.unsubscribe(previous).await;
        }
    }

    /// Refresh after a local mutation when it touched the active database
    async fn resync(&self, database_id: Uuid) {
        if self.active_database().await != Some(database_id) {
            return;
        }
        if let Err(e) = self.refresh().await {
            warn!("Resync of database {} failed: {}", database_id, e);
        }
    }

    // ==================== Reads ====================

    pub async fn list_schemas(&self, database_id: Uuid) -> Result<Vec<LogicalSchema>, AppError> {
        if let Some(state) = self.cache.read().await.as_ref() {
            if state.database_id == database_id {
                return Ok(state.schemas.clone());
            }
        }
        self.store.list_schemas(database_id).await
    }

    pub async fn get_schema(&self, schema_id: Uuid) -> Result<TableDefinition, AppError> {
        if let Some(state) = self.cache.read().await.as_ref() {
            if let Some(schema) = state.schema(schema_id) {
                return Ok(TableDefinition {
                    schema: schema.clone(),
                    columns: state.columns_of(schema_id).to_vec(),
                });
            }
        }

        let schema = self.require_schema(schema_id).await?;
        let columns = self.store.list_columns(schema_id).await?;
        Ok(TableDefinition { schema, columns })
    }

    /// Columns ordered by position, read from the store
    pub async fn list_columns(&self, schema_id: Uuid) -> Result<Vec<LogicalColumn>, AppError> {
        self.require_schema(schema_id).await?;
        self.store.list_columns(schema_id).await
    }

    async fn require_schema(&self, schema_id: Uuid) -> Result<LogicalSchema, AppError> {
        self.store
            .get_schema(schema_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Schema {} not found", schema_id)))
    }

    async fn require_column(&self, column_id: Uuid) -> Result<LogicalColumn, AppError> {
        self.store
            .get_column(column_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Column {} not found", column_id)))
    }

    // ==================== Tables ====================

    /// Create a physical table and its logical records
    pub async fn create_table(
        &self,
        database_id: Uuid,
        name: &str,
        columns: &[ColumnSpec],
    ) -> Result<TableDefinition, AppError> {
        let requested = sanitize_identifier(name);
        let registered = self.store.list_schemas(database_id).await?;
        if registered.iter().any(|s| s.table_name == requested) {
            return Err(AppError::Conflict(format!(
                "Table {} is already registered in database {}",
                requested, database_id
            )));
        }

        // Plain CREATE TABLE: the compensating drop must only ever remove a
        // table this call created
        let options = CreateTableOptions {
            if_not_exists: false,
            ..self.options
        };
        let outcome = self.creator.create_table(name, columns, options).await;
        let table_name = physical_name(&outcome)?;

        let display_name = match name.trim() {
            "" => table_name.clone(),
            trimmed => trimmed.to_string(),
        };
        let schema = LogicalSchema::new(
            database_id,
            table_name.clone(),
            display_name,
            outcome.columns.len(),
        );
        let logical: Vec<LogicalColumn> = outcome
            .columns
            .iter()
            .enumerate()
            .map(|(i, c)| LogicalColumn::from_spec(schema.id, c, i as i32))
            .collect();

        let undo = Compensation::DropTable {
            table: table_name.clone(),
        };
        if let Err(e) = self.store.insert_schema(&schema).await {
            self.compensate(undo, &e).await;
            return Err(e);
        }
        if let Err(e) = self.store.insert_columns(&logical).await {
            if let Err(cleanup) = self.store.delete_schema(schema.id).await {
                error!("Could not remove schema row {}: {}", schema.id, cleanup);
            }
            self.compensate(undo, &e).await;
            return Err(e);
        }
        info!(
            "Registered table {} ({} columns) in database {}",
            table_name,
            logical.len(),
            database_id
        );

        self.record(
            database_id,
            ChangeType::TableCreate,
            json!({
                "schemaId": schema.id,
                "displayName": &schema.display_name,
                "columns": &outcome.columns,
                "sql": &outcome.sql,
            }),
            RecordOptions::for_table(&table_name),
        )
        .await;
        self.resync(database_id).await;

        Ok(TableDefinition {
            schema,
            columns: logical,
        })
    }

    /// Drop the physical table, then its logical records.
    ///
    /// The table name is taken from the stored schema. An unknown id is
    /// rejected before any DDL runs.
    pub async fn delete_table(&self, schema_id: Uuid) -> Result<(), AppError> {
        let schema = self.require_schema(schema_id).await?;
        let columns = self.store.list_columns(schema_id).await?;

        let outcome = self.creator.drop_table(&schema.table_name).await;
        physical_name(&outcome)?;

        self.store.delete_schema(schema_id).await?;
        info!("Deleted table {} from database {}", schema.table_name, schema.database_id);

        self.record(
            schema.database_id,
            ChangeType::TableDrop,
            json!({ "schemaId": schema_id, "sql": &outcome.sql }),
            RecordOptions::for_table(&schema.table_name)
                .previous(json!({ "schema": &schema, "columns": &columns })),
        )
        .await;
        self.resync(schema.database_id).await;
        Ok(())
    }

    // ==================== Columns ====================

    /// Add a column at position `max(order) + 1`
    pub async fn add_column(
        &self,
        schema_id: Uuid,
        column: &ColumnSpec,
    ) -> Result<LogicalColumn, AppError> {
        let schema = self.require_schema(schema_id).await?;
        let existing = self.store.list_columns(schema_id).await?;

        let name = sanitize_identifier(&column.name);
        if existing.iter().any(|c| c.name == name) {
            return Err(AppError::Conflict(format!(
                "Column {} already exists on {}",
                name, schema.table_name
            )));
        }

        let outcome = self.creator.add_column(&schema.table_name, column).await;
        physical_name(&outcome)?;
        let effective = outcome.columns.first().cloned().unwrap_or_else(|| {
            let mut spec = column.clone();
            spec.name = name.clone();
            spec
        });

        let order = existing.iter().map(|c| c.order).max().map_or(0, |max| max + 1);
        let logical = LogicalColumn::from_spec(schema_id, &effective, order);

        if let Err(e) = self.store.insert_columns(std::slice::from_ref(&logical)).await {
            let undo = Compensation::DropColumn {
                table: schema.table_name.clone(),
                column: logical.name.clone(),
            };
            self.compensate(undo, &e).await;
            return Err(e);
        }
        self.update_column_count(schema_id, existing.len() + 1).await;

        self.record(
            schema.database_id,
            ChangeType::ColumnAdd,
            json!({ "column": &logical, "sql": &outcome.sql }),
            RecordOptions::for_table(&schema.table_name),
        )
        .await;
        self.resync(schema.database_id).await;
        Ok(logical)
    }

    /// Update logical column metadata only; the physical column is untouched
    pub async fn update_column(
        &self,
        column_id: Uuid,
        update: &ColumnUpdate,
    ) -> Result<LogicalColumn, AppError> {
        let column = self.require_column(column_id).await?;
        if update.is_empty() {
            return Ok(column);
        }
        let schema = self.require_schema(column.schema_id).await?;
        let updated = update.apply(&column);

        let renamed = updated.name != column.name;
        let promoted = updated.is_primary_key && !column.is_primary_key;
        if renamed || promoted {
            let siblings = self.store.list_columns(column.schema_id).await?;
            for other in siblings.iter().filter(|c| c.id != column.id) {
                if renamed && other.name == updated.name {
                    return Err(AppError::Conflict(format!(
                        "Column {} already exists on {}",
                        updated.name, schema.table_name
                    )));
                }
                // At most one primary key column per table
                if promoted && other.is_primary_key {
                    return Err(AppError::Conflict(format!(
                        "{} already has primary key column {}",
                        schema.table_name, other.name
                    )));
                }
            }
        }

        if !self.store.update_column(&updated).await? {
            return Err(AppError::NotFound(format!("Column {} not found", column_id)));
        }
        debug!("Updated logical column {} on {}", updated.name, schema.table_name);

        self.record(
            schema.database_id,
            ChangeType::ColumnModify,
            serde_json::to_value(update)?,
            RecordOptions::for_table(&schema.table_name).previous(serde_json::to_value(&column)?),
        )
        .await;
        self.resync(schema.database_id).await;
        Ok(updated)
    }

    /// Drop the physical column, then its logical row
    pub async fn delete_column(&self, column_id: Uuid) -> Result<(), AppError> {
        let column = self.require_column(column_id).await?;
        let schema = self.require_schema(column.schema_id).await?;

        let outcome = self.creator.drop_column(&schema.table_name, &column.name).await;
        physical_name(&outcome)?;

        self.store.delete_column(column_id).await?;
        let remaining = self.store.list_columns(schema.id).await?.len();
        self.update_column_count(schema.id, remaining).await;

        self.record(
            schema.database_id,
            ChangeType::ColumnDrop,
            json!({ "columnId": column_id, "sql": &outcome.sql }),
            RecordOptions::for_table(&schema.table_name).previous(serde_json::to_value(&column)?),
        )
        .await;
        self.resync(schema.database_id).await;
        Ok(())
    }

    // ==================== Compensation ====================

    /// Replay compensations that failed earlier, returns how many applied
    pub async fn retry_compensations(&self) -> usize {
        self.compensations.retry(&self.creator).await
    }

    pub async fn pending_compensations(&self) -> Vec<PendingCompensation> {
        self.compensations.pending().await
    }

    async fn compensate(&self, action: Compensation, cause: &AppError) {
        let applied = self
            .compensations
            .compensate(&self.creator, action, cause.to_string())
            .await;
        if !applied {
            error!("Compensation queued for retry after: {}", cause);
        }
    }

    // ==================== Bookkeeping ====================

    async fn update_column_count(&self, schema_id: Uuid, count: usize) {
        if let Err(e) = self.store.set_column_count(schema_id, count as i32).await {
            warn!("Could not update column count of schema {}: {}", schema_id, e);
        }
    }

    /// History failures never undo a completed change
    async fn record(
        &self,
        database_id: Uuid,
        change_type: ChangeType,
        changes: serde_json::Value,
        options: RecordOptions,
    ) {
        if let Err(e) = self
            .history
            .record_change(database_id, change_type, changes, options)
            .await
        {
            warn!("Could not record {} for database {}: {}", change_type, database_id, e);
        }
    }
}

/// Physical name of a successful outcome, or the store's error
fn physical_name(outcome: &DdlOutcome) -> Result<String, AppError> {
    if !outcome.success {
        return Err(AppError::Execution(
            outcome
                .error
                .clone()
                .unwrap_or_else(|| "DDL execution failed".to_string()),
        ));
    }
    outcome
        .physical_name
        .clone()
        .ok_or_else(|| AppError::Internal("DDL outcome without a table name".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::HistoryQuery;
    use crate::schema::source::ReloadSource;
    use crate::testing::{MemoryHistoryStore, MemorySchemaStore, RecordingExecutor};
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    struct Fixture {
        registry: Arc<SchemaRegistry>,
        exec: Arc<RecordingExecutor>,
        store: Arc<MemorySchemaStore>,
        history: Arc<MemoryHistoryStore>,
        manager: Arc<HistoryManager>,
        feed: Arc<ChangeFeed>,
        db: Uuid,
    }

    fn fixture() -> Fixture {
        let feed = Arc::new(ChangeFeed::new());
        let exec = Arc::new(RecordingExecutor::new());
        let store = Arc::new(MemorySchemaStore::new(feed.clone()));
        let history = Arc::new(MemoryHistoryStore::new(feed.clone()));
        let manager = Arc::new(HistoryManager::new(history.clone(), store.clone()));
        let registry = SchemaRegistry::new(
            Arc::new(TableCreator::new(exec.clone())),
            store.clone(),
            Arc::new(ReloadSource::new(store.clone())),
            manager.clone(),
            feed.clone(),
        );
        Fixture {
            registry: Arc::new(registry),
            exec,
            store,
            history,
            manager,
            feed,
            db: Uuid::new_v4(),
        }
    }

    fn names(columns: &[LogicalColumn]) -> Vec<&str> {
        columns.iter().map(|c| c.name.as_str()).collect()
    }

    #[tokio::test]
    async fn test_create_orders_end_to_end() {
        let f = fixture();
        let table = f
            .registry
            .create_table(f.db, "Orders", &[ColumnSpec::new("Total Price!", "decimal")])
            .await
            .unwrap();

        assert_eq!(table.schema.table_name, "orders");
        assert_eq!(table.schema.display_name, "Orders");
        assert_eq!(table.schema.column_count, 4);
        assert_eq!(
            names(&table.columns),
            vec!["id", "total_price", "created_at", "updated_at"]
        );
        assert_eq!(table.columns.iter().filter(|c| c.is_primary_key).count(), 1);

        let batches = f.exec.batches();
        assert_eq!(batches.len(), 1);
        assert!(batches[0].contains("\"total_price\" decimal(10,2)"));

        let stored = f.registry.list_columns(table.schema.id).await.unwrap();
        assert_eq!(names(&stored), names(&table.columns));

        let changes = f.history.changes().await;
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].change_type, ChangeType::TableCreate);
        assert_eq!(changes[0].table_name.as_deref(), Some("orders"));
    }

    #[tokio::test]
    async fn test_failed_ddl_leaves_logical_state_untouched() {
        let f = fixture();
        f.exec.fail_next("permission denied");

        let result = f
            .registry
            .create_table(f.db, "orders", &[ColumnSpec::new("total", "decimal")])
            .await;

        assert!(matches!(result, Err(AppError::Execution(ref e)) if e == "permission denied"));
        assert!(f.store.list_schemas(f.db).await.unwrap().is_empty());
        assert!(f.history.changes().await.is_empty());
    }

    #[tokio::test]
    async fn test_delete_unknown_schema_runs_no_ddl() {
        let f = fixture();
        let result = f.registry.delete_table(Uuid::new_v4()).await;

        assert!(matches!(result, Err(AppError::NotFound(_))));
        assert!(f.exec.batches().is_empty());
    }

    #[tokio::test]
    async fn test_delete_table_drops_then_removes_rows() {
        let f = fixture();
        let table = f.registry.create_table(f.db, "orders", &[]).await.unwrap();

        f.registry.delete_table(table.schema.id).await.unwrap();

        assert_eq!(
            f.exec.batches().last().unwrap(),
            "DROP TABLE IF EXISTS \"orders\" CASCADE;"
        );
        assert!(f.store.get_schema(table.schema.id).await.unwrap().is_none());
        assert!(f.store.list_columns(table.schema.id).await.unwrap().is_empty());

        let drops = f
            .manager
            .get_change_history(
                f.db,
                &HistoryQuery {
                    change_type: Some(ChangeType::TableDrop),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(drops.len(), 1);
        assert!(drops[0].previous_values.is_some());
    }

    #[tokio::test]
    async fn test_failed_drop_keeps_logical_row() {
        let f = fixture();
        let table = f.registry.create_table(f.db, "orders", &[]).await.unwrap();

        f.exec.fail_next("lock timeout");
        assert!(f.registry.delete_table(table.schema.id).await.is_err());
        assert!(f.store.get_schema(table.schema.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_add_column_uses_next_order() {
        let f = fixture();
        let table = f
            .registry
            .create_table(f.db, "Orders", &[ColumnSpec::new("Total Price!", "decimal")])
            .await
            .unwrap();
        let previous_max = table.columns.iter().map(|c| c.order).max().unwrap();

        let added = f
            .registry
            .add_column(table.schema.id, &ColumnSpec::new("Note", "text"))
            .await
            .unwrap();
        assert_eq!(added.name, "note");
        assert_eq!(added.order, previous_max + 1);

        let columns = f.registry.list_columns(table.schema.id).await.unwrap();
        assert_eq!(columns.last().unwrap().id, added.id);
        assert_eq!(columns.last().unwrap().order, previous_max + 1);

        let schema = f.store.get_schema(table.schema.id).await.unwrap().unwrap();
        assert_eq!(schema.column_count, 5);
    }

    #[tokio::test]
    async fn test_add_duplicate_column_is_rejected_before_ddl() {
        let f = fixture();
        let table = f.registry.create_table(f.db, "orders", &[]).await.unwrap();
        let before = f.exec.batches().len();

        let result = f
            .registry
            .add_column(table.schema.id, &ColumnSpec::new("Created At", "timestamp"))
            .await;
        assert!(matches!(result, Err(AppError::Conflict(_))));
        assert_eq!(f.exec.batches().len(), before);
    }

    #[tokio::test]
    async fn test_failed_column_insert_is_compensated() {
        let f = fixture();
        let table = f.registry.create_table(f.db, "orders", &[]).await.unwrap();

        f.store.fail_column_inserts(true);
        let result = f
            .registry
            .add_column(table.schema.id, &ColumnSpec::new("note", "text"))
            .await;
        assert!(result.is_err());

        assert_eq!(
            f.exec.batches().last().unwrap(),
            "ALTER TABLE \"orders\" DROP COLUMN IF EXISTS \"note\";"
        );
        assert!(f.registry.pending_compensations().await.is_empty());

        let columns = f.registry.list_columns(table.schema.id).await.unwrap();
        assert_eq!(names(&columns), names(&table.columns));
    }

    #[tokio::test]
    async fn test_failed_compensation_waits_for_retry() {
        let f = fixture();
        f.store.fail_column_inserts(true);
        f.exec.fail_when_contains("DROP TABLE", "connection lost");

        let result = f
            .registry
            .create_table(f.db, "orders", &[ColumnSpec::new("total", "decimal")])
            .await;
        assert!(result.is_err());
        assert_eq!(f.store.schema_rows_named("orders").await, 0);

        let pending = f.registry.pending_compensations().await;
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].action, Compensation::DropTable { table: "orders".into() });
        assert_eq!(pending[0].last_error.as_deref(), Some("connection lost"));

        assert_eq!(f.registry.retry_compensations().await, 1);
        assert!(f.registry.pending_compensations().await.is_empty());
        assert_eq!(
            f.exec.batches().last().unwrap(),
            "DROP TABLE IF EXISTS \"orders\" CASCADE;"
        );
    }

    #[tokio::test]
    async fn test_update_column_is_logical_only() {
        let f = fixture();
        let table = f
            .registry
            .create_table(f.db, "orders", &[ColumnSpec::new("total", "decimal")])
            .await
            .unwrap();
        let total = table.columns.iter().find(|c| c.name == "total").unwrap();
        let batches_before = f.exec.batches().len();

        let updated = f
            .registry
            .update_column(
                total.id,
                &ColumnUpdate {
                    name: Some("Grand Total".into()),
                    comment: Some("incl. tax".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(updated.name, "grand_total");
        assert_eq!(updated.order, total.order);
        assert_eq!(f.exec.batches().len(), batches_before);

        let modifies = f
            .manager
            .get_change_history(
                f.db,
                &HistoryQuery {
                    change_type: Some(ChangeType::ColumnModify),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(modifies.len(), 1);
        assert_eq!(modifies[0].previous_values.as_ref().unwrap()["name"], "total");
    }

    #[tokio::test]
    async fn test_delete_column() {
        let f = fixture();
        let table = f
            .registry
            .create_table(f.db, "orders", &[ColumnSpec::new("note", "text")])
            .await
            .unwrap();
        let note = table.columns.iter().find(|c| c.name == "note").unwrap();

        f.registry.delete_column(note.id).await.unwrap();

        assert_eq!(
            f.exec.batches().last().unwrap(),
            "ALTER TABLE \"orders\" DROP COLUMN IF EXISTS \"note\";"
        );
        let columns = f.registry.list_columns(table.schema.id).await.unwrap();
        assert!(columns.iter().all(|c| c.name != "note"));
        let schema = f.store.get_schema(table.schema.id).await.unwrap().unwrap();
        assert_eq!(schema.column_count, columns.len() as i32);

        assert!(matches!(
            f.registry.delete_column(note.id).await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_concurrent_create_of_same_table_is_not_serialized() {
        let f = fixture();
        let (a, b) = tokio::join!(
            f.registry.create_table(f.db, "Same", &[]),
            f.registry.create_table(f.db, "Same", &[]),
        );

        // The store rejects the second physical CREATE; this executor does not
        assert!(a.is_ok() || b.is_ok());
        assert!(f.store.schema_rows_named("same").await >= 1);
        assert!(f.exec.batches().iter().all(|sql| !sql.contains("IF NOT EXISTS")));
    }

    #[tokio::test]
    async fn test_create_of_registered_table_is_rejected_before_ddl() {
        let f = fixture();
        let first = f.registry.create_table(f.db, "orders", &[]).await.unwrap();
        let batches_before = f.exec.batches().len();

        f.store.fail_column_inserts(true);
        let result = f.registry.create_table(f.db, "Orders", &[]).await;

        assert!(matches!(result, Err(AppError::Conflict(_))));
        assert_eq!(f.exec.batches().len(), batches_before);
        assert!(f.registry.pending_compensations().await.is_empty());
        assert!(f.store.get_schema(first.schema.id).await.unwrap().is_some());
        assert_eq!(f.store.schema_rows_named("orders").await, 1);
    }

    #[tokio::test]
    async fn test_compensated_create_only_drops_what_it_created() {
        let f = fixture();
        f.store.fail_column_inserts(true);

        let result = f
            .registry
            .create_table(f.db, "orders", &[ColumnSpec::new("total", "decimal")])
            .await;
        assert!(result.is_err());

        let batches = f.exec.batches();
        assert_eq!(batches.len(), 2);
        assert!(batches[0].starts_with("CREATE TABLE \"orders\""));
        assert_eq!(batches[1], "DROP TABLE IF EXISTS \"orders\" CASCADE;");
    }

    #[tokio::test]
    async fn test_promoting_second_primary_key_is_rejected() {
        let f = fixture();
        let table = f
            .registry
            .create_table(f.db, "orders", &[ColumnSpec::new("code", "text")])
            .await
            .unwrap();
        let code = table.columns.iter().find(|c| c.name == "code").unwrap();

        let result = f
            .registry
            .update_column(
                code.id,
                &ColumnUpdate {
                    is_primary_key: Some(true),
                    ..Default::default()
                },
            )
            .await;
        assert!(matches!(result, Err(AppError::Conflict(_))));

        let columns = f.registry.list_columns(table.schema.id).await.unwrap();
        assert_eq!(columns.iter().filter(|c| c.is_primary_key).count(), 1);
        assert!(columns.iter().find(|c| c.name == "id").unwrap().is_primary_key);
    }

    #[tokio::test]
    async fn test_history_failure_keeps_structural_change() {
        let f = fixture();
        f.history.fail_inserts(true);

        let table = f
            .registry
            .create_table(f.db, "orders", &[ColumnSpec::new("total", "decimal")])
            .await
            .unwrap();
        let added = f
            .registry
            .add_column(table.schema.id, &ColumnSpec::new("note", "text"))
            .await
            .unwrap();

        assert!(f.store.get_schema(table.schema.id).await.unwrap().is_some());
        let columns = f.registry.list_columns(table.schema.id).await.unwrap();
        assert!(columns.iter().any(|c| c.id == added.id));
        assert!(f.registry.pending_compensations().await.is_empty());
        assert!(f.history.changes().await.is_empty());
        assert!(f
            .exec
            .batches()
            .iter()
            .all(|sql| !sql.contains("DROP TABLE") && !sql.contains("DROP COLUMN")));
    }

    #[tokio::test]
    async fn test_active_database_cache_follows_mutations() {
        let f = fixture();
        assert!(f.registry.refresh().await.is_err());

        f.registry.set_active_database(f.db).await.unwrap();
        let table = f.registry.create_table(f.db, "orders", &[]).await.unwrap();

        let schemas = f.registry.list_schemas(f.db).await.unwrap();
        assert_eq!(schemas.len(), 1);
        let cached = f.registry.get_schema(table.schema.id).await.unwrap();
        assert_eq!(cached.columns.len(), table.columns.len());
    }

    #[tokio::test]
    async fn test_sync_reloads_on_external_change() {
        let f = fixture();
        f.registry.set_active_database(f.db).await.unwrap();
        let handle = f.registry.start_sync().await.unwrap();
        assert_eq!(f.feed.subscriber_count().await, 1);

        // Written behind the registry's back
        let external = LogicalSchema::new(f.db, "external".into(), "External".into(), 0);
        f.store.insert_schema(&external).await.unwrap();

        let registry = f.registry.clone();
        let db = f.db;
        let seen = tokio::time::timeout(Duration::from_secs(2), async move {
            loop {
                let schemas = registry.list_schemas(db).await.unwrap();
                if schemas.iter().any(|s| s.table_name == "external") {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await;
        assert!(seen.is_ok());

        handle.stop().await;
        assert_eq!(f.feed.subscriber_count().await, 0);
    }

    #[tokio::test]
    async fn test_switching_database_moves_subscription() {
        let f = fixture();
        f.registry.set_active_database(f.db).await.unwrap();
        let _handle = f.registry.start_sync().await.unwrap();

        let other = Uuid::new_v4();
        f.registry.set_active_database(other).await.unwrap();

        assert_eq!(f.registry.active_database().await, Some(other));
        assert_eq!(f.feed.subscriber_count().await, 1);
    }
}
