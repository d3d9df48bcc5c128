//! Application state management
//!
//! Contains shared state accessible across all handlers. Every component is
//! built once at startup and handed its dependencies explicitly.

use crate::config::{EngineConfig, Settings};
use crate::db::{PgExecutor, SqlExecutor};
use crate::ddl::{CreateTableOptions, TableCreator};
use crate::history::{HistoryManager, HistoryStore, PgHistoryStore};
use crate::schema::{ChangeFeed, PgSchemaStore, ReloadSource, SchemaRegistry, SchemaStore};
use deadpool_postgres::Pool;
use std::sync::Arc;

/// Application state shared across all handlers
pub struct AppState {
    /// Schema registry (physical DDL + logical metadata)
    pub registry: Arc<SchemaRegistry>,

    /// Change log and snapshots
    pub history: Arc<HistoryManager>,

    /// Metadata change notifications
    pub feed: Arc<ChangeFeed>,

    pub engine: EngineConfig,
}

impl AppState {
    /// Wire the PostgreSQL-backed components around one pool
    pub fn new(pool: Pool, settings: &Settings) -> Self {
        let feed = Arc::new(ChangeFeed::new());
        let executor: Arc<dyn SqlExecutor> = Arc::new(PgExecutor::new(pool.clone()));
        let schemas: Arc<dyn SchemaStore> = Arc::new(PgSchemaStore::new(pool.clone(), feed.clone()));
        let history_store: Arc<dyn HistoryStore> = Arc::new(PgHistoryStore::new(pool, feed.clone()));

        Self::with_components(executor, schemas, history_store, feed, settings.engine.clone())
    }

    pub fn with_components(
        executor: Arc<dyn SqlExecutor>,
        schemas: Arc<dyn SchemaStore>,
        history_store: Arc<dyn HistoryStore>,
        feed: Arc<ChangeFeed>,
        engine: EngineConfig,
    ) -> Self {
        let history = Arc::new(
            HistoryManager::new(history_store, schemas.clone())
                .with_default_actor(engine.default_actor.clone()),
        );
        let options = CreateTableOptions {
            enable_change_feed: engine.enable_change_feed,
            disable_access_control: engine.disable_access_control,
            ..CreateTableOptions::default()
        };
        let registry = SchemaRegistry::new(
            Arc::new(TableCreator::new(executor)),
            schemas.clone(),
            Arc::new(ReloadSource::new(schemas)),
            history.clone(),
            feed.clone(),
        )
        .with_options(options);

        Self {
            registry: Arc::new(registry),
            history,
            feed,
            engine,
        }
    }
}

/// Type alias for shared state
pub type SharedState = Arc<AppState>;
