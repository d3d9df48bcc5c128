//! Database connection management
//!
//! Builds the connection pool for the backing store and exposes the
//! generic SQL execution boundary used by the DDL layer.

pub mod queries;

use crate::config::DatabaseConfig;
use crate::error::AppError;
use async_trait::async_trait;
use deadpool_postgres::{Config, ManagerConfig, Pool, RecyclingMethod, Runtime};
use serde::Serialize;
use tokio_postgres::NoTls;
use tracing::{debug, info, warn};

/// Result of a raw statement batch, shaped like the hosted backend's RPC reply
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExecResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ExecResponse {
    pub fn ok(data: Option<serde_json::Value>) -> Self {
        Self { data, error: None }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            data: None,
            error: Some(error.into()),
        }
    }

    pub fn into_result(self) -> Result<Option<serde_json::Value>, AppError> {
        match self.error {
            Some(e) => Err(AppError::Execution(e)),
            None => Ok(self.data),
        }
    }
}

/// Generic SQL execution boundary.
///
/// Accepts a raw statement batch and never fails at the type level; store
/// and transport errors come back in [`ExecResponse::error`].
#[async_trait]
pub trait SqlExecutor: Send + Sync {
    async fn execute_batch(&self, sql: &str) -> ExecResponse;
}

/// Executes batches on a pooled PostgreSQL connection
pub struct PgExecutor {
    pool: Pool,
}

impl PgExecutor {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SqlExecutor for PgExecutor {
    async fn execute_batch(&self, sql: &str) -> ExecResponse {
        let client = match self.pool.get().await {
            Ok(client) => client,
            Err(e) => {
                warn!("Pool error while executing batch: {}", e);
                return ExecResponse::failed(format!("Database pool error: {}", e));
            }
        };

        debug!("Executing SQL batch ({} bytes)", sql.len());
        match client.batch_execute(sql).await {
            Ok(()) => ExecResponse::ok(None),
            Err(e) => {
                // Prefer the server message over the generic "db error"
                let message = e
                    .as_db_error()
                    .map(|db| db.message().to_string())
                    .unwrap_or_else(|| e.to_string());
                ExecResponse::failed(message)
            }
        }
    }
}

/// Create a connection pool, with TLS for hosted providers
pub fn create_pool(config: &DatabaseConfig) -> Result<Pool, AppError> {
    let mut cfg = Config::new();
    cfg.host = Some(config.host.clone());
    cfg.port = Some(config.port);
    cfg.user = Some(config.user.clone());
    cfg.password = Some(config.password.clone());
    cfg.dbname = Some(config.database.clone());
    cfg.manager = Some(ManagerConfig {
        recycling_method: RecyclingMethod::Fast,
    });
    cfg.pool = Some(deadpool_postgres::PoolConfig::new(config.max_pool_size));

    if config.use_tls {
        let certs = rustls_native_certs::load_native_certs();
        let mut root_store = rustls::RootCertStore::empty();
        for cert in certs.certs {
            root_store.add(cert).ok();
        }

        let tls_config = rustls::ClientConfig::builder()
            .with_root_certificates(root_store)
            .with_no_client_auth();
        let tls = tokio_postgres_rustls::MakeRustlsConnect::new(tls_config);

        cfg.create_pool(Some(Runtime::Tokio1), tls)
            .map_err(|e| AppError::Config(format!("Failed to create TLS pool: {}", e)))
    } else {
        cfg.create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| AppError::Config(format!("Failed to create pool: {}", e)))
    }
}

/// Verify the pool can reach the store
pub async fn check_connection(pool: &Pool) -> Result<(), AppError> {
    let client = pool.get().await?;
    client.query_one("SELECT 1", &[]).await?;
    Ok(())
}

/// Create the engine's metadata tables if they don't exist
pub async fn bootstrap_metadata_tables(pool: &Pool) -> Result<(), AppError> {
    let client = pool.get().await?;
    client.batch_execute(queries::BOOTSTRAP_METADATA).await?;
    info!("Metadata tables initialized");
    Ok(())
}
