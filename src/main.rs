//! Dynamic schema API
//!
//! Lets operators define tables and columns at runtime. Structural changes
//! are turned into DDL against PostgreSQL, mirrored into a logical metadata
//! registry, and recorded in an append-only change log with point-in-time
//! snapshots.

mod config;
mod db;
mod ddl;
mod error;
mod history;
mod models;
mod routes;
mod schema;
mod state;
#[cfg(test)]
mod testing;

use crate::config::Settings;
use crate::routes::create_router;
use crate::state::AppState;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing subscriber for structured logging
    init_tracing();

    info!("Starting dynamic schema API...");

    // Load configuration
    let settings = Settings::load()?;
    info!(
        "Configuration loaded (database {}:{}/{}, TLS: {})",
        settings.database.host,
        settings.database.port,
        settings.database.database,
        settings.database.use_tls
    );

    // The backing store is required; there is no in-memory fallback
    let pool = db::create_pool(&settings.database)?;
    if let Err(e) = db::check_connection(&pool).await {
        error!("Failed to reach the database: {}", e);
        return Err(e.into());
    }
    info!("Database connection successful");

    db::bootstrap_metadata_tables(&pool).await?;

    let state = Arc::new(AppState::new(pool, &settings));

    // Keep one database cached and in sync if configured
    let _sync = match settings.engine.active_database {
        Some(database_id) => match state.registry.set_active_database(database_id).await {
            Ok(loaded) => {
                info!("Loaded {} tables for database {}", loaded.schemas.len(), database_id);
                Some(state.registry.start_sync().await?)
            }
            Err(e) => {
                warn!("Could not load active database {}: {}", database_id, e);
                None
            }
        },
        None => None,
    };

    // Build the router
    let app = create_router(state, &settings);

    // Create socket address
    let addr = SocketAddr::from((settings.server.host, settings.server.port));
    info!("Server listening on http://{}", addr);

    // Create TCP listener and serve
    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

/// Initialize tracing with structured logging
fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,dynschema_api=debug,tower_http=debug"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_target(true)
                .with_level(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true)
                .compact(),
        )
        .init();
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal, initiating graceful shutdown...");
        },
        _ = terminate => {
            info!("Received terminate signal, initiating graceful shutdown...");
        },
    }
}
