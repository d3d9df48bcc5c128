//! Route definitions and router setup
//!
//! Configures all API routes and middleware.

mod history;
mod schema;

use crate::config::Settings;
use crate::state::SharedState;
use axum::{
    http::{header, Method},
    routing::{get, patch, post},
    Router,
};
use std::time::Duration;
use tower::ServiceBuilder;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    request_id::MakeRequestUuid,
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
    ServiceBuilderExt,
};
use tracing::Level;

/// Create the application router with all routes and middleware
pub fn create_router(state: SharedState, settings: &Settings) -> Router {
    // Build CORS layer
    let cors = build_cors_layer(settings);

    // Build tracing/logging layer
    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
        .on_request(DefaultOnRequest::new().level(Level::INFO))
        .on_response(DefaultOnResponse::new().level(Level::INFO));

    // Build middleware stack
    let middleware = ServiceBuilder::new()
        .set_x_request_id(MakeRequestUuid)
        .layer(trace_layer)
        .layer(CompressionLayer::new())
        .layer(cors)
        .propagate_x_request_id();

    api_routes().layer(middleware).with_state(state)
}

fn api_routes() -> Router<SharedState> {
    Router::new()
        // Health check
        .route("/health", get(health_check))

        // Tables
        .route("/api/databases/{database_id}/activate", post(schema::activate_database))
        .route(
            "/api/databases/{database_id}/schemas",
            get(schema::list_schemas).post(schema::create_table),
        )
        .route(
            "/api/schemas/{schema_id}",
            get(schema::get_schema).delete(schema::delete_table),
        )

        // Columns
        .route(
            "/api/schemas/{schema_id}/columns",
            get(schema::list_columns).post(schema::add_column),
        )
        .route(
            "/api/columns/{column_id}",
            patch(schema::update_column).delete(schema::delete_column),
        )

        // Compensations
        .route("/api/compensations", get(schema::list_compensations))
        .route("/api/compensations/retry", post(schema::retry_compensations))

        // History
        .route("/api/databases/{database_id}/changes", get(history::list_changes))
        .route(
            "/api/databases/{database_id}/snapshots",
            get(history::list_snapshots).post(history::create_snapshot),
        )
        .route(
            "/api/databases/{database_id}/snapshots/cleanup",
            post(history::cleanup_snapshots),
        )
        .route("/api/snapshots/{snapshot_id}", get(history::get_snapshot))
        .route("/api/snapshots/{snapshot_id}/diff", get(history::diff_snapshot))
        .route("/api/snapshots/{snapshot_id}/restore", post(history::restore_snapshot))
}

/// Build CORS layer from settings
fn build_cors_layer(settings: &Settings) -> CorsLayer {
    let origins: Vec<_> = settings
        .cors
        .allowed_origins
        .iter()
        .filter_map(|s| s.parse().ok())
        .collect();

    let methods = [
        Method::GET,
        Method::POST,
        Method::PATCH,
        Method::DELETE,
        Method::OPTIONS,
    ];
    let headers = [header::CONTENT_TYPE, header::AUTHORIZATION, header::ACCEPT];

    if origins.is_empty() {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(methods)
            .allow_headers(headers)
            .max_age(Duration::from_secs(3600))
    } else {
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(methods)
            .allow_headers(headers)
            .max_age(Duration::from_secs(3600))
    }
}

/// Health check endpoint
async fn health_check() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({
        "success": true,
        "message": "Server is running fine.",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "version": env!("CARGO_PKG_VERSION")
    }))
}
