//! Schema registry route handlers
//!
//! Tables and columns of dynamic databases. Every structural change goes
//! through the registry, never straight to the store.

use crate::error::ApiResult;
use crate::models::{ColumnSpec, CreateTableRequest, SuccessResponse};
use crate::schema::saga::PendingCompensation;
use crate::schema::{ColumnUpdate, LogicalColumn, LogicalSchema, TableDefinition};
use crate::state::SharedState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;
use tracing::debug;
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveDatabaseResponse {
    pub database_id: Uuid,
    pub tables: Vec<TableDefinition>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryResponse {
    pub applied: usize,
    pub pending: Vec<PendingCompensation>,
}

/// Make a database the registry's cached, feed-synchronized one
pub async fn activate_database(
    State(state): State<SharedState>,
    Path(database_id): Path<Uuid>,
) -> ApiResult<Json<SuccessResponse<ActiveDatabaseResponse>>> {
    let loaded = state.registry.set_active_database(database_id).await?;

    Ok(Json(SuccessResponse::with_data(
        format!("Database {} is now active", database_id),
        ActiveDatabaseResponse {
            database_id,
            tables: loaded.tables(),
        },
    )))
}

pub async fn list_schemas(
    State(state): State<SharedState>,
    Path(database_id): Path<Uuid>,
) -> ApiResult<Json<SuccessResponse<Vec<LogicalSchema>>>> {
    let schemas = state.registry.list_schemas(database_id).await?;

    Ok(Json(SuccessResponse::with_data(
        format!("Found {} tables", schemas.len()),
        schemas,
    )))
}

/// Create a physical table and register it
pub async fn create_table(
    State(state): State<SharedState>,
    Path(database_id): Path<Uuid>,
    Json(payload): Json<CreateTableRequest>,
) -> ApiResult<(StatusCode, Json<SuccessResponse<TableDefinition>>)> {
    payload.validate()?;
    debug!(
        "Creating table {} with {} columns in database {}",
        payload.table_name,
        payload.columns.len(),
        database_id
    );

    let table = state
        .registry
        .create_table(database_id, &payload.table_name, &payload.columns)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(SuccessResponse::with_data(
            format!("Table '{}' created successfully.", table.schema.table_name),
            table,
        )),
    ))
}

pub async fn get_schema(
    State(state): State<SharedState>,
    Path(schema_id): Path<Uuid>,
) -> ApiResult<Json<SuccessResponse<TableDefinition>>> {
    let table = state.registry.get_schema(schema_id).await?;
    Ok(Json(SuccessResponse::with_data("Table loaded", table)))
}

pub async fn delete_table(
    State(state): State<SharedState>,
    Path(schema_id): Path<Uuid>,
) -> ApiResult<Json<SuccessResponse<()>>> {
    state.registry.delete_table(schema_id).await?;
    Ok(Json(SuccessResponse::message_only(format!(
        "Table {} deleted",
        schema_id
    ))))
}

pub async fn list_columns(
    State(state): State<SharedState>,
    Path(schema_id): Path<Uuid>,
) -> ApiResult<Json<SuccessResponse<Vec<LogicalColumn>>>> {
    let columns = state.registry.list_columns(schema_id).await?;

    Ok(Json(SuccessResponse::with_data(
        format!("Found {} columns", columns.len()),
        columns,
    )))
}

pub async fn add_column(
    State(state): State<SharedState>,
    Path(schema_id): Path<Uuid>,
    Json(payload): Json<ColumnSpec>,
) -> ApiResult<(StatusCode, Json<SuccessResponse<LogicalColumn>>)> {
    payload.validate()?;
    let column = state.registry.add_column(schema_id, &payload).await?;

    Ok((
        StatusCode::CREATED,
        Json(SuccessResponse::with_data(
            format!("Column '{}' added", column.name),
            column,
        )),
    ))
}

/// Logical-only column update
pub async fn update_column(
    State(state): State<SharedState>,
    Path(column_id): Path<Uuid>,
    Json(payload): Json<ColumnUpdate>,
) -> ApiResult<Json<SuccessResponse<LogicalColumn>>> {
    let column = state.registry.update_column(column_id, &payload).await?;
    Ok(Json(SuccessResponse::with_data("Column updated", column)))
}

pub async fn delete_column(
    State(state): State<SharedState>,
    Path(column_id): Path<Uuid>,
) -> ApiResult<Json<SuccessResponse<()>>> {
    state.registry.delete_column(column_id).await?;
    Ok(Json(SuccessResponse::message_only(format!(
        "Column {} deleted",
        column_id
    ))))
}

pub async fn list_compensations(
    State(state): State<SharedState>,
) -> ApiResult<Json<SuccessResponse<Vec<PendingCompensation>>>> {
    let pending = state.registry.pending_compensations().await;
    Ok(Json(SuccessResponse::with_data(
        format!("{} compensations pending", pending.len()),
        pending,
    )))
}

pub async fn retry_compensations(
    State(state): State<SharedState>,
) -> ApiResult<Json<SuccessResponse<RetryResponse>>> {
    let applied = state.registry.retry_compensations().await;
    let pending = state.registry.pending_compensations().await;

    Ok(Json(SuccessResponse::with_data(
        format!("Applied {} compensations", applied),
        RetryResponse { applied, pending },
    )))
}
