//! Change history and snapshot route handlers

use crate::error::ApiResult;
use crate::history::{
    ChangeRecord, HistoryQuery, RestoreReport, Snapshot, SnapshotDiff, SnapshotOptions,
    SnapshotQuery,
};
use crate::models::{CleanupRequest, CleanupResponse, RestoreRequest, SuccessResponse};
use crate::state::SharedState;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotCreated {
    pub snapshot_id: Uuid,
}

/// Change log, newest first
pub async fn list_changes(
    State(state): State<SharedState>,
    Path(database_id): Path<Uuid>,
    Query(query): Query<HistoryQuery>,
) -> ApiResult<Json<SuccessResponse<Vec<ChangeRecord>>>> {
    let changes = state.history.get_change_history(database_id, &query).await?;

    Ok(Json(SuccessResponse::with_data(
        format!("Found {} changes", changes.len()),
        changes,
    )))
}

pub async fn list_snapshots(
    State(state): State<SharedState>,
    Path(database_id): Path<Uuid>,
    Query(query): Query<SnapshotQuery>,
) -> ApiResult<Json<SuccessResponse<Vec<Snapshot>>>> {
    let snapshots = state.history.get_snapshots(database_id, &query).await?;

    Ok(Json(SuccessResponse::with_data(
        format!("Found {} snapshots", snapshots.len()),
        snapshots,
    )))
}

pub async fn create_snapshot(
    State(state): State<SharedState>,
    Path(database_id): Path<Uuid>,
    Json(options): Json<SnapshotOptions>,
) -> ApiResult<(StatusCode, Json<SuccessResponse<SnapshotCreated>>)> {
    let snapshot_id = state.history.create_snapshot(database_id, options).await?;

    Ok((
        StatusCode::CREATED,
        Json(SuccessResponse::with_data(
            "Snapshot created",
            SnapshotCreated { snapshot_id },
        )),
    ))
}

pub async fn get_snapshot(
    State(state): State<SharedState>,
    Path(snapshot_id): Path<Uuid>,
) -> ApiResult<Json<SuccessResponse<Snapshot>>> {
    let snapshot = state.history.get_snapshot(snapshot_id).await?;
    Ok(Json(SuccessResponse::with_data("Snapshot loaded", snapshot)))
}

/// Differences between current state and the snapshot
pub async fn diff_snapshot(
    State(state): State<SharedState>,
    Path(snapshot_id): Path<Uuid>,
) -> ApiResult<Json<SuccessResponse<SnapshotDiff>>> {
    let diff = state.history.diff_snapshot(snapshot_id).await?;

    Ok(Json(SuccessResponse::with_data(
        format!("{} differences", diff.items.len()),
        diff,
    )))
}

/// Advisory restore: backs up, records the plan, applies nothing
pub async fn restore_snapshot(
    State(state): State<SharedState>,
    Path(snapshot_id): Path<Uuid>,
    Json(payload): Json<RestoreRequest>,
) -> ApiResult<Json<SuccessResponse<RestoreReport>>> {
    let report = state
        .history
        .restore_from_snapshot(snapshot_id, payload.created_by)
        .await?;

    Ok(Json(SuccessResponse::with_data(
        "Restore recorded; review the plan, no changes were applied",
        report,
    )))
}

pub async fn cleanup_snapshots(
    State(state): State<SharedState>,
    Path(database_id): Path<Uuid>,
    Json(payload): Json<CleanupRequest>,
) -> ApiResult<Json<SuccessResponse<CleanupResponse>>> {
    payload.validate()?;
    let retention_days = payload
        .retention_days
        .unwrap_or(state.engine.snapshot_retention_days);
    let deleted = state
        .history
        .cleanup_old_snapshots(database_id, retention_days)
        .await?;

    Ok(Json(SuccessResponse::with_data(
        format!("Removed {} auto snapshots", deleted),
        CleanupResponse {
            deleted,
            retention_days,
        },
    )))
}
