//! Request DTOs for table, column and history endpoints

use super::column::ColumnSpec;
use serde::{Deserialize, Serialize};
use validator::Validate;

/// Request to create a new dynamic table
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateTableRequest {
    #[validate(length(min = 1, max = 63, message = "Table name must be between 1 and 63 characters"))]
    pub table_name: String,

    #[validate(length(min = 1, message = "At least one column is required"), nested)]
    pub columns: Vec<ColumnSpec>,
}

/// Request to restore a snapshot
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoreRequest {
    pub created_by: Option<String>,
}

/// Request to remove expired auto snapshots
#[derive(Debug, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CleanupRequest {
    /// Falls back to the configured retention
    #[validate(range(min = 0, max = 3650, message = "Retention must be between 0 and 3650 days"))]
    pub retention_days: Option<i64>,
}

/// Result of a cleanup run
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupResponse {
    pub deleted: u64,
    pub retention_days: i64,
}
