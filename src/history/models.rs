//! Change-log and snapshot records

use crate::history::diff::SnapshotDiff;
use crate::schema::models::{LogicalColumn, LogicalSchema};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

pub const DEFAULT_PAGE_SIZE: i64 = 50;
pub const MAX_PAGE_SIZE: i64 = 500;

/// Kind of mutation captured by a change record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    SchemaAdd,
    SchemaDelete,
    SchemaUpdate,
    DataInsert,
    DataUpdate,
    DataDelete,
    TableCreate,
    TableDrop,
    ColumnAdd,
    ColumnDrop,
    ColumnModify,
}

impl ChangeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeType::SchemaAdd => "schema_add",
            ChangeType::SchemaDelete => "schema_delete",
            ChangeType::SchemaUpdate => "schema_update",
            ChangeType::DataInsert => "data_insert",
            ChangeType::DataUpdate => "data_update",
            ChangeType::DataDelete => "data_delete",
            ChangeType::TableCreate => "table_create",
            ChangeType::TableDrop => "table_drop",
            ChangeType::ColumnAdd => "column_add",
            ChangeType::ColumnDrop => "column_drop",
            ChangeType::ColumnModify => "column_modify",
        }
    }
}

impl fmt::Display for ChangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChangeType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        serde_json::from_value(serde_json::Value::String(s.to_string()))
            .map_err(|_| format!("Unknown change type: {}", s))
    }
}

/// One append-only audit entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeRecord {
    pub id: Uuid,
    pub database_id: Uuid,
    pub change_type: ChangeType,
    pub table_name: Option<String>,
    pub record_id: Option<String>,
    pub changes: serde_json::Value,
    pub previous_values: Option<serde_json::Value>,
    /// Correlates records produced by one logical operation
    pub batch_id: Uuid,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

/// Optional fields for [`HistoryManager::record_change`](super::HistoryManager::record_change)
#[derive(Debug, Clone, Default)]
pub struct RecordOptions {
    pub table_name: Option<String>,
    pub record_id: Option<String>,
    pub previous_values: Option<serde_json::Value>,
    pub batch_id: Option<Uuid>,
    pub created_by: Option<String>,
}

impl RecordOptions {
    pub fn for_table(table_name: impl Into<String>) -> Self {
        Self {
            table_name: Some(table_name.into()),
            ..Default::default()
        }
    }

    pub fn previous(mut self, values: serde_json::Value) -> Self {
        self.previous_values = Some(values);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotType {
    Manual,
    /// Created by the engine; subject to retention cleanup
    Auto,
    Checkpoint,
}

impl SnapshotType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SnapshotType::Manual => "manual",
            SnapshotType::Auto => "auto",
            SnapshotType::Checkpoint => "checkpoint",
        }
    }
}

impl Default for SnapshotType {
    fn default() -> Self {
        SnapshotType::Manual
    }
}

impl FromStr for SnapshotType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "manual" => Ok(SnapshotType::Manual),
            "auto" => Ok(SnapshotType::Auto),
            "checkpoint" => Ok(SnapshotType::Checkpoint),
            _ => Err(format!("Unknown snapshot type: {}", s)),
        }
    }
}

/// Serialized point-in-time capture of a database's logical state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotData {
    pub schemas: Vec<LogicalSchema>,
    pub columns: Vec<LogicalColumn>,
    /// Physical table name -> rows
    pub tables: BTreeMap<String, Vec<serde_json::Value>>,
    /// SHA-256 over the structural content, stable across identical schemas
    pub checksum: String,
}

impl SnapshotData {
    pub fn new(
        schemas: Vec<LogicalSchema>,
        columns: Vec<LogicalColumn>,
        tables: BTreeMap<String, Vec<serde_json::Value>>,
    ) -> Self {
        let checksum = Self::compute_checksum(&schemas, &columns);
        Self {
            schemas,
            columns,
            tables,
            checksum,
        }
    }

    /// Hash table and column structure in a stable order
    pub fn compute_checksum(schemas: &[LogicalSchema], columns: &[LogicalColumn]) -> String {
        let mut hasher = Sha256::new();

        let mut tables: Vec<(&Uuid, &str)> =
            schemas.iter().map(|s| (&s.id, s.table_name.as_str())).collect();
        tables.sort_by(|a, b| a.1.cmp(b.1));

        for (schema_id, table) in tables {
            hasher.update(table.as_bytes());
            let mut cols: Vec<&LogicalColumn> =
                columns.iter().filter(|c| c.schema_id == *schema_id).collect();
            cols.sort_by_key(|c| c.order);
            for col in cols {
                hasher.update(
                    format!(
                        "{}.{}:{}:{}:{}:{}",
                        table, col.name, col.data_type, col.nullable, col.is_primary_key, col.is_unique
                    )
                    .as_bytes(),
                );
            }
        }

        format!("{:x}", hasher.finalize())
    }

    pub fn row_count(&self) -> usize {
        self.tables.values().map(Vec::len).sum()
    }
}

/// Stored snapshot row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub id: Uuid,
    pub database_id: Uuid,
    pub snapshot_data: SnapshotData,
    pub snapshot_type: SnapshotType,
    pub description: Option<String>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub size_bytes: i64,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotOptions {
    #[serde(default, rename = "type")]
    pub snapshot_type: SnapshotType,
    pub description: Option<String>,
    pub created_by: Option<String>,
}

/// Paging and filters for change history
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryQuery {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
    pub change_type: Option<ChangeType>,
    pub table_name: Option<String>,
}

/// Paging and filters for snapshots
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotQuery {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
    #[serde(rename = "type")]
    pub snapshot_type: Option<SnapshotType>,
}

/// Clamp limit/offset into a usable page
pub fn page(limit: Option<i64>, offset: Option<i64>) -> (i64, i64) {
    let limit = limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
    let offset = offset.unwrap_or(0).max(0);
    (limit, offset)
}

/// Result of a restore request
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoreReport {
    pub snapshot_id: Uuid,
    pub backup_snapshot_id: Uuid,
    pub change_record_id: Uuid,
    /// What would change to bring the current state back to the snapshot
    pub plan: SnapshotDiff,
    /// Always false: restores are advisory and rewrite nothing
    pub applied: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_change_type_round_trips_through_strings() {
        assert_eq!(ChangeType::TableCreate.as_str(), "table_create");
        assert_eq!("column_modify".parse::<ChangeType>().unwrap(), ChangeType::ColumnModify);
        assert_eq!(
            serde_json::to_string(&ChangeType::DataDelete).unwrap(),
            "\"data_delete\""
        );
        assert!("table_explode".parse::<ChangeType>().is_err());
    }

    #[test]
    fn test_page_clamps() {
        assert_eq!(page(None, None), (DEFAULT_PAGE_SIZE, 0));
        assert_eq!(page(Some(0), Some(-4)), (1, 0));
        assert_eq!(page(Some(10_000), Some(20)), (MAX_PAGE_SIZE, 20));
    }

    #[test]
    fn test_checksum_ignores_row_data_and_schema_order() {
        let db = Uuid::new_v4();
        let a = LogicalSchema::new(db, "a".into(), "A".into(), 1);
        let b = LogicalSchema::new(db, "b".into(), "B".into(), 0);
        let col = LogicalColumn::from_spec(a.id, &crate::models::ColumnSpec::new("x", "text"), 0);

        let one = SnapshotData::new(vec![a.clone(), b.clone()], vec![col.clone()], BTreeMap::new());
        let mut rows = BTreeMap::new();
        rows.insert("a".to_string(), vec![serde_json::json!({"x": "1"})]);
        let two = SnapshotData::new(vec![b, a], vec![col], rows);

        assert_eq!(one.checksum, two.checksum);
        assert_eq!(two.row_count(), 1);
    }
}
