//! Logical metadata records
//!
//! These mirror the `database_schemas` and `schema_columns` rows and are
//! independent of what physically exists in the store.

use crate::ddl::sanitize_identifier;
use crate::models::{ColumnReference, ColumnSpec};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One tracked physical table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogicalSchema {
    pub id: Uuid,
    pub database_id: Uuid,
    /// Sanitized physical table name
    pub table_name: String,
    /// Name as the operator typed it
    pub display_name: String,
    pub column_count: i32,
    pub record_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl LogicalSchema {
    pub fn new(database_id: Uuid, table_name: String, display_name: String, column_count: usize) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            database_id,
            table_name,
            display_name,
            column_count: column_count as i32,
            record_count: 0,
            created_at: now,
            updated_at: now,
        }
    }
}

/// One column of a tracked table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogicalColumn {
    pub id: Uuid,
    pub schema_id: Uuid,
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: String,
    pub nullable: bool,
    pub is_primary_key: bool,
    pub is_unique: bool,
    pub default_value: Option<String>,
    /// Explicit position; never inferred from insertion order
    pub order: i32,
    pub max_length: Option<i32>,
    pub references: Option<ColumnReference>,
    pub comment: Option<String>,
}

impl LogicalColumn {
    pub fn from_spec(schema_id: Uuid, spec: &ColumnSpec, order: i32) -> Self {
        Self {
            id: Uuid::new_v4(),
            schema_id,
            name: spec.name.clone(),
            data_type: spec.data_type.clone(),
            nullable: spec.nullable,
            is_primary_key: spec.is_primary_key,
            is_unique: spec.is_unique,
            default_value: spec.default_value.clone(),
            order,
            max_length: spec.max_length.map(|n| n as i32),
            references: spec.references.clone(),
            comment: spec.comment.clone(),
        }
    }
}

/// Partial update of a logical column. Absent fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnUpdate {
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub data_type: Option<String>,
    pub nullable: Option<bool>,
    pub is_primary_key: Option<bool>,
    pub is_unique: Option<bool>,
    pub default_value: Option<String>,
    pub max_length: Option<i32>,
    pub references: Option<ColumnReference>,
    pub comment: Option<String>,
}

impl ColumnUpdate {
    pub fn is_empty(&self) -> bool {
        *self == ColumnUpdate::default()
    }

    /// Apply onto a column, returning the updated copy
    pub fn apply(&self, column: &LogicalColumn) -> LogicalColumn {
        let mut updated = column.clone();
        if let Some(name) = &self.name {
            updated.name = sanitize_identifier(name);
        }
        if let Some(data_type) = &self.data_type {
            updated.data_type = data_type.clone();
        }
        if let Some(nullable) = self.nullable {
            updated.nullable = nullable;
        }
        if let Some(pk) = self.is_primary_key {
            updated.is_primary_key = pk;
        }
        if let Some(unique) = self.is_unique {
            updated.is_unique = unique;
        }
        if let Some(default) = &self.default_value {
            updated.default_value = Some(default.clone());
        }
        if let Some(max_length) = self.max_length {
            updated.max_length = Some(max_length);
        }
        if let Some(references) = &self.references {
            updated.references = Some(references.clone());
        }
        if let Some(comment) = &self.comment {
            updated.comment = Some(comment.clone());
        }
        updated
    }
}

/// A schema together with its ordered columns
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableDefinition {
    pub schema: LogicalSchema,
    pub columns: Vec<LogicalColumn>,
}
