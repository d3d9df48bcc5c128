//! Snapshot diff
//!
//! Compares the logical content of two snapshot documents table by table
//! and column by column.

use crate::history::models::SnapshotData;
use crate::schema::models::{LogicalColumn, LogicalSchema};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiffKind {
    Added,
    Removed,
    Modified,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiffObject {
    Table,
    Column,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffItem {
    pub kind: DiffKind,
    pub object: DiffObject,
    /// `table` or `table.column`
    pub path: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub before: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub after: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffSummary {
    pub tables_added: usize,
    pub tables_removed: usize,
    pub columns_added: usize,
    pub columns_removed: usize,
    pub columns_modified: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotDiff {
    pub from_checksum: String,
    pub to_checksum: String,
    pub items: Vec<DiffItem>,
    pub summary: DiffSummary,
}

impl SnapshotDiff {
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

struct TableView<'a> {
    schema: &'a LogicalSchema,
    columns: BTreeMap<&'a str, &'a LogicalColumn>,
}

fn index(data: &SnapshotData) -> BTreeMap<&str, TableView<'_>> {
    data.schemas
        .iter()
        .map(|schema| {
            let columns = data
                .columns
                .iter()
                .filter(|c| c.schema_id == schema.id)
                .map(|c| (c.name.as_str(), c))
                .collect();
            (schema.table_name.as_str(), TableView { schema, columns })
        })
        .collect()
}

fn json<T: Serialize>(value: &T) -> Option<serde_json::Value> {
    serde_json::to_value(value).ok()
}

/// Diff two snapshot documents: what changes going from `from` to `to`
pub fn diff(from: &SnapshotData, to: &SnapshotData) -> SnapshotDiff {
    let from_tables = index(from);
    let to_tables = index(to);
    let mut items = Vec::new();
    let mut summary = DiffSummary::default();

    let from_keys: BTreeSet<&str> = from_tables.keys().copied().collect();
    let to_keys: BTreeSet<&str> = to_tables.keys().copied().collect();

    for table in to_keys.difference(&from_keys) {
        let view = &to_tables[table];
        summary.tables_added += 1;
        items.push(DiffItem {
            kind: DiffKind::Added,
            object: DiffObject::Table,
            path: table.to_string(),
            description: format!("Table {} added with {} columns", table, view.columns.len()),
            before: None,
            after: json(view.schema),
        });
    }

    for table in from_keys.difference(&to_keys) {
        let view = &from_tables[table];
        summary.tables_removed += 1;
        items.push(DiffItem {
            kind: DiffKind::Removed,
            object: DiffObject::Table,
            path: table.to_string(),
            description: format!("Table {} removed ({} columns)", table, view.columns.len()),
            before: json(view.schema),
            after: None,
        });
    }

    for table in from_keys.intersection(&to_keys) {
        diff_columns(table, &from_tables[table], &to_tables[table], &mut items, &mut summary);
    }

    SnapshotDiff {
        from_checksum: from.checksum.clone(),
        to_checksum: to.checksum.clone(),
        items,
        summary,
    }
}

fn diff_columns(
    table: &str,
    from: &TableView<'_>,
    to: &TableView<'_>,
    items: &mut Vec<DiffItem>,
    summary: &mut DiffSummary,
) {
    for (name, col) in &to.columns {
        if !from.columns.contains_key(name) {
            summary.columns_added += 1;
            items.push(DiffItem {
                kind: DiffKind::Added,
                object: DiffObject::Column,
                path: format!("{}.{}", table, name),
                description: format!("Column {} added (type: {})", name, col.data_type),
                before: None,
                after: json(*col),
            });
        }
    }

    for (name, col) in &from.columns {
        match to.columns.get(name) {
            None => {
                summary.columns_removed += 1;
                items.push(DiffItem {
                    kind: DiffKind::Removed,
                    object: DiffObject::Column,
                    path: format!("{}.{}", table, name),
                    description: format!("Column {} removed (type: {})", name, col.data_type),
                    before: json(*col),
                    after: None,
                });
            }
            Some(other) => {
                let modifications = compare_columns(col, other);
                if !modifications.is_empty() {
                    summary.columns_modified += 1;
                    items.push(DiffItem {
                        kind: DiffKind::Modified,
                        object: DiffObject::Column,
                        path: format!("{}.{}", table, name),
                        description: format!("Column {} modified: {}", name, modifications.join(", ")),
                        before: json(*col),
                        after: json(*other),
                    });
                }
            }
        }
    }
}

fn compare_columns(from: &LogicalColumn, to: &LogicalColumn) -> Vec<String> {
    let mut modifications = Vec::new();
    if from.data_type != to.data_type {
        modifications.push(format!("type: {} → {}", from.data_type, to.data_type));
    }
    if from.nullable != to.nullable {
        modifications.push(if to.nullable { "now nullable" } else { "now NOT NULL" }.to_string());
    }
    if from.is_primary_key != to.is_primary_key {
        modifications.push(
            if to.is_primary_key { "added to PRIMARY KEY" } else { "removed from PRIMARY KEY" }
                .to_string(),
        );
    }
    if from.is_unique != to.is_unique {
        modifications.push(if to.is_unique { "now UNIQUE" } else { "no longer UNIQUE" }.to_string());
    }
    if from.default_value != to.default_value {
        modifications.push(format!("default: {:?} → {:?}", from.default_value, to.default_value));
    }
    if from.order != to.order {
        modifications.push(format!("position: {} → {}", from.order, to.order));
    }
    modifications
}
