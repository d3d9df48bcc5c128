//! Table creator
//!
//! Turns logical column definitions into DDL, executes it through the
//! [`SqlExecutor`] boundary and reports the outcome as a value. Nothing in
//! here returns `Err`; failures come back as `DdlOutcome { success: false }`.

use super::ast::{ColumnDef, CreateTable, DefaultExpr, ForeignKeyClause, Statement};
use super::normalize::{map_type, sanitize_identifier};
use super::render::{constraint_name, Dialect, PostgresDialect};
use crate::db::SqlExecutor;
use crate::error::AppError;
use crate::models::{ColumnSpec, ReferentialAction};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, warn};

pub const SURROGATE_KEY: &str = "id";
pub const CREATED_AT: &str = "created_at";
pub const UPDATED_AT: &str = "updated_at";

/// Options for CREATE TABLE
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CreateTableOptions {
    pub if_not_exists: bool,
    /// Register the table with the realtime publication
    pub enable_change_feed: bool,
    /// Turn off row-level security on the new table
    pub disable_access_control: bool,
}

impl Default for CreateTableOptions {
    fn default() -> Self {
        Self {
            if_not_exists: true,
            enable_change_feed: true,
            disable_access_control: true,
        }
    }
}

/// Outcome of a structural change
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DdlOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub physical_name: Option<String>,
    /// Effective (sanitized, synthesized) columns for create/add operations
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub columns: Vec<ColumnSpec>,
    /// Rendered batch, empty when nothing was executed
    #[serde(skip_serializing_if = "String::is_empty")]
    pub sql: String,
}

impl DdlOutcome {
    fn succeeded(physical_name: String, columns: Vec<ColumnSpec>, sql: String) -> Self {
        Self {
            success: true,
            error: None,
            physical_name: Some(physical_name),
            columns,
            sql,
        }
    }

    fn failed(error: impl Into<String>, sql: String) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            physical_name: None,
            columns: Vec::new(),
            sql,
        }
    }
}

/// Planned CREATE TABLE, not yet executed
#[derive(Debug, Clone)]
pub struct TablePlan {
    pub physical_name: String,
    pub columns: Vec<ColumnSpec>,
    pub statements: Vec<Statement>,
}

/// Builds and executes DDL for dynamic tables
pub struct TableCreator {
    executor: Arc<dyn SqlExecutor>,
    dialect: Arc<dyn Dialect>,
}

impl TableCreator {
    pub fn new(executor: Arc<dyn SqlExecutor>) -> Self {
        Self::with_dialect(executor, Arc::new(PostgresDialect::new()))
    }

    pub fn with_dialect(executor: Arc<dyn SqlExecutor>, dialect: Arc<dyn Dialect>) -> Self {
        Self { executor, dialect }
    }

    /// Plan a CREATE TABLE without touching the store
    pub fn plan_create_table(
        &self,
        name: &str,
        columns: &[ColumnSpec],
        options: CreateTableOptions,
    ) -> Result<TablePlan, String> {
        let table = sanitize_identifier(name);

        let mut effective: Vec<ColumnSpec> = columns.iter().map(sanitize_column).collect();

        let mut seen = HashSet::new();
        for col in &effective {
            if !seen.insert(col.name.clone()) {
                return Err(format!(
                    "Duplicate column name '{}' after sanitization",
                    col.name
                ));
            }
        }

        let primary_count = effective.iter().filter(|c| c.is_primary_key).count();
        if primary_count > 1 {
            return Err(format!(
                "Only one primary key column is allowed, got {}",
                primary_count
            ));
        }

        let has_created_at = effective.iter().any(|c| c.name == CREATED_AT);
        let has_updated_at = effective.iter().any(|c| c.name == UPDATED_AT);

        if !has_created_at {
            effective.push(audit_column(CREATED_AT));
        }
        if !has_updated_at {
            effective.push(audit_column(UPDATED_AT));
        }

        if primary_count == 0 {
            // A user column already called `id` becomes the key instead of colliding
            match effective.iter_mut().find(|c| c.name == SURROGATE_KEY) {
                Some(existing) => {
                    existing.is_primary_key = true;
                    existing.nullable = false;
                }
                None => effective.insert(0, surrogate_key()),
            }
        }

        let mut foreign_keys = Vec::new();
        let mut defs = Vec::with_capacity(effective.len());
        for col in &effective {
            defs.push(column_def(col));
            if let Some(fk) = foreign_key(&table, col) {
                foreign_keys.push(fk);
            }
        }

        let mut statements = vec![Statement::CreateTable(CreateTable {
            name: table.clone(),
            if_not_exists: options.if_not_exists,
            columns: defs,
            foreign_keys,
        })];
        if !has_updated_at {
            statements.push(Statement::CreateUpdatedAtTrigger { table: table.clone() });
        }
        if options.enable_change_feed {
            statements.push(Statement::EnableChangeFeed { table: table.clone() });
        }
        if options.disable_access_control {
            statements.push(Statement::DisableRowSecurity { table: table.clone() });
        }

        Ok(TablePlan {
            physical_name: table,
            columns: effective,
            statements,
        })
    }

    /// Create a physical table from logical column definitions
    pub async fn create_table(
        &self,
        name: &str,
        columns: &[ColumnSpec],
        options: CreateTableOptions,
    ) -> DdlOutcome {
        let plan = match self.plan_create_table(name, columns, options) {
            Ok(plan) => plan,
            Err(e) => {
                warn!("Rejected table definition '{}': {}", name, e);
                return DdlOutcome::failed(e, String::new());
            }
        };

        let sql = self.dialect.render_batch(&plan.statements);
        match self.run(&sql).await {
            Ok(()) => {
                info!(
                    "Created table '{}' with {} columns ({} statements)",
                    plan.physical_name,
                    plan.columns.len(),
                    plan.statements.len()
                );
                DdlOutcome::succeeded(plan.physical_name, plan.columns, sql)
            }
            Err(e) => {
                warn!("Failed to create table '{}': {}", plan.physical_name, e);
                DdlOutcome::failed(e, sql)
            }
        }
    }

    /// Add a column to an existing table
    pub async fn add_column(&self, table: &str, column: &ColumnSpec) -> DdlOutcome {
        let table = sanitize_identifier(table);
        let column = sanitize_column(column);

        let statement = Statement::AddColumn {
            table: table.clone(),
            column: column_def(&column),
            foreign_key: foreign_key(&table, &column),
        };
        let sql = self.dialect.render_batch(&[statement]);

        match self.run(&sql).await {
            Ok(()) => {
                info!("Added column '{}' to table '{}'", column.name, table);
                DdlOutcome::succeeded(table, vec![column], sql)
            }
            Err(e) => {
                warn!("Failed to add column '{}' to '{}': {}", column.name, table, e);
                DdlOutcome::failed(e, sql)
            }
        }
    }

    /// Drop a column if it exists
    pub async fn drop_column(&self, table: &str, column_name: &str) -> DdlOutcome {
        let table = sanitize_identifier(table);
        let column = sanitize_identifier(column_name);

        let sql = self.dialect.render_batch(&[Statement::DropColumn {
            table: table.clone(),
            column: column.clone(),
            if_exists: true,
        }]);

        match self.run(&sql).await {
            Ok(()) => {
                info!("Dropped column '{}' from table '{}'", column, table);
                DdlOutcome::succeeded(table, Vec::new(), sql)
            }
            Err(e) => {
                warn!("Failed to drop column '{}' from '{}': {}", column, table, e);
                DdlOutcome::failed(e, sql)
            }
        }
    }

    /// Drop a table and everything depending on it
    pub async fn drop_table(&self, table: &str) -> DdlOutcome {
        let table = sanitize_identifier(table);

        let sql = self.dialect.render_batch(&[Statement::DropTable {
            table: table.clone(),
            if_exists: true,
            cascade: true,
        }]);

        match self.run(&sql).await {
            Ok(()) => {
                info!("Dropped table '{}'", table);
                DdlOutcome::succeeded(table, Vec::new(), sql)
            }
            Err(e) => {
                warn!("Failed to drop table '{}': {}", table, e);
                DdlOutcome::failed(e, sql)
            }
        }
    }

    async fn run(&self, sql: &str) -> Result<(), String> {
        match self.executor.execute_batch(sql).await.into_result() {
            Ok(_) => Ok(()),
            Err(AppError::Execution(message)) => Err(message),
            Err(other) => Err(other.to_string()),
        }
    }
}

fn sanitize_column(spec: &ColumnSpec) -> ColumnSpec {
    let mut col = spec.clone();
    col.name = sanitize_identifier(&spec.name);
    if col.is_primary_key {
        col.nullable = false;
    }
    if let Some(reference) = col.references.as_mut() {
        reference.table = sanitize_identifier(&reference.table);
        reference.column = sanitize_identifier(&reference.column);
    }
    col
}

fn column_def(col: &ColumnSpec) -> ColumnDef {
    ColumnDef {
        name: col.name.clone(),
        data_type: map_type(&col.data_type, col.max_length),
        not_null: !col.nullable && !col.is_primary_key,
        unique: col.is_unique && !col.is_primary_key,
        primary_key: col.is_primary_key,
        default: col.default_value.as_deref().map(DefaultExpr::from_user),
    }
}

fn foreign_key(table: &str, col: &ColumnSpec) -> Option<ForeignKeyClause> {
    let reference = col.references.as_ref()?;
    Some(ForeignKeyClause {
        name: constraint_name("fk", &[table, &col.name]),
        column: col.name.clone(),
        ref_table: reference.table.clone(),
        ref_column: reference.column.clone(),
        on_delete: parse_action(reference.on_delete.as_deref()),
        on_update: parse_action(reference.on_update.as_deref()),
    })
}

fn parse_action(raw: Option<&str>) -> Option<ReferentialAction> {
    let raw = raw?;
    match raw.parse() {
        Ok(action) => Some(action),
        Err(e) => {
            warn!("Ignoring referential action: {}", e);
            None
        }
    }
}

fn surrogate_key() -> ColumnSpec {
    ColumnSpec::new(SURROGATE_KEY, "text")
        .primary_key()
        .with_default("gen_random_uuid()::text")
}

fn audit_column(name: &str) -> ColumnSpec {
    ColumnSpec::new(name, "timestamp").not_null().with_default("now()")
}
