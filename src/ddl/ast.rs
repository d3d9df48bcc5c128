//! Typed DDL statements
//!
//! Structural changes are built as values first and rendered to SQL by a
//! [`Dialect`](super::render::Dialect), so clause ordering and identifier
//! quoting live in one place.

pub use crate::models::ReferentialAction;

/// A single data-definition statement
#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    CreateTable(CreateTable),
    AddColumn {
        table: String,
        column: ColumnDef,
        foreign_key: Option<ForeignKeyClause>,
    },
    DropColumn {
        table: String,
        column: String,
        if_exists: bool,
    },
    DropTable {
        table: String,
        if_exists: bool,
        cascade: bool,
    },
    /// Keeps `updated_at` current on every row update
    CreateUpdatedAtTrigger { table: String },
    /// Register the table with the realtime publication
    EnableChangeFeed { table: String },
    DisableRowSecurity { table: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreateTable {
    pub name: String,
    pub if_not_exists: bool,
    pub columns: Vec<ColumnDef>,
    pub foreign_keys: Vec<ForeignKeyClause>,
}

impl CreateTable {
    pub fn primary_key_count(&self) -> usize {
        self.columns.iter().filter(|c| c.primary_key).count()
    }
}

/// Column clause inside CREATE TABLE / ADD COLUMN
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDef {
    pub name: String,
    pub data_type: String,
    pub not_null: bool,
    pub unique: bool,
    pub primary_key: bool,
    pub default: Option<DefaultExpr>,
}

/// DEFAULT clause value
#[derive(Debug, Clone, PartialEq)]
pub enum DefaultExpr {
    /// Emitted verbatim (function calls, numbers, booleans)
    Expression(String),
    /// Emitted as a quoted string literal
    Literal(String),
}

impl DefaultExpr {
    /// Classify an operator-supplied default value
    pub fn from_user(raw: &str) -> Self {
        let trimmed = raw.trim();
        let lowered = trimmed.to_lowercase();
        let is_expression = matches!(
            lowered.as_str(),
            "now()" | "current_timestamp" | "current_date" | "current_time"
                | "gen_random_uuid()" | "gen_random_uuid()::text" | "true" | "false" | "null"
        ) || is_numeric_literal(trimmed);

        if is_expression {
            DefaultExpr::Expression(trimmed.to_string())
        } else {
            DefaultExpr::Literal(raw.to_string())
        }
    }
}

fn is_numeric_literal(s: &str) -> bool {
    !s.is_empty()
        && s.chars().all(|c| c.is_ascii_digit() || c == '.' || c == '-')
        && s.parse::<f64>().is_ok()
}

/// Named FOREIGN KEY constraint
#[derive(Debug, Clone, PartialEq)]
pub struct ForeignKeyClause {
    pub name: String,
    pub column: String,
    pub ref_table: String,
    pub ref_column: String,
    pub on_delete: Option<ReferentialAction>,
    pub on_update: Option<ReferentialAction>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_classification() {
        assert_eq!(DefaultExpr::from_user("now()"), DefaultExpr::Expression("now()".into()));
        assert_eq!(DefaultExpr::from_user("42"), DefaultExpr::Expression("42".into()));
        assert_eq!(DefaultExpr::from_user("TRUE"), DefaultExpr::Expression("TRUE".into()));
        assert_eq!(DefaultExpr::from_user("pending"), DefaultExpr::Literal("pending".into()));
    }
}
