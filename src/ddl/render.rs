//! DDL rendering
//!
//! Serializes [`Statement`] values to SQL text for a target dialect.

use super::ast::{ColumnDef, CreateTable, DefaultExpr, ForeignKeyClause, Statement};
use super::normalize::MAX_IDENTIFIER_LEN;
use sha2::{Digest, Sha256};

/// Publication used by the hosted backend's realtime feed
pub const DEFAULT_PUBLICATION: &str = "supabase_realtime";

/// Shared trigger function maintaining `updated_at`
pub const UPDATED_AT_FUNCTION: &str = "set_updated_at";

/// SQL dialect able to render typed statements
pub trait Dialect: Send + Sync {
    /// Quote an identifier (table/column name) safely
    fn quote_ident(&self, ident: &str) -> String;

    /// Render a single statement (may expand to several SQL commands)
    fn render(&self, statement: &Statement) -> String;

    /// Render statements as one executable batch
    fn render_batch(&self, statements: &[Statement]) -> String {
        statements
            .iter()
            .map(|s| self.render(s))
            .collect::<Vec<_>>()
            .join(";\n")
            + ";"
    }
}

/// PostgreSQL renderer
#[derive(Debug, Clone)]
pub struct PostgresDialect {
    publication: String,
}

impl PostgresDialect {
    pub fn new() -> Self {
        Self {
            publication: DEFAULT_PUBLICATION.to_string(),
        }
    }

    fn quote_literal(value: &str) -> String {
        format!("'{}'", value.replace('\'', "''"))
    }

    fn column_sql(&self, col: &ColumnDef) -> String {
        let mut def = format!("{} {}", self.quote_ident(&col.name), col.data_type);

        if col.primary_key {
            def.push_str(" PRIMARY KEY");
        }
        if col.not_null {
            def.push_str(" NOT NULL");
        }
        if col.unique {
            def.push_str(" UNIQUE");
        }
        match &col.default {
            Some(DefaultExpr::Expression(expr)) => def.push_str(&format!(" DEFAULT {}", expr)),
            Some(DefaultExpr::Literal(value)) => {
                def.push_str(&format!(" DEFAULT {}", Self::quote_literal(value)))
            }
            None => {}
        }
        def
    }

    fn foreign_key_sql(&self, fk: &ForeignKeyClause) -> String {
        let mut sql = format!(
            "CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ({})",
            self.quote_ident(&fk.name),
            self.quote_ident(&fk.column),
            self.quote_ident(&fk.ref_table),
            self.quote_ident(&fk.ref_column)
        );
        if let Some(action) = fk.on_delete {
            sql.push_str(&format!(" ON DELETE {}", action));
        }
        if let Some(action) = fk.on_update {
            sql.push_str(&format!(" ON UPDATE {}", action));
        }
        sql
    }

    fn create_table_sql(&self, c: &CreateTable) -> String {
        let mut clauses: Vec<String> = c
            .columns
            .iter()
            .map(|col| format!("    {}", self.column_sql(col)))
            .collect();
        clauses.extend(
            c.foreign_keys
                .iter()
                .map(|fk| format!("    {}", self.foreign_key_sql(fk))),
        );

        format!(
            "CREATE TABLE {}{} (\n{}\n)",
            if c.if_not_exists { "IF NOT EXISTS " } else { "" },
            self.quote_ident(&c.name),
            clauses.join(",\n")
        )
    }

    fn updated_at_trigger_sql(&self, table: &str) -> String {
        let trigger = self.quote_ident(&constraint_name("trg", &[table, "updated_at"]));
        let table = self.quote_ident(table);
        [
            format!(
                "CREATE OR REPLACE FUNCTION {}() RETURNS trigger AS $$\nBEGIN\n    NEW.updated_at = now();\n    RETURN NEW;\nEND;\n$$ LANGUAGE plpgsql",
                UPDATED_AT_FUNCTION
            ),
            format!("DROP TRIGGER IF EXISTS {} ON {}", trigger, table),
            format!(
                "CREATE TRIGGER {} BEFORE UPDATE ON {} FOR EACH ROW EXECUTE FUNCTION {}()",
                trigger, table, UPDATED_AT_FUNCTION
            ),
        ]
        .join(";\n")
    }

    fn change_feed_sql(&self, table: &str) -> String {
        // Already-registered tables and a missing publication are both tolerated
        format!(
            "DO $$\nBEGIN\n    ALTER PUBLICATION {} ADD TABLE {};\nEXCEPTION\n    WHEN duplicate_object OR undefined_object THEN NULL;\nEND\n$$",
            self.quote_ident(&self.publication),
            self.quote_ident(table)
        )
    }
}

impl Default for PostgresDialect {
    fn default() -> Self {
        Self::new()
    }
}

impl Dialect for PostgresDialect {
    fn quote_ident(&self, ident: &str) -> String {
        format!("\"{}\"", ident.replace('"', "\"\""))
    }

    fn render(&self, statement: &Statement) -> String {
        match statement {
            Statement::CreateTable(c) => self.create_table_sql(c),
            Statement::AddColumn {
                table,
                column,
                foreign_key,
            } => {
                let mut sql = format!(
                    "ALTER TABLE {} ADD COLUMN {}",
                    self.quote_ident(table),
                    self.column_sql(column)
                );
                if let Some(fk) = foreign_key {
                    sql.push_str(&format!(", ADD {}", self.foreign_key_sql(fk)));
                }
                sql
            }
            Statement::DropColumn {
                table,
                column,
                if_exists,
            } => format!(
                "ALTER TABLE {} DROP COLUMN {}{}",
                self.quote_ident(table),
                if *if_exists { "IF EXISTS " } else { "" },
                self.quote_ident(column)
            ),
            Statement::DropTable {
                table,
                if_exists,
                cascade,
            } => format!(
                "DROP TABLE {}{}{}",
                if *if_exists { "IF EXISTS " } else { "" },
                self.quote_ident(table),
                if *cascade { " CASCADE" } else { "" }
            ),
            Statement::CreateUpdatedAtTrigger { table } => self.updated_at_trigger_sql(table),
            Statement::EnableChangeFeed { table } => self.change_feed_sql(table),
            Statement::DisableRowSecurity { table } => format!(
                "ALTER TABLE {} DISABLE ROW LEVEL SECURITY",
                self.quote_ident(table)
            ),
        }
    }
}

/// Hex digits of the digest kept when a name has to be shortened
const NAME_HASH_LEN: usize = 8;

/// Build `<prefix>_<part>_<part>` capped at the identifier length limit.
///
/// Over-long names are cut and suffixed with a hash of the full name, so
/// distinct inputs sharing a long prefix stay distinct.
pub fn constraint_name(prefix: &str, parts: &[&str]) -> String {
    let mut name = prefix.to_string();
    for part in parts {
        name.push('_');
        name.push_str(part);
    }
    if name.len() <= MAX_IDENTIFIER_LEN {
        return name;
    }

    let digest = format!("{:x}", Sha256::digest(name.as_bytes()));
    let mut cut = MAX_IDENTIFIER_LEN - NAME_HASH_LEN - 1;
    while !name.is_char_boundary(cut) {
        cut -= 1;
    }
    name.truncate(cut);
    let end = name.trim_end_matches('_').len();
    name.truncate(end);
    format!("{}_{}", name, &digest[..NAME_HASH_LEN])
}
