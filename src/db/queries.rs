//! SQL query constants
//!
//! Row CRUD for the engine's metadata tables. `order` and `references` are
//! reserved words and always appear quoted.

/// Metadata tables owned by the engine
pub const BOOTSTRAP_METADATA: &str = r#"
    CREATE TABLE IF NOT EXISTS database_schemas (
        id UUID PRIMARY KEY,
        database_id UUID NOT NULL,
        table_name VARCHAR(63) NOT NULL,
        display_name TEXT NOT NULL,
        column_count INTEGER NOT NULL DEFAULT 0,
        record_count BIGINT NOT NULL DEFAULT 0,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
    );

    CREATE TABLE IF NOT EXISTS schema_columns (
        id UUID PRIMARY KEY,
        schema_id UUID NOT NULL REFERENCES database_schemas(id) ON DELETE CASCADE,
        name VARCHAR(63) NOT NULL,
        type TEXT NOT NULL,
        nullable BOOLEAN NOT NULL DEFAULT true,
        is_primary_key BOOLEAN NOT NULL DEFAULT false,
        is_unique BOOLEAN NOT NULL DEFAULT false,
        default_value TEXT,
        "order" INTEGER NOT NULL,
        max_length INTEGER,
        "references" JSONB,
        comment TEXT,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
    );

    CREATE TABLE IF NOT EXISTS database_changes (
        id UUID PRIMARY KEY,
        database_id UUID NOT NULL,
        change_type VARCHAR(32) NOT NULL,
        table_name TEXT,
        record_id TEXT,
        changes JSONB NOT NULL,
        previous_values JSONB,
        batch_id UUID NOT NULL,
        created_by TEXT NOT NULL,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now()
    );

    CREATE TABLE IF NOT EXISTS database_snapshots (
        id UUID PRIMARY KEY,
        database_id UUID NOT NULL,
        snapshot_data JSONB NOT NULL,
        snapshot_type VARCHAR(16) NOT NULL CHECK (snapshot_type IN ('manual', 'auto', 'checkpoint')),
        description TEXT,
        created_by TEXT NOT NULL,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        size_bytes BIGINT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_database_schemas_database_id ON database_schemas(database_id);
    CREATE INDEX IF NOT EXISTS idx_schema_columns_schema_id ON schema_columns(schema_id);
    CREATE INDEX IF NOT EXISTS idx_database_changes_database_id ON database_changes(database_id, created_at DESC);
    CREATE INDEX IF NOT EXISTS idx_database_snapshots_database_id ON database_snapshots(database_id, created_at DESC);
"#;

// ---------------------------------------------------------------------------
// database_schemas / schema_columns
// ---------------------------------------------------------------------------

pub const INSERT_SCHEMA: &str = r#"
    INSERT INTO database_schemas
        (id, database_id, table_name, display_name, column_count, record_count, created_at, updated_at)
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
"#;

pub const LIST_SCHEMAS: &str = r#"
    SELECT id, database_id, table_name, display_name, column_count, record_count, created_at, updated_at
    FROM database_schemas
    WHERE database_id = $1
    ORDER BY created_at, table_name
"#;

pub const GET_SCHEMA: &str = r#"
    SELECT id, database_id, table_name, display_name, column_count, record_count, created_at, updated_at
    FROM database_schemas
    WHERE id = $1
"#;

pub const UPDATE_SCHEMA_COLUMN_COUNT: &str = r#"
    UPDATE database_schemas SET column_count = $2, updated_at = now() WHERE id = $1
"#;

pub const DELETE_SCHEMA: &str = "DELETE FROM database_schemas WHERE id = $1";

pub const INSERT_COLUMN: &str = r#"
    INSERT INTO schema_columns
        (id, schema_id, name, type, nullable, is_primary_key, is_unique, default_value, "order", max_length, "references", comment)
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
"#;

pub const LIST_COLUMNS: &str = r#"
    SELECT id, schema_id, name, type, nullable, is_primary_key, is_unique, default_value, "order", max_length, "references", comment
    FROM schema_columns
    WHERE schema_id = $1
    ORDER BY "order"
"#;

pub const LIST_COLUMNS_FOR_DATABASE: &str = r#"
    SELECT c.id, c.schema_id, c.name, c.type, c.nullable, c.is_primary_key, c.is_unique, c.default_value,
           c."order", c.max_length, c."references", c.comment
    FROM schema_columns c
    JOIN database_schemas s ON s.id = c.schema_id
    WHERE s.database_id = $1
    ORDER BY c.schema_id, c."order"
"#;

pub const GET_COLUMN: &str = r#"
    SELECT id, schema_id, name, type, nullable, is_primary_key, is_unique, default_value, "order", max_length, "references", comment
    FROM schema_columns
    WHERE id = $1
"#;

pub const UPDATE_COLUMN: &str = r#"
    UPDATE schema_columns
    SET name = $2, type = $3, nullable = $4, is_primary_key = $5, is_unique = $6,
        default_value = $7, max_length = $8, "references" = $9, comment = $10, updated_at = now()
    WHERE id = $1
"#;

pub const DELETE_COLUMN: &str = "DELETE FROM schema_columns WHERE id = $1";

// ---------------------------------------------------------------------------
// database_changes / database_snapshots
// ---------------------------------------------------------------------------

pub const INSERT_CHANGE: &str = r#"
    INSERT INTO database_changes
        (id, database_id, change_type, table_name, record_id, changes, previous_values, batch_id, created_by, created_at)
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
"#;

/// Optional filters are passed as NULL
pub const LIST_CHANGES: &str = r#"
    SELECT id, database_id, change_type, table_name, record_id, changes, previous_values, batch_id, created_by, created_at
    FROM database_changes
    WHERE database_id = $1
        AND ($2::text IS NULL OR change_type = $2)
        AND ($3::text IS NULL OR table_name = $3)
    ORDER BY created_at DESC
    LIMIT $4 OFFSET $5
"#;

pub const INSERT_SNAPSHOT: &str = r#"
    INSERT INTO database_snapshots
        (id, database_id, snapshot_data, snapshot_type, description, created_by, created_at, size_bytes)
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
"#;

pub const LIST_SNAPSHOTS: &str = r#"
    SELECT id, database_id, snapshot_data, snapshot_type, description, created_by, created_at, size_bytes
    FROM database_snapshots
    WHERE database_id = $1
        AND ($2::text IS NULL OR snapshot_type = $2)
    ORDER BY created_at DESC
    LIMIT $3 OFFSET $4
"#;

pub const GET_SNAPSHOT: &str = r#"
    SELECT id, database_id, snapshot_data, snapshot_type, description, created_by, created_at, size_bytes
    FROM database_snapshots
    WHERE id = $1
"#;

pub const DELETE_SNAPSHOTS_BEFORE: &str = r#"
    DELETE FROM database_snapshots
    WHERE database_id = $1 AND snapshot_type = $2 AND created_at < $3
"#;
