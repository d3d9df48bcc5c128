//! DDL generation
//!
//! Identifier/type normalization, a typed statement representation, the
//! PostgreSQL renderer and the table creator that executes it.

pub mod ast;
pub mod creator;
pub mod normalize;
pub mod render;

pub use creator::{CreateTableOptions, DdlOutcome, TableCreator};
pub use normalize::{map_type, sanitize_identifier};
pub use render::{Dialect, PostgresDialect};
