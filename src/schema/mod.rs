//! Schema registry module
//!
//! Logical metadata for dynamic tables, kept in step with the physical
//! structure:
//! - Logical schema/column records and their store
//! - Change-notification feed and resync
//! - Compensation for half-applied changes

pub mod feed;
pub mod models;
pub mod registry;
pub mod saga;
pub mod source;
pub mod store;

pub use feed::ChangeFeed;
pub use models::{ColumnUpdate, LogicalColumn, LogicalSchema, TableDefinition};
pub use registry::{SchemaRegistry, SyncHandle};
pub use source::{ReloadSource, SchemaSource, SchemaState};
pub use store::{PgSchemaStore, SchemaStore};
