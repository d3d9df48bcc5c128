//! Change history module
//!
//! Append-only change log, snapshots and the advisory restore path.

pub mod diff;
pub mod manager;
pub mod models;
pub mod store;

pub use diff::SnapshotDiff;
pub use manager::{HistoryManager, DEFAULT_RETENTION_DAYS};
pub use models::{
    ChangeRecord, ChangeType, HistoryQuery, RecordOptions, RestoreReport, Snapshot,
    SnapshotOptions, SnapshotQuery, SnapshotType,
};
pub use store::{HistoryStore, PgHistoryStore};
