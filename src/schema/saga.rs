//! Compensating actions for physical-then-logical changes
//!
//! Physical DDL and the logical metadata write are separate round trips.
//! When the logical write fails after the physical step succeeded, the
//! physical step is undone here. Undo attempts that fail stay queued until
//! [`CompensationLog::retry`] succeeds.

use crate::ddl::TableCreator;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

/// Physical undo step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Compensation {
    DropTable { table: String },
    DropColumn { table: String, column: String },
}

impl Compensation {
    async fn apply(&self, creator: &TableCreator) -> Result<(), String> {
        let outcome = match self {
            Compensation::DropTable { table } => creator.drop_table(table).await,
            Compensation::DropColumn { table, column } => creator.drop_column(table, column).await,
        };
        if outcome.success {
            Ok(())
        } else {
            Err(outcome.error.unwrap_or_else(|| "unknown error".to_string()))
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingCompensation {
    pub id: Uuid,
    pub action: Compensation,
    /// Why the logical write failed
    pub reason: String,
    pub enqueued_at: DateTime<Utc>,
    pub attempts: u32,
    pub last_error: Option<String>,
}

/// Table of compensations that still need to run
#[derive(Default)]
pub struct CompensationLog {
    pending: RwLock<Vec<PendingCompensation>>,
}

impl CompensationLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue and immediately attempt a compensation.
    ///
    /// Returns `true` if it was applied; otherwise it stays pending.
    pub async fn compensate(
        &self,
        creator: &TableCreator,
        action: Compensation,
        reason: impl Into<String>,
    ) -> bool {
        let mut entry = PendingCompensation {
            id: Uuid::new_v4(),
            action,
            reason: reason.into(),
            enqueued_at: Utc::now(),
            attempts: 0,
            last_error: None,
        };
        warn!("Compensating {:?}: {}", entry.action, entry.reason);

        if Self::attempt(creator, &mut entry).await {
            return true;
        }
        self.pending.write().await.push(entry);
        false
    }

    /// Replay every pending compensation, returns how many were applied
    pub async fn retry(&self, creator: &TableCreator) -> usize {
        let mut pending = self.pending.write().await;
        let mut applied = 0;
        let mut remaining = Vec::with_capacity(pending.len());

        for mut entry in pending.drain(..) {
            if Self::attempt(creator, &mut entry).await {
                applied += 1;
            } else {
                remaining.push(entry);
            }
        }
        *pending = remaining;
        applied
    }

    pub async fn pending(&self) -> Vec<PendingCompensation> {
        self.pending.read().await.clone()
    }

    async fn attempt(creator: &TableCreator, entry: &mut PendingCompensation) -> bool {
        entry.attempts += 1;
        match entry.action.apply(creator).await {
            Ok(()) => {
                info!("Compensation {:?} applied after {} attempt(s)", entry.action, entry.attempts);
                true
            }
            Err(e) => {
                warn!("Compensation {:?} failed: {}", entry.action, e);
                entry.last_error = Some(e);
                false
            }
        }
    }
}
