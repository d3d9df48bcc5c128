//! Change-notification feed
//!
//! Subscribers register for a database id and a set of tables and receive
//! every insert/update/delete published for them. Each subscriber has its
//! own bounded channel; when it is full further events are dropped, which
//! is harmless for consumers that reload everything on any event.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::{mpsc, RwLock};
use tracing::debug;
use uuid::Uuid;

const SUBSCRIBER_BUFFER: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FeedEventType {
    Insert,
    Update,
    Delete,
}

/// A row-level change on a subscribed table
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedEvent {
    pub event_type: FeedEventType,
    pub table: String,
    pub database_id: Uuid,
    pub row: serde_json::Value,
}

struct Subscriber {
    database_id: Uuid,
    tables: Vec<String>,
    sender: mpsc::Sender<FeedEvent>,
}

impl Subscriber {
    fn wants(&self, event: &FeedEvent) -> bool {
        self.database_id == event.database_id && self.tables.iter().any(|t| *t == event.table)
    }
}

/// Receiving end of a subscription
pub struct Subscription {
    pub id: Uuid,
    receiver: mpsc::Receiver<FeedEvent>,
}

impl Subscription {
    /// Next event, or `None` once unsubscribed
    pub async fn recv(&mut self) -> Option<FeedEvent> {
        self.receiver.recv().await
    }

    /// Drain everything already queued without waiting
    pub fn drain(&mut self) -> usize {
        let mut count = 0;
        while self.receiver.try_recv().is_ok() {
            count += 1;
        }
        count
    }
}

/// In-process fan-out hub for metadata change notifications
#[derive(Default)]
pub struct ChangeFeed {
    subscribers: RwLock<HashMap<Uuid, Subscriber>>,
}

impl ChangeFeed {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn subscribe(&self, database_id: Uuid, tables: &[&str]) -> Subscription {
        let (sender, receiver) = mpsc::channel(SUBSCRIBER_BUFFER);
        let id = Uuid::new_v4();

        let mut subscribers = self.subscribers.write().await;
        subscribers.insert(
            id,
            Subscriber {
                database_id,
                tables: tables.iter().map(|t| t.to_string()).collect(),
                sender,
            },
        );
        debug!("Feed subscription {} for database {} on {:?}", id, database_id, tables);

        Subscription { id, receiver }
    }

    /// Remove a subscription; its receiver sees the channel close
    pub async fn unsubscribe(&self, subscription_id: Uuid) -> bool {
        let mut subscribers = self.subscribers.write().await;
        let removed = subscribers.remove(&subscription_id).is_some();
        if removed {
            debug!("Feed subscription {} removed", subscription_id);
        }
        removed
    }

    /// Deliver an event to every matching subscriber, returns the delivery count
    pub async fn publish(&self, event: FeedEvent) -> usize {
        let subscribers = self.subscribers.read().await;
        let mut delivered = 0;
        for subscriber in subscribers.values().filter(|s| s.wants(&event)) {
            if subscriber.sender.try_send(event.clone()).is_ok() {
                delivered += 1;
            }
        }
        delivered
    }

    pub async fn subscriber_count(&self) -> usize {
        self.subscribers.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(database_id: Uuid, table: &str) -> FeedEvent {
        FeedEvent {
            event_type: FeedEventType::Insert,
            table: table.to_string(),
            database_id,
            row: json!({"id": 1}),
        }
    }

    #[tokio::test]
    async fn test_events_are_filtered_by_database_and_table() {
        let feed = ChangeFeed::new();
        let db = Uuid::new_v4();
        let mut sub = feed.subscribe(db, &["database_schemas"]).await;

        assert_eq!(feed.publish(event(db, "database_schemas")).await, 1);
        assert_eq!(feed.publish(event(db, "other_table")).await, 0);
        assert_eq!(feed.publish(event(Uuid::new_v4(), "database_schemas")).await, 0);

        let received = sub.recv().await.unwrap();
        assert_eq!(received.table, "database_schemas");
        assert_eq!(sub.drain(), 0);
    }

    #[tokio::test]
    async fn test_unsubscribe_closes_channel() {
        let feed = ChangeFeed::new();
        let db = Uuid::new_v4();
        let mut sub = feed.subscribe(db, &["schema_columns"]).await;

        assert!(feed.unsubscribe(sub.id).await);
        assert!(!feed.unsubscribe(sub.id).await);
        assert_eq!(feed.subscriber_count().await, 0);
        assert!(sub.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_full_buffer_drops_instead_of_blocking() {
        let feed = ChangeFeed::new();
        let db = Uuid::new_v4();
        let mut sub = feed.subscribe(db, &["t"]).await;

        for _ in 0..(SUBSCRIBER_BUFFER + 5) {
            feed.publish(event(db, "t")).await;
        }
        assert_eq!(sub.drain(), SUBSCRIBER_BUFFER);
    }
}
