//! Change feed: fan-out of store mutation notifications.
//!
//! Producers (the SQLite store, its file watcher, the Supabase Realtime
//! client) publish [`ChangeEvent`]s into a [`ChangeFeed`]. Consumers subscribe
//! per table and treat every event the same way: something changed, recompute
//! from current state. Delivery is level-triggered, so a subscriber that falls
//! behind is still told once that it missed events.

mod watcher;

pub use watcher::watch_database;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

use crate::store::Table;

/// Buffered events per subscriber before it is considered lagging.
const FEED_CAPACITY: usize = 256;

/// Kind of row mutation, when the producer knows it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
    /// Something changed but the producer cannot tell what
    Unknown,
}

impl ChangeKind {
    /// Parse a Postgres change type (`INSERT`, `UPDATE`, `DELETE`).
    pub fn from_postgres(s: &str) -> Self {
        match s.to_ascii_uppercase().as_str() {
            "INSERT" => ChangeKind::Insert,
            "UPDATE" => ChangeKind::Update,
            "DELETE" => ChangeKind::Delete,
            _ => ChangeKind::Unknown,
        }
    }
}

/// A mutation on one watched table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub table: Table,
    pub kind: ChangeKind,
    pub at: DateTime<Utc>,
}

impl ChangeEvent {
    pub fn new(table: Table, kind: ChangeKind) -> Self {
        Self {
            table,
            kind,
            at: Utc::now(),
        }
    }
}

/// In-process change notification hub.
///
/// Cloning is cheap; all clones share one channel.
#[derive(Clone)]
pub struct ChangeFeed {
    tx: broadcast::Sender<ChangeEvent>,
    active: Arc<AtomicUsize>,
    next_id: Arc<AtomicU64>,
}

impl ChangeFeed {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(FEED_CAPACITY);
        Self {
            tx,
            active: Arc::new(AtomicUsize::new(0)),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Publish an event to every subscriber of its table.
    pub fn publish(&self, event: ChangeEvent) {
        tracing::debug!(table = %event.table, kind = ?event.kind, "change event");
        // No receivers is not an error: nobody is watching yet
        let _ = self.tx.send(event);
    }

    /// Publish an `Unknown` event for each of the given tables.
    pub fn publish_all(&self, tables: &[Table]) {
        for table in tables {
            self.publish(ChangeEvent::new(*table, ChangeKind::Unknown));
        }
    }

    /// Invoke `on_any` for every insert, update or delete on `table`.
    ///
    /// Must be called inside a Tokio runtime. The callback runs on a
    /// background task and should not block.
    pub fn subscribe<F>(&self, table: Table, on_any: F) -> Subscription
    where
        F: Fn(&ChangeEvent) + Send + Sync + 'static,
    {
        let mut rx = self.tx.subscribe();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.active.fetch_add(1, Ordering::SeqCst);

        let task = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) if event.table == table => on_any(&event),
                    Ok(_) => {}
                    Err(RecvError::Lagged(missed)) => {
                        tracing::debug!(%table, missed, "subscriber lagged, coalescing");
                        on_any(&ChangeEvent::new(table, ChangeKind::Unknown));
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });

        tracing::debug!(subscription = id, %table, "subscribed");
        Subscription {
            id,
            table,
            task: Some(task),
            active: Arc::clone(&self.active),
        }
    }

    /// Number of subscriptions not yet released.
    pub fn active_subscriptions(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle for one table subscription.
///
/// [`Subscription::unsubscribe`] consumes the handle; dropping it has the
/// same effect, so a subscription cannot outlive its owner.
pub struct Subscription {
    id: u64,
    table: Table,
    task: Option<JoinHandle<()>>,
    active: Arc<AtomicUsize>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn table(&self) -> Table {
        self.table
    }

    /// Stop delivering events to this subscriber.
    pub fn unsubscribe(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            self.active.fetch_sub(1, Ordering::SeqCst);
            tracing::debug!(subscription = self.id, table = %self.table, "unsubscribed");
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}

/// A running event producer attached to a feed.
///
/// Dropping the connection stops the producer.
pub struct FeedConnection {
    description: String,
    task: Option<JoinHandle<()>>,
}

impl FeedConnection {
    /// A producer backed by a background task.
    pub fn spawned(description: impl Into<String>, task: JoinHandle<()>) -> Self {
        Self {
            description: description.into(),
            task: Some(task),
        }
    }

    /// A producer with no background work (writes are published inline).
    pub fn inline(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            task: None,
        }
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    /// Stop the producer.
    pub fn close(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for FeedConnection {
    fn drop(&mut self) {
        self.stop();
    }
}
