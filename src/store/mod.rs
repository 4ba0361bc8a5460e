//! Local store layer.
//!
//! Deckhand keeps three tables:
//! - `tasks` - mirrored Notion tasks, unique on `notion_id`
//! - `sessions` - agent sessions, written by agent runners or `dh session`
//! - `activity_log` - append-only action records
//!
//! ## Backends
//!
//! - **Supabase** ([`SupabaseStore`]): PostgREST for reads and writes,
//!   Realtime for change notifications
//! - **SQLite** ([`SqliteStore`]): a single local database file, with a file
//!   watcher standing in for Realtime
//!
//! Both are used through the [`Store`] trait.

pub mod realtime;
pub mod sqlite;
pub mod supabase;

pub use realtime::RealtimeClient;
pub use sqlite::SqliteStore;
pub use supabase::SupabaseStore;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::config::{StoreBackend, StoreSettings};
use crate::feed::{ChangeFeed, FeedConnection};
use crate::models::{ActivityLogEntry, NewActivity, Session, Task, TaskRecord};
use crate::{Error, Result};

/// A table the dashboard reads from and watches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    Tasks,
    Sessions,
    ActivityLog,
}

/// Every table with change notifications.
pub const WATCHED_TABLES: &[Table] = &[Table::Tasks, Table::Sessions, Table::ActivityLog];

impl Table {
    /// Table name in the store.
    pub fn as_str(&self) -> &'static str {
        match self {
            Table::Tasks => "tasks",
            Table::Sessions => "sessions",
            Table::ActivityLog => "activity_log",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "tasks" => Some(Table::Tasks),
            "sessions" => Some(Table::Sessions),
            "activity_log" => Some(Table::ActivityLog),
            _ => None,
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Row filter for counts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    /// Every row
    All,
    /// Rows whose `status` column equals the value
    StatusEq(String),
}

impl Filter {
    pub fn status(value: impl Into<String>) -> Self {
        Filter::StatusEq(value.into())
    }
}

/// Operations deckhand needs from a local store.
#[async_trait]
pub trait Store: Send + Sync {
    /// Insert or update a task keyed by its external id.
    ///
    /// Existing rows keep their id and `created_at`.
    async fn upsert_task(&self, record: &TaskRecord) -> Result<()>;

    /// All tasks, newest first.
    async fn list_tasks(&self) -> Result<Vec<Task>>;

    /// Insert or update a session keyed by `session_key`.
    async fn record_session(&self, session: &Session) -> Result<()>;

    /// All sessions, most recently started first.
    async fn list_sessions(&self) -> Result<Vec<Session>>;

    /// The `limit` most recent activity entries, newest first.
    async fn list_activity(&self, limit: usize) -> Result<Vec<ActivityLogEntry>>;

    /// Append an activity entry; the store assigns id and timestamp.
    async fn append_activity(&self, entry: &NewActivity) -> Result<ActivityLogEntry>;

    /// Number of rows in `table` matching `filter`.
    async fn count(&self, table: Table, filter: &Filter) -> Result<u64>;

    /// Start publishing this store's change notifications into `feed`.
    ///
    /// Must be called inside a Tokio runtime.
    fn connect_feed(&self, feed: &ChangeFeed) -> Result<FeedConnection>;

    /// Backend type name.
    fn backend(&self) -> &'static str;

    /// Store location (for display purposes).
    fn location(&self) -> String;
}

/// Open the store selected by the resolved settings.
pub fn open_store(settings: &StoreSettings) -> Result<Arc<dyn Store>> {
    match settings.backend {
        StoreBackend::Sqlite => Ok(Arc::new(SqliteStore::open(&settings.sqlite_path)?)),
        StoreBackend::Supabase => {
            let supabase = settings.supabase.as_ref().ok_or_else(|| {
                Error::NotConfigured(
                    "Supabase store selected but SUPABASE_URL or a Supabase key is missing"
                        .to_string(),
                )
            })?;
            Ok(Arc::new(SupabaseStore::new(
                &supabase.url,
                &supabase.key,
                settings.request_timeout,
            )?))
        }
    }
}
