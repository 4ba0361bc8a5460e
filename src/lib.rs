//! Deckhand - mirrors an external task tracker into a local store and serves
//! live dashboard statistics.
//!
//! The library is organized around two engines:
//! - [`sync::SyncEngine`] pulls the Notion task set and upserts it into a
//!   [`store::Store`] keyed by external identity.
//! - [`stats::StatsEngine`] derives [`models::DashboardStats`] from the store,
//!   and [`stats::LiveStats`] keeps them current from the [`feed::ChangeFeed`].
//!
//! Everything else (HTTP server, CLI, configuration) wires these together.

pub mod activity;
pub mod cli;
pub mod commands;
pub mod config;
pub mod dashboard;
pub mod feed;
pub mod logging;
pub mod models;
pub mod normalize;
pub mod notion;
pub mod stats;
pub mod store;
pub mod sync;

/// Test doubles and isolated environments shared by unit tests.
#[cfg(test)]
pub(crate) mod test_utils {
    use async_trait::async_trait;
    use std::path::{Path, PathBuf};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    use crate::feed::{ChangeFeed, FeedConnection};
    use crate::models::{ActivityLogEntry, NewActivity, Session, Task, TaskRecord};
    use crate::notion::{ExternalTask, FetchError, SourceSnapshot, TaskSource};
    use crate::store::{Filter, SqliteStore, Store, Table};
    use crate::{Error, Result};

    /// Test environment with an isolated data directory.
    pub struct TestEnv {
        pub data_dir: TempDir,
    }

    impl TestEnv {
        pub fn new() -> Self {
            Self {
                data_dir: TempDir::new().unwrap(),
            }
        }

        pub fn db_path(&self) -> PathBuf {
            self.data_dir.path().join("deckhand.db")
        }

        pub fn data_path(&self) -> &Path {
            self.data_dir.path()
        }

        /// Open a SQLite store inside this environment.
        pub fn open_store(&self) -> SqliteStore {
            SqliteStore::open(&self.db_path()).unwrap()
        }
    }

    impl Default for TestEnv {
        fn default() -> Self {
            Self::new()
        }
    }

    /// Shorthand for an external record.
    pub fn external(
        id: &str,
        title: Option<&str>,
        status: Option<&str>,
        priority: Option<&str>,
    ) -> ExternalTask {
        ExternalTask {
            id: id.to_string(),
            title: title.map(str::to_string),
            status: status.map(str::to_string),
            priority: priority.map(str::to_string),
        }
    }

    /// In-memory task source whose contents tests can swap between passes.
    #[derive(Default)]
    pub struct FakeSource {
        tasks: Mutex<Vec<ExternalTask>>,
        failure: Mutex<Option<FetchError>>,
        truncated: Mutex<bool>,
    }

    impl FakeSource {
        pub fn new(tasks: Vec<ExternalTask>) -> Self {
            Self {
                tasks: Mutex::new(tasks),
                ..Default::default()
            }
        }

        pub fn set_tasks(&self, tasks: Vec<ExternalTask>) {
            *self.tasks.lock().unwrap() = tasks;
        }

        pub fn fail_with(&self, error: FetchError) {
            *self.failure.lock().unwrap() = Some(error);
        }

        pub fn set_truncated(&self, truncated: bool) {
            *self.truncated.lock().unwrap() = truncated;
        }
    }

    #[async_trait]
    impl TaskSource for FakeSource {
        async fn fetch_tasks(&self) -> std::result::Result<SourceSnapshot, FetchError> {
            if let Some(error) = self.failure.lock().unwrap().clone() {
                return Err(error);
            }
            Ok(SourceSnapshot {
                tasks: self.tasks.lock().unwrap().clone(),
                truncated: *self.truncated.lock().unwrap(),
            })
        }

        fn describe(&self) -> String {
            "fake".to_string()
        }
    }

    /// SQLite store wrapper that fails selected operations.
    pub struct FlakyStore {
        pub inner: SqliteStore,
        pub failing_count_table: Option<Table>,
        pub upserts_before_failure: Option<usize>,
        upserts: AtomicUsize,
    }

    impl FlakyStore {
        pub fn new(inner: SqliteStore) -> Self {
            Self {
                inner,
                failing_count_table: None,
                upserts_before_failure: None,
                upserts: AtomicUsize::new(0),
            }
        }

        pub fn fail_counts_on(mut self, table: Table) -> Self {
            self.failing_count_table = Some(table);
            self
        }

        pub fn fail_upserts_after(mut self, n: usize) -> Self {
            self.upserts_before_failure = Some(n);
            self
        }
    }

    #[async_trait]
    impl Store for FlakyStore {
        async fn upsert_task(&self, record: &TaskRecord) -> Result<()> {
            let done = self.upserts.fetch_add(1, Ordering::SeqCst);
            if let Some(limit) = self.upserts_before_failure {
                if done >= limit {
                    return Err(Error::StoreWrite("injected upsert failure".to_string()));
                }
            }
            self.inner.upsert_task(record).await
        }

        async fn list_tasks(&self) -> Result<Vec<Task>> {
            self.inner.list_tasks().await
        }

        async fn record_session(&self, session: &Session) -> Result<()> {
            self.inner.record_session(session).await
        }

        async fn list_sessions(&self) -> Result<Vec<Session>> {
            self.inner.list_sessions().await
        }

        async fn list_activity(&self, limit: usize) -> Result<Vec<ActivityLogEntry>> {
            self.inner.list_activity(limit).await
        }

        async fn append_activity(&self, entry: &NewActivity) -> Result<ActivityLogEntry> {
            self.inner.append_activity(entry).await
        }

        async fn count(&self, table: Table, filter: &Filter) -> Result<u64> {
            if self.failing_count_table == Some(table) {
                return Err(Error::StoreRead(format!(
                    "injected count failure on {}",
                    table
                )));
            }
            self.inner.count(table, filter).await
        }

        fn connect_feed(&self, feed: &ChangeFeed) -> Result<FeedConnection> {
            self.inner.connect_feed(feed)
        }

        fn backend(&self) -> &'static str {
            "flaky"
        }

        fn location(&self) -> String {
            self.inner.location()
        }
    }
}

/// Library-level error type for deckhand operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The external task source could not be read.
    #[error("{0}")]
    ExternalFetch(#[from] notion::FetchError),

    /// A write to the local store failed.
    #[error("Store write failed: {0}")]
    StoreWrite(String),

    /// A read from the local store failed.
    #[error("Store read failed: {0}")]
    StoreRead(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Not configured: {0}")]
    NotConfigured(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("{0}")]
    Other(String),
}

/// Result type alias for deckhand operations.
pub type Result<T> = std::result::Result<T, Error>;
