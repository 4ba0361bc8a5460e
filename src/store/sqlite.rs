//! SQLite store backend.
//!
//! A single database file holds all three tables. Writes made through this
//! store are published to the connected feed directly; writes made by other
//! processes are picked up by [`crate::feed::watch_database`].

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, params};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;
use tokio::sync::Mutex;

use super::{Filter, Store, Table};
use crate::feed::{ChangeEvent, ChangeFeed, ChangeKind, FeedConnection, watch_database};
use crate::models::{
    ActivityLogEntry, NewActivity, Priority, Session, SessionStatus, Task, TaskRecord, TaskStatus,
};
use crate::{Error, Result};

/// How long a writer waits on a lock held by another process.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Store backed by a local SQLite database.
pub struct SqliteStore {
    path: PathBuf,
    conn: Mutex<Connection>,
    feed: OnceLock<ChangeFeed>,
}

impl SqliteStore {
    /// Open or create the database at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        // WAL lets the dashboard read while another process writes
        conn.query_row("PRAGMA journal_mode = WAL", [], |_| Ok(()))?;
        Self::init_schema(&conn)?;

        Ok(Self {
            path: path.to_path_buf(),
            conn: Mutex::new(conn),
            feed: OnceLock::new(),
        })
    }

    /// Path of the database file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Initialize the SQLite schema.
    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS tasks (
                id TEXT PRIMARY KEY,
                notion_id TEXT NOT NULL UNIQUE,
                title TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                priority TEXT NOT NULL DEFAULT 'P3',
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS sessions (
                session_key TEXT PRIMARY KEY,
                status TEXT NOT NULL DEFAULT 'active',
                model TEXT NOT NULL,
                started_at TEXT NOT NULL,
                token_usage INTEGER NOT NULL DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS activity_log (
                id TEXT PRIMARY KEY,
                actor TEXT,
                action TEXT NOT NULL,
                details TEXT NOT NULL DEFAULT 'null',
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks(status);
            CREATE INDEX IF NOT EXISTS idx_tasks_created ON tasks(created_at);
            CREATE INDEX IF NOT EXISTS idx_sessions_status ON sessions(status);
            CREATE INDEX IF NOT EXISTS idx_activity_created ON activity_log(created_at);
            "#,
        )?;
        Ok(())
    }

    fn notify(&self, table: Table, kind: ChangeKind) {
        if let Some(feed) = self.feed.get() {
            feed.publish(ChangeEvent::new(table, kind));
        }
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn upsert_task(&self, record: &TaskRecord) -> Result<()> {
        let new_id = uuid::Uuid::new_v4().to_string();
        let conn = self.conn.lock().await;
        let row_id: String = conn
            .query_row(
                r#"
                INSERT INTO tasks (id, notion_id, title, status, priority, created_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                ON CONFLICT(notion_id) DO UPDATE SET
                    title = excluded.title,
                    status = excluded.status,
                    priority = excluded.priority
                RETURNING id
                "#,
                params![
                    new_id,
                    record.external_id,
                    record.title,
                    record.status.as_str(),
                    record.priority.as_str(),
                    timestamp(&Utc::now()),
                ],
                |row| row.get(0),
            )
            .map_err(|e| Error::StoreWrite(e.to_string()))?;
        drop(conn);

        let kind = if row_id == new_id {
            ChangeKind::Insert
        } else {
            ChangeKind::Update
        };
        self.notify(Table::Tasks, kind);
        Ok(())
    }

    async fn record_session(&self, session: &Session) -> Result<()> {
        let conn = self.conn.lock().await;
        let existing: Option<String> = conn
            .query_row(
                "SELECT session_key FROM sessions WHERE session_key = ?1",
                [&session.session_key],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| Error::StoreRead(e.to_string()))?;

        conn.execute(
            r#"
            INSERT INTO sessions (session_key, status, model, started_at, token_usage)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(session_key) DO UPDATE SET
                status = excluded.status,
                model = excluded.model,
                token_usage = excluded.token_usage
            "#,
            params![
                session.session_key,
                session.status.as_str(),
                session.model,
                timestamp(&session.started_at),
                session.token_usage as i64,
            ],
        )
        .map_err(|e| Error::StoreWrite(e.to_string()))?;
        drop(conn);

        let kind = if existing.is_some() {
            ChangeKind::Update
        } else {
            ChangeKind::Insert
        };
        self.notify(Table::Sessions, kind);
        Ok(())
    }

    async fn list_tasks(&self) -> Result<Vec<Task>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT id, notion_id, title, status, priority, created_at
             FROM tasks ORDER BY created_at DESC, rowid DESC",
        )?;
        let tasks = stmt
            .query_map([], task_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| Error::StoreRead(e.to_string()))?;
        Ok(tasks)
    }

    async fn list_sessions(&self) -> Result<Vec<Session>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT session_key, status, model, started_at, token_usage
             FROM sessions ORDER BY started_at DESC",
        )?;
        let sessions = stmt
            .query_map([], session_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| Error::StoreRead(e.to_string()))?;
        Ok(sessions)
    }

    async fn list_activity(&self, limit: usize) -> Result<Vec<ActivityLogEntry>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT id, actor, action, details, created_at
             FROM activity_log ORDER BY created_at DESC, rowid DESC LIMIT ?1",
        )?;
        let entries = stmt
            .query_map([limit as i64], activity_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| Error::StoreRead(e.to_string()))?;
        Ok(entries)
    }

    async fn append_activity(&self, entry: &NewActivity) -> Result<ActivityLogEntry> {
        let stored = ActivityLogEntry {
            id: uuid::Uuid::new_v4().to_string(),
            actor: entry.actor.clone(),
            action: entry.action.clone(),
            details: entry.details.clone(),
            created_at: Utc::now(),
        };

        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO activity_log (id, actor, action, details, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                stored.id,
                stored.actor,
                stored.action,
                serde_json::to_string(&stored.details)?,
                timestamp(&stored.created_at),
            ],
        )
        .map_err(|e| Error::StoreWrite(e.to_string()))?;
        drop(conn);

        self.notify(Table::ActivityLog, ChangeKind::Insert);
        Ok(stored)
    }

    async fn count(&self, table: Table, filter: &Filter) -> Result<u64> {
        let conn = self.conn.lock().await;
        let result: rusqlite::Result<i64> = match filter {
            Filter::All => conn.query_row(
                &format!("SELECT COUNT(*) FROM {}", table.as_str()),
                [],
                |row| row.get(0),
            ),
            Filter::StatusEq(status) => conn.query_row(
                &format!("SELECT COUNT(*) FROM {} WHERE status = ?1", table.as_str()),
                [status],
                |row| row.get(0),
            ),
        };
        let count = result.map_err(|e| Error::StoreRead(format!("count {}: {}", table, e)))?;
        Ok(count.max(0) as u64)
    }

    fn connect_feed(&self, feed: &ChangeFeed) -> Result<FeedConnection> {
        if self.feed.set(feed.clone()).is_err() {
            return Err(Error::Other(
                "SQLite store is already connected to a change feed".to_string(),
            ));
        }

        let path = self.path.clone();
        let feed = feed.clone();
        let task = tokio::spawn(async move {
            if let Err(e) = watch_database(path, feed).await {
                tracing::warn!(error = %e, "database watcher stopped");
            }
        });
        Ok(FeedConnection::spawned(
            format!("sqlite watcher on {}", self.path.display()),
            task,
        ))
    }

    fn backend(&self) -> &'static str {
        "sqlite"
    }

    fn location(&self) -> String {
        self.path.display().to_string()
    }
}

/// Fixed-width UTC timestamps so text ordering matches time ordering.
fn timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(row: &Row, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let text: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&text)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn task_from_row(row: &Row) -> rusqlite::Result<Task> {
    let status: String = row.get(3)?;
    let priority: String = row.get(4)?;
    Ok(Task {
        id: row.get(0)?,
        external_id: row.get(1)?,
        title: row.get(2)?,
        status: TaskStatus::parse(&status).unwrap_or_default(),
        priority: Priority::parse(&priority).unwrap_or_default(),
        created_at: parse_timestamp(row, 5)?,
    })
}

fn session_from_row(row: &Row) -> rusqlite::Result<Session> {
    let status: String = row.get(1)?;
    let token_usage: i64 = row.get(4)?;
    Ok(Session {
        session_key: row.get(0)?,
        status: SessionStatus::parse(&status).unwrap_or_default(),
        model: row.get(2)?,
        started_at: parse_timestamp(row, 3)?,
        token_usage: token_usage.max(0) as u64,
    })
}

fn activity_from_row(row: &Row) -> rusqlite::Result<ActivityLogEntry> {
    let details: String = row.get(3)?;
    Ok(ActivityLogEntry {
        id: row.get(0)?,
        actor: row.get(1)?,
        action: row.get(2)?,
        details: serde_json::from_str(&details)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(3, Type::Text, Box::new(e)))?,
        created_at: parse_timestamp(row, 4)?,
    })
}
