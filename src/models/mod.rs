//! Data models for deckhand entities.
//!
//! This module defines the core data structures:
//! - `Task` - A mirrored work item keyed by its external (Notion) identity
//! - `TaskRecord` - The normalized write shape produced by a sync pass
//! - `Session` - A running agent process, read and counted only
//! - `ActivityLogEntry` - Append-only record of an action taken
//! - `DashboardStats` - Derived counters, see [`stats`]

pub mod stats;

pub use stats::{Counter, DashboardStats};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// Title used when the external record has none.
pub const UNTITLED: &str = "Untitled";

/// Task status in the local store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskStatus {
    #[default]
    Pending,
    InProgress,
    Done,
}

impl TaskStatus {
    /// Column value as stored.
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::InProgress => "in-progress",
            TaskStatus::Done => "done",
        }
    }

    /// Parse a stored column value.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(TaskStatus::Pending),
            "in-progress" => Some(TaskStatus::InProgress),
            "done" => Some(TaskStatus::Done),
            _ => None,
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Task priority, P0 being the most urgent.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum Priority {
    P0,
    P1,
    P2,
    #[default]
    P3,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::P0 => "P0",
            Priority::P1 => "P1",
            Priority::P2 => "P2",
            Priority::P3 => "P3",
        }
    }

    /// Parse a priority label, case-insensitive.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "P0" => Some(Priority::P0),
            "P1" => Some(Priority::P1),
            "P2" => Some(Priority::P2),
            "P3" => Some(Priority::P3),
            _ => None,
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A task row in the local store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Store-assigned row identifier
    #[serde(deserialize_with = "id_as_string")]
    pub id: String,

    /// Identity in the external source; unique and immutable
    #[serde(rename = "notion_id")]
    pub external_id: String,

    /// Display title
    pub title: String,

    /// Normalized status
    #[serde(default)]
    pub status: TaskStatus,

    /// Normalized priority
    #[serde(default)]
    pub priority: Priority,

    /// Set by the store on first insert, never updated by deckhand
    pub created_at: DateTime<Utc>,
}

/// Normalized task fields written by a sync pass.
///
/// Carries no row id or creation time; both belong to the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRecord {
    #[serde(rename = "notion_id")]
    pub external_id: String,
    pub title: String,
    pub status: TaskStatus,
    pub priority: Priority,
}

/// Session status as written by the agent runner.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    #[default]
    Active,
    Paused,
    Stopped,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Active => "active",
            SessionStatus::Paused => "paused",
            SessionStatus::Stopped => "stopped",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(SessionStatus::Active),
            "paused" => Some(SessionStatus::Paused),
            "stopped" => Some(SessionStatus::Stopped),
            _ => None,
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One running agent process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    /// Unique session identifier
    pub session_key: String,

    /// Lifecycle state
    pub status: SessionStatus,

    /// Identifier of the agent configuration in use
    pub model: String,

    /// When the session was created
    pub started_at: DateTime<Utc>,

    /// Tokens consumed so far; never decreases while active
    #[serde(default)]
    pub token_usage: u64,
}

/// An immutable record of an action taken by a human or an agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityLogEntry {
    #[serde(deserialize_with = "id_as_string")]
    pub id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor: Option<String>,

    pub action: String,

    #[serde(default)]
    pub details: serde_json::Value,

    pub created_at: DateTime<Utc>,
}

/// Fields of an activity entry before the store assigns id and timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewActivity {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actor: Option<String>,
    pub action: String,
    pub details: serde_json::Value,
}

/// Accept both integer and string primary keys.
///
/// Supabase tables may use `bigint` identity or `uuid` columns.
fn id_as_string<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or integer id, got {}",
            other
        ))),
    }
}
