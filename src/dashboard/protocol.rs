//! WebSocket protocol for the dashboard.
//!
//! Messages are JSON objects discriminated by a `type` field.
//!
//! ## Client → Server ([`ClientMessage`])
//! - `subscribe`: receive `changed` notifications for the listed tables
//! - `ping`: keepalive
//!
//! ## Server → Client ([`ServerMessage`])
//! - `stats`: full [`DashboardStats`] snapshot, sent on connect and after
//!   every recompute
//! - `changed`: a row in a subscribed table changed
//! - `pong`: keepalive response
//! - `error`: the last client message was rejected

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::feed::{ChangeEvent, ChangeKind};
use crate::models::DashboardStats;
use crate::store::{Table, WATCHED_TABLES};

/// Messages sent from the browser.
///
/// ```json
/// {"type": "subscribe", "topics": ["tasks", "activity_log"]}
/// {"type": "ping"}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Replace the connection's table subscriptions.
    ///
    /// Empty or `["*"]` means every watched table.
    Subscribe {
        #[serde(default)]
        topics: Vec<String>,
    },

    Ping,
}

/// Messages sent to the browser.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Stats {
        stats: DashboardStats,
    },

    Changed {
        table: Table,
        kind: ChangeKind,
        timestamp: DateTime<Utc>,
    },

    Pong,

    Error {
        message: String,
    },
}

impl ServerMessage {
    pub fn error(message: impl Into<String>) -> Self {
        ServerMessage::Error {
            message: message.into(),
        }
    }

    /// Encode for a text frame.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            format!(r#"{{"type":"error","message":"encode failed: {}"}}"#, e)
        })
    }
}

impl From<&ChangeEvent> for ServerMessage {
    fn from(event: &ChangeEvent) -> Self {
        ServerMessage::Changed {
            table: event.table,
            kind: event.kind,
            timestamp: event.at,
        }
    }
}

/// Resolve subscription topics to tables.
pub fn topics_to_tables(topics: &[String]) -> Result<Vec<Table>, String> {
    if topics.is_empty() || topics.iter().any(|t| t == "*") {
        return Ok(WATCHED_TABLES.to_vec());
    }

    let mut tables = Vec::new();
    for topic in topics {
        let table = Table::parse(topic).ok_or_else(|| format!("Unknown topic: {}", topic))?;
        if !tables.contains(&table) {
            tables.push(table);
        }
    }
    Ok(tables)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Counter;

    #[test]
    fn test_client_subscribe_parses() {
        let parsed: ClientMessage =
            serde_json::from_str(r#"{"type":"subscribe","topics":["tasks","sessions"]}"#).unwrap();
        assert_eq!(
            parsed,
            ClientMessage::Subscribe {
                topics: vec!["tasks".to_string(), "sessions".to_string()]
            }
        );
    }

    #[test]
    fn test_client_subscribe_topics_default_empty() {
        let parsed: ClientMessage = serde_json::from_str(r#"{"type":"subscribe"}"#).unwrap();
        assert_eq!(parsed, ClientMessage::Subscribe { topics: vec![] });
    }

    #[test]
    fn test_unknown_client_type_rejected() {
        assert!(serde_json::from_str::<ClientMessage>(r#"{"type":"kill","pid":1}"#).is_err());
    }

    #[test]
    fn test_pong_encoding() {
        assert_eq!(ServerMessage::Pong.to_json(), r#"{"type":"pong"}"#);
    }

    #[test]
    fn test_stats_encoding_carries_counter_states() {
        let mut stats = DashboardStats::empty();
        stats.pending_tasks = Counter::known(4);
        stats.active_sessions = Counter::unknown("timeout");

        let value: serde_json::Value =
            serde_json::from_str(&ServerMessage::Stats { stats }.to_json()).unwrap();
        assert_eq!(value["type"], "stats");
        assert_eq!(value["stats"]["pendingTasks"]["state"], "known");
        assert_eq!(value["stats"]["pendingTasks"]["value"], 4);
        assert_eq!(value["stats"]["activeSessions"]["state"], "unknown");
        assert_eq!(value["stats"]["activeSessions"]["reason"], "timeout");
    }

    #[test]
    fn test_changed_from_event() {
        let event = ChangeEvent::new(Table::ActivityLog, ChangeKind::Insert);
        let value: serde_json::Value =
            serde_json::from_str(&ServerMessage::from(&event).to_json()).unwrap();
        assert_eq!(value["type"], "changed");
        assert_eq!(value["table"], "activity_log");
        assert_eq!(value["kind"], "insert");
    }

    #[test]
    fn test_topics_to_tables() {
        assert_eq!(topics_to_tables(&[]).unwrap(), WATCHED_TABLES.to_vec());
        assert_eq!(
            topics_to_tables(&["*".to_string()]).unwrap(),
            WATCHED_TABLES.to_vec()
        );
        assert_eq!(
            topics_to_tables(&["tasks".to_string(), "tasks".to_string()]).unwrap(),
            vec![Table::Tasks]
        );
        assert!(topics_to_tables(&["bugs".to_string()]).is_err());
    }
}
