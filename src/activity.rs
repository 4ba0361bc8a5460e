//! Activity log writes.
//!
//! Entries are append-only. Details are sanitized before they reach the
//! store, since the activity feed is shown verbatim on the dashboard.

use serde_json::Value;

use crate::models::{ActivityLogEntry, NewActivity};
use crate::store::Store;
use crate::{Error, Result};

/// Longest string value kept in details, in characters.
const MAX_STRING_CHARS: usize = 100;

/// Arrays longer than this are replaced by a summary.
const MAX_ARRAY_ITEMS: usize = 10;

/// Append an activity entry after sanitizing its details.
pub async fn record_activity(
    store: &dyn Store,
    actor: Option<String>,
    action: &str,
    details: Value,
) -> Result<ActivityLogEntry> {
    let action = action.trim();
    if action.is_empty() {
        return Err(Error::InvalidInput("Activity action cannot be empty".to_string()));
    }

    let entry = NewActivity {
        actor: actor.filter(|a| !a.trim().is_empty()),
        action: action.to_string(),
        details: sanitize_details(&details),
    };
    let stored = store.append_activity(&entry).await?;
    tracing::debug!(id = %stored.id, action = %stored.action, "activity recorded");
    Ok(stored)
}

/// Actor name for entries written from this machine.
pub fn current_user() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "unknown".to_string())
}

/// Redact secrets, truncate long strings and summarize large arrays.
pub fn sanitize_details(details: &Value) -> Value {
    match details {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, value)| {
                    let value = if is_sensitive(key) {
                        Value::String("[REDACTED]".to_string())
                    } else {
                        sanitize_details(value)
                    };
                    (key.clone(), value)
                })
                .collect(),
        ),
        Value::Array(items) if items.len() > MAX_ARRAY_ITEMS => {
            Value::String(format!("[Array with {} items]", items.len()))
        }
        Value::Array(items) => Value::Array(items.iter().map(sanitize_details).collect()),
        Value::String(s) => {
            let chars = s.chars().count();
            if chars > MAX_STRING_CHARS {
                let head: String = s.chars().take(MAX_STRING_CHARS - 3).collect();
                Value::String(format!("{}... ({} chars)", head, chars))
            } else {
                details.clone()
            }
        }
        _ => details.clone(),
    }
}

fn is_sensitive(key: &str) -> bool {
    let key = key.to_lowercase();
    ["password", "token", "key", "secret"]
        .iter()
        .any(|word| key.contains(word))
}
