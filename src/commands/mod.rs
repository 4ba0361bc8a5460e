//! Command implementations for the `dh` CLI.
//!
//! Each command resolves what it needs from [`ResolvedSettings`], does its
//! work against the configured store, and returns a value implementing
//! [`Output`] so `main` can print it as JSON or for humans.

use serde::Serialize;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::activity::{current_user, record_activity};
use crate::config::{
    ConfigOverrides, DeckhandConfig, ResolvedSettings, default_config_path, load_config,
    resolve_settings,
};
use crate::dashboard::{AppState, MAX_ACTIVITY_LIMIT, start_server};
use crate::feed::ChangeFeed;
use crate::models::{ActivityLogEntry, Counter, DashboardStats, Session, SessionStatus, Task};
use crate::notion::NotionClient;
use crate::stats::{LiveStats, StatsEngine};
use crate::store::{Store, open_store};
use crate::sync::{SyncEngine, SyncOutcome};
use crate::{Error, Result};

/// Command results that can be serialized to JSON or formatted for humans.
pub trait Output {
    /// Serialize to JSON string.
    fn to_json(&self) -> String;

    /// Format for human-readable output.
    fn to_human(&self) -> String;
}

fn json_string<T: Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|e| format!(r#"{{"error":"{}"}}"#, e))
}

/// Load config.kdl and resolve settings against the environment and flags.
///
/// Resolution warnings are logged here, once per invocation.
pub fn load_settings(
    config_path: Option<&Path>,
    overrides: &ConfigOverrides,
) -> Result<(ResolvedSettings, Option<PathBuf>)> {
    let path = config_path.map(Path::to_path_buf).or_else(default_config_path);
    let file = match &path {
        Some(path) => load_config(path)?,
        None => DeckhandConfig::default(),
    };

    let settings = resolve_settings(&file, overrides)?;
    for warning in &settings.warnings {
        tracing::warn!("{}", warning);
    }
    Ok((settings, path))
}

fn store_for(settings: &ResolvedSettings) -> Result<Arc<dyn Store>> {
    open_store(&settings.store_settings())
}

/// Sync engine for the configured Notion database, if credentials exist.
fn sync_engine_for(
    settings: &ResolvedSettings,
    store: Arc<dyn Store>,
) -> Result<Option<SyncEngine>> {
    let Some(notion) = settings.notion_settings() else {
        return Ok(None);
    };
    let mut client = NotionClient::new(
        notion.api_key,
        notion.database_id,
        notion.properties,
        notion.request_timeout,
    )?;
    if let Some(api_base) = notion.api_base {
        client = client.with_api_base(api_base);
    }
    Ok(Some(SyncEngine::new(Arc::new(client), store)))
}

// === serve ===

/// Run the dashboard until Ctrl+C.
pub async fn serve(settings: &ResolvedSettings) -> Result<()> {
    let store = store_for(settings)?;
    let feed = ChangeFeed::new();
    let connection = store.connect_feed(&feed)?;
    tracing::info!(feed = connection.description(), "change feed connected");

    let stats = Arc::new(StatsEngine::new(Arc::clone(&store)));
    let live = LiveStats::start(Arc::clone(&stats), &feed).await;

    let sync = sync_engine_for(settings, Arc::clone(&store))?.map(Arc::new);
    if sync.is_none() {
        tracing::warn!("NOTION_KEY or NOTION_DATABASE_ID not set; sync is disabled");
    }

    let state = AppState {
        title: format!("deckhand ({})", store.backend()),
        store,
        sync,
        stats,
        live: live.subscribe(),
        feed,
    };
    let result = start_server(state, &settings.host.value, settings.port.value).await;

    live.shutdown();
    connection.close();
    result
}

// === sync ===

impl Output for SyncOutcome {
    fn to_json(&self) -> String {
        json_string(self)
    }

    fn to_human(&self) -> String {
        match self {
            SyncOutcome::Success {
                count, truncated, ..
            } => {
                let mut line = format!("Synced {} task(s) from Notion", count);
                if *truncated {
                    line.push_str(" (first page only; more tasks exist)");
                }
                line
            }
            SyncOutcome::Failure { error, .. } => format!("Sync failed: {}", error),
        }
    }
}

/// One reconciliation pass. Failures are reported in the outcome.
pub async fn sync(settings: &ResolvedSettings) -> Result<SyncOutcome> {
    let store = store_for(settings)?;
    let Some(engine) = sync_engine_for(settings, store)? else {
        return Err(Error::NotConfigured(
            "Notion is not configured (set NOTION_KEY and NOTION_DATABASE_ID)".to_string(),
        ));
    };
    Ok(SyncOutcome::from(&engine.sync().await))
}

// === stats ===

impl Output for DashboardStats {
    fn to_json(&self) -> String {
        json_string(self)
    }

    fn to_human(&self) -> String {
        let show = |counter: &Counter| match counter {
            Counter::Known { value } => value.to_string(),
            Counter::Unknown { reason } => format!("unknown ({})", reason),
        };
        let mut lines = vec![
            format!("Pending tasks:    {}", show(&self.pending_tasks)),
            format!("Completed tasks:  {}", show(&self.completed_tasks)),
            format!("Active sessions:  {}", show(&self.active_sessions)),
            format!("Activity entries: {}", show(&self.total_activities)),
        ];
        if self.is_degraded() {
            lines.push("Some counters could not be read; see logs.".to_string());
        }
        lines.join("\n")
    }
}

pub async fn stats(settings: &ResolvedSettings) -> Result<DashboardStats> {
    let store = store_for(settings)?;
    Ok(StatsEngine::new(store).compute_stats().await)
}

// === tasks ===

#[derive(Serialize)]
pub struct TaskList {
    pub tasks: Vec<Task>,
    pub count: usize,
}

impl Output for TaskList {
    fn to_json(&self) -> String {
        json_string(self)
    }

    fn to_human(&self) -> String {
        if self.tasks.is_empty() {
            return "No tasks found. Run `dh sync` to pull them from Notion.".to_string();
        }
        let mut lines = vec![format!("{} task(s):", self.count)];
        for task in &self.tasks {
            lines.push(format!(
                "  [{}] {} {} ({})",
                task.status, task.priority, task.title, task.external_id
            ));
        }
        lines.join("\n")
    }
}

pub async fn tasks(settings: &ResolvedSettings) -> Result<TaskList> {
    let tasks = store_for(settings)?.list_tasks().await?;
    Ok(TaskList {
        count: tasks.len(),
        tasks,
    })
}

// === sessions ===

#[derive(Serialize)]
pub struct SessionList {
    pub sessions: Vec<Session>,
    pub count: usize,
}

impl Output for SessionList {
    fn to_json(&self) -> String {
        json_string(self)
    }

    fn to_human(&self) -> String {
        if self.sessions.is_empty() {
            return "No sessions.".to_string();
        }
        let mut lines = vec![format!("{} session(s):", self.count)];
        for session in &self.sessions {
            lines.push(format!(
                "  {} [{}] {} - {} tokens",
                session.session_key, session.status, session.model, session.token_usage
            ));
        }
        lines.join("\n")
    }
}

pub async fn sessions(settings: &ResolvedSettings) -> Result<SessionList> {
    let sessions = store_for(settings)?.list_sessions().await?;
    Ok(SessionList {
        count: sessions.len(),
        sessions,
    })
}

// === session ===

/// Model recorded for a new session when none is given.
const DEFAULT_SESSION_MODEL: &str = "unknown";

#[derive(Serialize)]
pub struct SessionResult {
    pub session: Session,
    pub created: bool,
}

impl Output for SessionResult {
    fn to_json(&self) -> String {
        json_string(self)
    }

    fn to_human(&self) -> String {
        format!(
            "{} session {} [{}] {} - {} tokens",
            if self.created { "Registered" } else { "Updated" },
            self.session.session_key,
            self.session.status,
            self.session.model,
            self.session.token_usage
        )
    }
}

/// Register a session or update the one with the same key.
///
/// Fields not given keep their stored values; `started_at` is set once.
pub async fn session(
    settings: &ResolvedSettings,
    key: &str,
    status: Option<SessionStatus>,
    model: Option<String>,
    tokens: Option<u64>,
) -> Result<SessionResult> {
    if key.trim().is_empty() {
        return Err(Error::InvalidInput("Session key cannot be empty".to_string()));
    }

    let store = store_for(settings)?;
    let existing = store
        .list_sessions()
        .await?
        .into_iter()
        .find(|s| s.session_key == key);
    let created = existing.is_none();

    let session = match existing {
        Some(current) => {
            if let Some(tokens) = tokens {
                if tokens < current.token_usage {
                    return Err(Error::InvalidInput(format!(
                        "Token usage cannot decrease ({} -> {})",
                        current.token_usage, tokens
                    )));
                }
            }
            Session {
                status: status.unwrap_or(current.status),
                model: model.unwrap_or(current.model),
                token_usage: tokens.unwrap_or(current.token_usage),
                ..current
            }
        }
        None => Session {
            session_key: key.to_string(),
            status: status.unwrap_or(SessionStatus::Active),
            model: model.unwrap_or_else(|| DEFAULT_SESSION_MODEL.to_string()),
            started_at: chrono::Utc::now(),
            token_usage: tokens.unwrap_or(0),
        },
    };

    store.record_session(&session).await?;
    tracing::info!(
        session = %session.session_key,
        status = %session.status,
        created,
        "session recorded"
    );
    Ok(SessionResult { session, created })
}

// === activity ===

#[derive(Serialize)]
pub struct ActivityList {
    pub activity: Vec<ActivityLogEntry>,
    pub count: usize,
}

impl Output for ActivityList {
    fn to_json(&self) -> String {
        json_string(self)
    }

    fn to_human(&self) -> String {
        if self.activity.is_empty() {
            return "No activity.".to_string();
        }
        self.activity
            .iter()
            .map(|entry| {
                format!(
                    "{} {} {}",
                    entry.created_at.format("%Y-%m-%d %H:%M:%S"),
                    entry.actor.as_deref().unwrap_or("-"),
                    entry.action
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

pub async fn activity(settings: &ResolvedSettings, limit: usize) -> Result<ActivityList> {
    let limit = limit.min(MAX_ACTIVITY_LIMIT);
    let activity = store_for(settings)?.list_activity(limit).await?;
    Ok(ActivityList {
        count: activity.len(),
        activity,
    })
}

// === log ===

#[derive(Serialize)]
pub struct LogResult {
    pub entry: ActivityLogEntry,
}

impl Output for LogResult {
    fn to_json(&self) -> String {
        json_string(self)
    }

    fn to_human(&self) -> String {
        format!("Logged {} ({})", self.entry.action, self.entry.id)
    }
}

/// Append an activity entry; `details` must be a JSON object when given.
pub async fn log(
    settings: &ResolvedSettings,
    action: &str,
    actor: Option<String>,
    details: Option<&str>,
) -> Result<LogResult> {
    let details = match details {
        Some(raw) => match serde_json::from_str::<Value>(raw) {
            Ok(value @ Value::Object(_)) => value,
            Ok(_) => {
                return Err(Error::InvalidInput(
                    "--details must be a JSON object".to_string(),
                ));
            }
            Err(e) => {
                return Err(Error::InvalidInput(format!("--details is not valid JSON: {}", e)));
            }
        },
        None => Value::Object(Default::default()),
    };

    let store = store_for(settings)?;
    let actor = actor.or_else(|| Some(current_user()));
    let entry = record_activity(store.as_ref(), actor, action, details).await?;
    Ok(LogResult { entry })
}

// === config show ===

pub struct ConfigShow {
    pub config_file: Option<PathBuf>,
    pub settings: Value,
}

impl Output for ConfigShow {
    fn to_json(&self) -> String {
        let mut value = self.settings.clone();
        if let Value::Object(map) = &mut value {
            map.insert(
                "config_file".to_string(),
                serde_json::json!(self.config_file),
            );
        }
        json_string(&value)
    }

    fn to_human(&self) -> String {
        let mut lines = Vec::new();
        if let Some(path) = &self.config_file {
            lines.push(format!("config file: {}", path.display()));
        }
        if let Value::Object(map) = &self.settings {
            for (key, value) in map {
                match key.as_str() {
                    "warnings" => continue,
                    "properties" | "server" => {
                        if let Value::Object(inner) = value {
                            for (sub, value) in inner {
                                lines.push(describe(&format!("{}.{}", key, sub), value));
                            }
                        }
                    }
                    _ => lines.push(describe(key, value)),
                }
            }
            if let Some(Value::Array(warnings)) = map.get("warnings") {
                for warning in warnings {
                    lines.push(format!("warning: {}", warning.as_str().unwrap_or_default()));
                }
            }
        }
        lines.join("\n")
    }
}

/// `key = value (source)` for one resolved setting.
fn describe(key: &str, value: &Value) -> String {
    match value {
        Value::Null => format!("{} = (unset)", key),
        Value::Object(inner) if inner.contains_key("source") => {
            let shown = match &inner["value"] {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            format!("{} = {} ({})", key, shown, inner["source"].as_str().unwrap_or("?"))
        }
        Value::String(s) => format!("{} = {}", key, s),
        other => format!("{} = {}", key, other),
    }
}

pub fn config_show(settings: &ResolvedSettings, config_file: Option<PathBuf>) -> ConfigShow {
    ConfigShow {
        config_file,
        settings: settings.to_display_json(),
    }
}
