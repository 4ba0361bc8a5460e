//! Precedence resolution for deckhand settings.
//!
//! ## Precedence (highest to lowest)
//!
//! 1. CLI flags
//! 2. Environment variables
//! 3. config.kdl
//! 4. Built-in defaults
//!
//! Keys for Notion and Supabase only ever come from the environment.

use serde::{Serialize, Serializer};
use std::path::PathBuf;
use std::time::Duration;

use super::schema::{DeckhandConfig, StoreBackend};
use crate::notion::PropertyNames;
use crate::{Error, Result};

pub const STORE_ENV: &str = "DECKHAND_STORE";
pub const SQLITE_PATH_ENV: &str = "DECKHAND_SQLITE_PATH";
pub const NOTION_KEY_ENV: &str = "NOTION_KEY";
pub const NOTION_DATABASE_ID_ENV: &str = "NOTION_DATABASE_ID";
pub const NOTION_API_BASE_ENV: &str = "DECKHAND_NOTION_API_BASE";
pub const SUPABASE_URL_ENV: &str = "SUPABASE_URL";
pub const SUPABASE_SERVICE_ROLE_KEY_ENV: &str = "SUPABASE_SERVICE_ROLE_KEY";
pub const SUPABASE_ANON_KEY_ENV: &str = "SUPABASE_ANON_KEY";

/// Names accepted for compatibility with older deployments.
pub const LEGACY_SUPABASE_URL_ENV: &str = "NEXT_PUBLIC_SUPABASE_URL";
pub const LEGACY_SUPABASE_ANON_KEY_ENV: &str = "NEXT_PUBLIC_SUPABASE_ANON_KEY";

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Tracks where a resolved value came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueSource {
    /// Value from CLI flag
    CliFlag,
    /// Value from environment variable
    EnvVar(String),
    /// Value from config.kdl
    ConfigFile,
    /// Built-in default value
    Default,
}

impl std::fmt::Display for ValueSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValueSource::CliFlag => write!(f, "cli"),
            ValueSource::EnvVar(name) => write!(f, "env:{}", name),
            ValueSource::ConfigFile => write!(f, "config"),
            ValueSource::Default => write!(f, "default"),
        }
    }
}

impl Serialize for ValueSource {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// A resolved value with its source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Resolved<T> {
    pub value: T,
    pub source: ValueSource,
}

impl<T> Resolved<T> {
    pub fn new(value: T, source: ValueSource) -> Self {
        Self { value, source }
    }
}

/// Which Supabase key was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyKind {
    ServiceRole,
    Anon,
}

/// CLI overrides for resolution.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub store: Option<StoreBackend>,
    pub sqlite_path: Option<PathBuf>,
    pub host: Option<String>,
    pub port: Option<u16>,
}

/// Everything needed to open a store.
#[derive(Debug, Clone)]
pub struct StoreSettings {
    pub backend: StoreBackend,
    pub sqlite_path: PathBuf,
    /// Present when both a URL and a key were found
    pub supabase: Option<SupabaseSettings>,
    pub request_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct SupabaseSettings {
    pub url: String,
    pub key: String,
    pub key_kind: KeyKind,
}

/// Everything needed to build a Notion client.
#[derive(Debug, Clone)]
pub struct NotionSettings {
    pub api_key: String,
    pub database_id: String,
    /// Replacement for the public API host (proxies, tests)
    pub api_base: Option<String>,
    pub properties: PropertyNames,
    pub request_timeout: Duration,
}

/// Fully resolved settings with source tracking.
#[derive(Debug, Clone)]
pub struct ResolvedSettings {
    pub store: Resolved<StoreBackend>,
    pub sqlite_path: Resolved<PathBuf>,
    pub supabase_url: Option<Resolved<String>>,
    pub supabase_key: Option<Resolved<String>>,
    pub supabase_key_kind: Option<KeyKind>,
    pub notion_key: Option<Resolved<String>>,
    pub notion_database_id: Option<Resolved<String>>,
    pub notion_api_base: Option<Resolved<String>>,
    pub title_property: Resolved<String>,
    pub status_property: Resolved<String>,
    pub priority_property: Resolved<String>,
    pub host: Resolved<String>,
    pub port: Resolved<u16>,
    pub request_timeout_secs: Resolved<u64>,
    /// Problems worth telling the operator about at startup
    pub warnings: Vec<String>,
}

impl ResolvedSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.value)
    }

    pub fn store_settings(&self) -> StoreSettings {
        let supabase = match (&self.supabase_url, &self.supabase_key, self.supabase_key_kind) {
            (Some(url), Some(key), Some(key_kind)) => Some(SupabaseSettings {
                url: url.value.clone(),
                key: key.value.clone(),
                key_kind,
            }),
            _ => None,
        };
        StoreSettings {
            backend: self.store.value,
            sqlite_path: self.sqlite_path.value.clone(),
            supabase,
            request_timeout: self.request_timeout(),
        }
    }

    /// Notion settings, when both key and database id are present.
    pub fn notion_settings(&self) -> Option<NotionSettings> {
        let api_key = self.notion_key.as_ref()?;
        let database_id = self.notion_database_id.as_ref()?;
        Some(NotionSettings {
            api_key: api_key.value.clone(),
            database_id: database_id.value.clone(),
            api_base: self.notion_api_base.as_ref().map(|r| r.value.clone()),
            properties: PropertyNames {
                title: self.title_property.value.clone(),
                status: self.status_property.value.clone(),
                priority: self.priority_property.value.clone(),
            },
            request_timeout: self.request_timeout(),
        })
    }

    /// Settings as JSON with secrets masked.
    pub fn to_display_json(&self) -> serde_json::Value {
        let masked = |r: &Option<Resolved<String>>| {
            r.as_ref()
                .map(|r| serde_json::json!({ "value": mask_secret(&r.value), "source": r.source }))
        };

        serde_json::json!({
            "store": self.store,
            "sqlite_path": self.sqlite_path,
            "supabase_url": self.supabase_url,
            "supabase_key": masked(&self.supabase_key),
            "supabase_key_kind": self.supabase_key_kind,
            "notion_key": masked(&self.notion_key),
            "notion_database_id": self.notion_database_id,
            "notion_api_base": self.notion_api_base,
            "properties": {
                "title": self.title_property,
                "status": self.status_property,
                "priority": self.priority_property,
            },
            "server": {
                "host": self.host,
                "port": self.port,
            },
            "request_timeout_secs": self.request_timeout_secs,
            "warnings": self.warnings,
        })
    }
}

/// Show the first and last four characters of a secret.
pub fn mask_secret(secret: &str) -> String {
    let chars: Vec<char> = secret.chars().collect();
    if chars.len() <= 12 {
        let head: String = chars.iter().take(4).collect();
        format!("{}...", head)
    } else {
        let head: String = chars[..4].iter().collect();
        let tail: String = chars[chars.len() - 4..].iter().collect();
        format!("{}...{}", head, tail)
    }
}

/// Default SQLite location: `<data_dir>/deckhand/deckhand.db`.
pub fn default_sqlite_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
        .ok_or_else(|| Error::Config("Could not determine data directory".to_string()))?;
    Ok(data_dir.join("deckhand").join("deckhand.db"))
}

/// Resolve settings from the process environment.
pub fn resolve_settings(
    file: &DeckhandConfig,
    overrides: &ConfigOverrides,
) -> Result<ResolvedSettings> {
    resolve_settings_with_env(file, overrides, |name| std::env::var(name).ok())
}

/// Resolve settings with an explicit environment lookup.
///
/// Empty environment values count as unset.
pub fn resolve_settings_with_env<F>(
    file: &DeckhandConfig,
    overrides: &ConfigOverrides,
    env: F,
) -> Result<ResolvedSettings>
where
    F: Fn(&str) -> Option<String>,
{
    let env = |name: &str| {
        env(name)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .map(|v| Resolved::new(v, ValueSource::EnvVar(name.to_string())))
    };
    let mut warnings = Vec::new();

    // Store backend
    let store = if let Some(store) = overrides.store {
        Resolved::new(store, ValueSource::CliFlag)
    } else if let Some(r) = env(STORE_ENV) {
        let store = StoreBackend::parse(&r.value).ok_or_else(|| {
            Error::Config(format!(
                "{} must be \"sqlite\" or \"supabase\", got \"{}\"",
                STORE_ENV, r.value
            ))
        })?;
        Resolved::new(store, r.source)
    } else if let Some(store) = file.store {
        Resolved::new(store, ValueSource::ConfigFile)
    } else {
        Resolved::new(StoreBackend::default(), ValueSource::Default)
    };

    // SQLite path
    let sqlite_path = if let Some(ref path) = overrides.sqlite_path {
        Resolved::new(path.clone(), ValueSource::CliFlag)
    } else if let Some(r) = env(SQLITE_PATH_ENV) {
        Resolved::new(PathBuf::from(r.value), r.source)
    } else if let Some(ref path) = file.sqlite_path {
        Resolved::new(path.clone(), ValueSource::ConfigFile)
    } else {
        Resolved::new(default_sqlite_path()?, ValueSource::Default)
    };

    // Supabase URL
    let supabase_url = env(SUPABASE_URL_ENV)
        .or_else(|| env(LEGACY_SUPABASE_URL_ENV))
        .or_else(|| {
            file.supabase_url
                .clone()
                .map(|url| Resolved::new(url, ValueSource::ConfigFile))
        });

    // Supabase key: service role preferred, anon accepted with a warning
    let (supabase_key, supabase_key_kind) = if let Some(r) = env(SUPABASE_SERVICE_ROLE_KEY_ENV) {
        (Some(r), Some(KeyKind::ServiceRole))
    } else if let Some(r) = env(SUPABASE_ANON_KEY_ENV).or_else(|| env(LEGACY_SUPABASE_ANON_KEY_ENV)) {
        warnings.push(format!(
            "{} is not set; using the anon key from {}. Writes may be rejected by row-level security.",
            SUPABASE_SERVICE_ROLE_KEY_ENV, r.source
        ));
        (Some(r), Some(KeyKind::Anon))
    } else {
        (None, None)
    };

    if store.value == StoreBackend::Supabase && (supabase_url.is_none() || supabase_key.is_none()) {
        warnings.push(format!(
            "Supabase store selected but {} or a Supabase key is missing",
            SUPABASE_URL_ENV
        ));
    }

    // Notion
    let notion_key = env(NOTION_KEY_ENV);
    let notion_database_id = env(NOTION_DATABASE_ID_ENV).or_else(|| {
        file.notion
            .database_id
            .clone()
            .map(|id| Resolved::new(id, ValueSource::ConfigFile))
    });
    let notion_api_base = env(NOTION_API_BASE_ENV).or_else(|| {
        file.notion
            .api_base
            .clone()
            .map(|base| Resolved::new(base, ValueSource::ConfigFile))
    });
    let defaults = PropertyNames::default();
    let property = |configured: &Option<String>, default: String| match configured {
        Some(name) => Resolved::new(name.clone(), ValueSource::ConfigFile),
        None => Resolved::new(default, ValueSource::Default),
    };
    let title_property = property(&file.notion.title_property, defaults.title);
    let status_property = property(&file.notion.status_property, defaults.status);
    let priority_property = property(&file.notion.priority_property, defaults.priority);

    // Server
    let host = if let Some(ref host) = overrides.host {
        Resolved::new(host.clone(), ValueSource::CliFlag)
    } else if let Some(ref host) = file.server.host {
        Resolved::new(host.clone(), ValueSource::ConfigFile)
    } else {
        Resolved::new(DEFAULT_HOST.to_string(), ValueSource::Default)
    };
    let port = if let Some(port) = overrides.port {
        Resolved::new(port, ValueSource::CliFlag)
    } else if let Some(port) = file.server.port {
        Resolved::new(port, ValueSource::ConfigFile)
    } else {
        Resolved::new(DEFAULT_PORT, ValueSource::Default)
    };

    let request_timeout_secs = match file.request_timeout_secs {
        Some(secs) => Resolved::new(secs, ValueSource::ConfigFile),
        None => Resolved::new(DEFAULT_REQUEST_TIMEOUT_SECS, ValueSource::Default),
    };

    Ok(ResolvedSettings {
        store,
        sqlite_path,
        supabase_url,
        supabase_key,
        supabase_key_kind,
        notion_key,
        notion_database_id,
        notion_api_base,
        title_property,
        status_property,
        priority_property,
        host,
        port,
        request_timeout_secs,
        warnings,
    })
}
