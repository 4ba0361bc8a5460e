//! KDL schema for config.kdl.
//!
//! Every field is optional; anything left out falls through to the
//! environment or a built-in default during resolution. Secrets are never read
//! from this file.

use kdl::{KdlDocument, KdlNode};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::{Error, Result};

/// Which local store backend to use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Local SQLite file (default)
    #[default]
    Sqlite,
    /// Hosted Supabase project
    Supabase,
}

impl StoreBackend {
    /// Parse from string, case-insensitive.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "sqlite" => Some(StoreBackend::Sqlite),
            "supabase" => Some(StoreBackend::Supabase),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StoreBackend::Sqlite => "sqlite",
            StoreBackend::Supabase => "supabase",
        }
    }
}

impl std::fmt::Display for StoreBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The `notion { ... }` block.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NotionSection {
    pub database_id: Option<String>,
    pub api_base: Option<String>,
    pub title_property: Option<String>,
    pub status_property: Option<String>,
    pub priority_property: Option<String>,
}

/// The `server { ... }` block.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerSection {
    pub host: Option<String>,
    pub port: Option<u16>,
}

/// Settings stored in config.kdl.
///
/// # KDL Schema
///
/// ```kdl
/// store "supabase"
/// supabase-url "https://xyz.supabase.co"
/// sqlite-path "/var/lib/deckhand/deckhand.db"
/// request-timeout-secs 30
/// notion {
///     database-id "0123abcd"
///     status-property "Status"
/// }
/// server {
///     host "0.0.0.0"
///     port 8080
/// }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeckhandConfig {
    pub store: Option<StoreBackend>,
    pub supabase_url: Option<String>,
    pub sqlite_path: Option<PathBuf>,
    pub request_timeout_secs: Option<u64>,
    pub notion: NotionSection,
    pub server: ServerSection,
}

impl DeckhandConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse config text.
    pub fn parse(text: &str) -> Result<Self> {
        let doc: KdlDocument = text
            .parse()
            .map_err(|e: kdl::KdlError| Error::Config(format!("Invalid config.kdl: {}", e)))?;
        Self::from_kdl(&doc)
    }

    /// Read config from a KDL document.
    ///
    /// Unknown nodes are ignored; known nodes with invalid values are errors.
    pub fn from_kdl(doc: &KdlDocument) -> Result<Self> {
        let mut config = Self::new();

        if let Some(value) = string_value(doc, "store") {
            config.store = Some(StoreBackend::parse(&value).ok_or_else(|| {
                Error::Config(format!(
                    "store must be \"sqlite\" or \"supabase\", got \"{}\"",
                    value
                ))
            })?);
        }

        config.supabase_url = string_value(doc, "supabase-url");
        config.sqlite_path = string_value(doc, "sqlite-path").map(PathBuf::from);

        if let Some(secs) = integer_value(doc, "request-timeout-secs") {
            if !(1..=600).contains(&secs) {
                return Err(Error::Config(format!(
                    "request-timeout-secs must be 1-600, got {}",
                    secs
                )));
            }
            config.request_timeout_secs = Some(secs as u64);
        }

        if let Some(notion) = doc.get("notion").and_then(KdlNode::children) {
            config.notion = NotionSection {
                database_id: string_value(notion, "database-id"),
                api_base: string_value(notion, "api-base"),
                title_property: string_value(notion, "title-property"),
                status_property: string_value(notion, "status-property"),
                priority_property: string_value(notion, "priority-property"),
            };
        }

        if let Some(server) = doc.get("server").and_then(KdlNode::children) {
            config.server.host = string_value(server, "host");
            if let Some(port) = integer_value(server, "port") {
                let port = u16::try_from(port)
                    .ok()
                    .filter(|p| *p != 0)
                    .ok_or_else(|| Error::Config(format!("server port must be 1-65535, got {}", port)))?;
                config.server.port = Some(port);
            }
        }

        if doc.get("notion-key").is_some() || doc.get("supabase-key").is_some() {
            tracing::warn!("config.kdl contains a key entry; keys are only read from the environment");
        }

        Ok(config)
    }
}

/// First argument of `name` as a string.
fn string_value(doc: &KdlDocument, name: &str) -> Option<String> {
    doc.get(name)?
        .entries()
        .first()?
        .value()
        .as_string()
        .map(str::to_string)
}

/// First argument of `name` as an integer.
fn integer_value(doc: &KdlDocument, name: &str) -> Option<i128> {
    doc.get(name)?.entries().first()?.value().as_integer()
}
