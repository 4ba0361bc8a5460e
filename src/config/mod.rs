//! Configuration for deckhand.
//!
//! ## config.kdl
//!
//! Located at `--config <path>`, `$DECKHAND_CONFIG`, or
//! `~/.config/deckhand/config.kdl`. A missing file is an empty config.
//!
//! Contains:
//! - `store` - "sqlite" or "supabase"
//! - `supabase-url`, `sqlite-path`, `request-timeout-secs`
//! - `notion` block - database id and property names
//! - `server` block - host and port for `dh serve`
//!
//! ## Secrets
//!
//! `NOTION_KEY` and the Supabase keys are read from the environment only.
//!
//! Use the [`resolver`] module for precedence resolution.

pub mod resolver;
pub mod schema;

pub use resolver::{
    ConfigOverrides, KeyKind, NotionSettings, Resolved, ResolvedSettings, StoreSettings,
    SupabaseSettings, ValueSource, resolve_settings, resolve_settings_with_env,
};
pub use schema::{DeckhandConfig, NotionSection, ServerSection, StoreBackend};

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::{Error, Result};

/// Environment variable naming the config file.
pub const CONFIG_ENV: &str = "DECKHAND_CONFIG";

/// Default config file location: `~/.config/deckhand/config.kdl`.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("deckhand").join("config.kdl"))
}

/// Read config.kdl; a missing file yields an empty config.
pub fn load_config(path: &Path) -> Result<DeckhandConfig> {
    match fs::read_to_string(path) {
        Ok(text) => DeckhandConfig::parse(&text)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e))),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(DeckhandConfig::default()),
        Err(e) => Err(Error::Io(e)),
    }
}
