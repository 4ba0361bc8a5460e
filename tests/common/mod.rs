//! Common test utilities for deckhand integration tests.
//!
//! Provides `TestEnv` for isolated test environments that never touch the
//! user's config file, data directory or Notion/Supabase credentials.

#![allow(dead_code)]

use assert_cmd::Command;
use std::path::{Path, PathBuf};
pub use tempfile::TempDir;

/// Variables that would point `dh` at real services.
const SCRUBBED_ENV: &[&str] = &[
    "DECKHAND_STORE",
    "DECKHAND_LOG",
    "NOTION_KEY",
    "NOTION_DATABASE_ID",
    "SUPABASE_URL",
    "SUPABASE_SERVICE_ROLE_KEY",
    "SUPABASE_ANON_KEY",
    "NEXT_PUBLIC_SUPABASE_URL",
    "NEXT_PUBLIC_SUPABASE_ANON_KEY",
];

/// A test environment with an isolated SQLite store and config file.
///
/// The `dh()` method returns a `Command` with `DECKHAND_SQLITE_PATH` and
/// `DECKHAND_CONFIG` set per-invocation, making tests parallel-safe.
pub struct TestEnv {
    pub data_dir: TempDir,
}

impl TestEnv {
    pub fn new() -> Self {
        Self {
            data_dir: TempDir::new().unwrap(),
        }
    }

    /// Get a Command for the dh binary bound to this environment.
    pub fn dh(&self) -> Command {
        let mut cmd = Command::new(env!("CARGO_BIN_EXE_dh"));
        cmd.current_dir(self.data_dir.path());
        for name in SCRUBBED_ENV {
            cmd.env_remove(name);
        }
        cmd.env("DECKHAND_SQLITE_PATH", self.db_path());
        cmd.env("DECKHAND_CONFIG", self.config_path());
        cmd
    }

    pub fn data_path(&self) -> &Path {
        self.data_dir.path()
    }

    pub fn db_path(&self) -> PathBuf {
        self.data_dir.path().join("deckhand.db")
    }

    pub fn config_path(&self) -> PathBuf {
        self.data_dir.path().join("config.kdl")
    }

    /// Write config.kdl for this environment.
    pub fn write_config(&self, contents: &str) {
        std::fs::write(self.config_path(), contents).unwrap();
    }
}

impl Default for TestEnv {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse JSON from command output.
pub fn parse_json(output: &[u8]) -> serde_json::Value {
    serde_json::from_slice(output).unwrap_or_else(|e| {
        panic!(
            "Invalid JSON ({}): {}",
            e,
            String::from_utf8_lossy(output)
        )
    })
}
