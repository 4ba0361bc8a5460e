//! CLI argument definitions for deckhand.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::config::{CONFIG_ENV, ConfigOverrides, StoreBackend};
use crate::models::SessionStatus;
use crate::logging::LogFormat;

/// Deckhand - mirror Notion tasks into a local store and watch live agent stats.
///
/// Start with `dh config show` to check where data goes, then `dh sync`.
#[derive(Parser, Debug)]
#[command(name = "dh")]
#[command(author, version, about = "Mirror Notion tasks into Supabase or SQLite and serve a live dashboard", long_about = None)]
pub struct Cli {
    /// Output in human-readable format instead of JSON
    #[arg(short = 'H', long = "human", global = true)]
    pub human_readable: bool,

    /// Path to config.kdl (default: ~/.config/deckhand/config.kdl)
    #[arg(long = "config", global = true, env = CONFIG_ENV)]
    pub config_path: Option<PathBuf>,

    /// Store backend, overriding DECKHAND_STORE and config.kdl
    #[arg(long, global = true, value_parser = parse_store_backend)]
    pub store: Option<StoreBackend>,

    /// SQLite database file, overriding DECKHAND_SQLITE_PATH and config.kdl
    #[arg(long, global = true)]
    pub sqlite_path: Option<PathBuf>,

    /// Log line format
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    /// Write logs to this file instead of stderr
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Flags that take precedence over the environment and config file.
    pub fn overrides(&self) -> ConfigOverrides {
        let (host, port) = match &self.command {
            Commands::Serve { host, port } => (host.clone(), *port),
            _ => (None, None),
        };
        ConfigOverrides {
            store: self.store,
            sqlite_path: self.sqlite_path.clone(),
            host,
            port,
        }
    }
}

fn parse_store_backend(s: &str) -> Result<StoreBackend, String> {
    StoreBackend::parse(s).ok_or_else(|| format!("expected \"sqlite\" or \"supabase\", got \"{}\"", s))
}

fn parse_session_status(s: &str) -> Result<SessionStatus, String> {
    SessionStatus::parse(s)
        .ok_or_else(|| format!("expected \"active\", \"paused\" or \"stopped\", got \"{}\"", s))
}

/// Top-level commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the dashboard server with live stats
    Serve {
        /// Address to bind (default: 127.0.0.1)
        #[arg(long)]
        host: Option<String>,

        /// Port to listen on (default: 3000)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Pull the Notion task list into the store (one pass)
    Sync,

    /// Show dashboard counters
    Stats,

    /// List mirrored tasks, newest first
    Tasks,

    /// List agent sessions
    Sessions,

    /// Register or update an agent session
    Session {
        /// Session key (e.g., "agent-1")
        key: String,

        /// Lifecycle state: active, paused or stopped (new sessions: active)
        #[arg(long, value_parser = parse_session_status)]
        status: Option<SessionStatus>,

        /// Agent configuration in use
        #[arg(long)]
        model: Option<String>,

        /// Tokens consumed so far (may not decrease)
        #[arg(long)]
        tokens: Option<u64>,
    },

    /// List recent activity, newest first
    Activity {
        /// Maximum entries to show (capped at 100)
        #[arg(short = 'n', long, default_value_t = 20)]
        limit: usize,
    },

    /// Append an entry to the activity log
    Log {
        /// Action name (e.g., "task.started")
        action: String,

        /// Who performed the action (default: current user)
        #[arg(long)]
        actor: Option<String>,

        /// JSON object with extra details
        #[arg(long)]
        details: Option<String>,
    },

    /// Configuration commands
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

/// Configuration subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Show resolved settings and where each came from (secrets masked)
    Show,
}
