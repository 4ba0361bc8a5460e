//! Tracing subscriber setup for `dh`.
//!
//! Logs go to stderr (or a file) so stdout stays reserved for command output.

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use crate::{Error, Result};

/// Environment variable holding the log filter directives.
pub const LOG_ENV: &str = "DECKHAND_LOG";

/// Log line format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Build the filter from `DECKHAND_LOG`, falling back to `info`.
pub fn env_filter() -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install the global subscriber.
///
/// With `file` set, lines are appended through a non-blocking writer and the
/// returned guard must be held until exit so buffered lines are flushed.
pub fn init(format: LogFormat, file: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let (writer, guard) = match file {
        Some(path) => {
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            let name = path
                .file_name()
                .ok_or_else(|| Error::InvalidInput(format!("Invalid log file: {}", path.display())))?;
            std::fs::create_dir_all(dir)?;
            let appender = tracing_appender::rolling::never(dir, name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (tracing_subscriber::fmt::writer::BoxMakeWriter::new(writer), Some(guard))
        }
        None => (
            tracing_subscriber::fmt::writer::BoxMakeWriter::new(std::io::stderr),
            None,
        ),
    };

    let ansi = file.is_none();
    let registry = tracing_subscriber::registry().with(env_filter());
    let installed = match format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(writer))
            .try_init(),
        LogFormat::Text => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_ansi(ansi)
                    .with_writer(writer),
            )
            .try_init(),
    };
    installed.map_err(|e| Error::Other(format!("Failed to install logger: {}", e)))?;

    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::TestEnv;

    #[test]
    fn test_log_file_receives_json_lines() {
        let env = TestEnv::new();
        let path = env.data_path().join("logs").join("dh.log");

        let guard = init(LogFormat::Json, Some(&path)).unwrap();
        tracing::info!(count = 3, "sync finished");
        drop(guard);

        let contents = std::fs::read_to_string(&path).unwrap();
        let line = contents.lines().next().expect("one log line");
        let parsed: serde_json::Value = serde_json::from_str(line).unwrap();
        assert_eq!(parsed["fields"]["message"], "sync finished");
        assert_eq!(parsed["fields"]["count"], 3);
    }
}
