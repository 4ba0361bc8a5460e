//! File system watcher for the SQLite database.
//!
//! Writes made by other processes (a `dh log` while `dh serve` runs) never
//! pass through this process's store, so the database file itself is watched.
//! SQLite touches the main file plus `-wal`, `-shm` or `-journal` siblings;
//! any of them counts.

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::time::Instant;

use super::ChangeFeed;
use crate::store::WATCHED_TABLES;
use crate::{Error, Result};

/// Wait this long after the last file event before publishing.
const DEBOUNCE_MS: u64 = 100;

/// Watch `db_path` and publish an `Unknown` change for every watched table
/// after each burst of writes.
///
/// Runs until the watcher channel closes.
pub async fn watch_database(db_path: PathBuf, feed: ChangeFeed) -> Result<()> {
    let dir = db_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    let file_name = db_path
        .file_name()
        .and_then(|n| n.to_str())
        .map(str::to_string)
        .ok_or_else(|| Error::InvalidInput(format!("Invalid database path: {}", db_path.display())))?;

    let (tx, mut rx) = tokio::sync::mpsc::channel(100);

    let mut watcher = RecommendedWatcher::new(
        move |res: std::result::Result<Event, notify::Error>| {
            if let Ok(event) = res {
                let _ = tx.blocking_send(event);
            }
        },
        Config::default(),
    )
    .map_err(|e| Error::Other(format!("Failed to create watcher: {}", e)))?;

    watcher
        .watch(&dir, RecursiveMode::NonRecursive)
        .map_err(|e| Error::Other(format!("Failed to watch {}: {}", dir.display(), e)))?;

    tracing::debug!(path = %db_path.display(), "watching database file");

    let mut pending_update = false;
    let mut last_event_time = Instant::now();

    loop {
        let timeout = if pending_update {
            Duration::from_millis(DEBOUNCE_MS).saturating_sub(last_event_time.elapsed())
        } else {
            Duration::from_secs(3600)
        };

        tokio::select! {
            event = rx.recv() => {
                match event {
                    Some(event) => {
                        if is_write(&event) && touches_database(&event, &file_name) {
                            pending_update = true;
                            last_event_time = Instant::now();
                        }
                    }
                    None => break,
                }
            }
            _ = tokio::time::sleep(timeout), if pending_update => {
                feed.publish_all(WATCHED_TABLES);
                pending_update = false;
            }
        }
    }

    Ok(())
}

fn is_write(event: &Event) -> bool {
    matches!(
        event.kind,
        notify::EventKind::Create(_) | notify::EventKind::Modify(_) | notify::EventKind::Remove(_)
    )
}

/// Whether any path in the event is the database file or one of its siblings.
fn touches_database(event: &Event, file_name: &str) -> bool {
    event.paths.iter().any(|path| {
        path.file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with(file_name))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, EventKind, ModifyKind};

    fn event(kind: EventKind, path: &str) -> Event {
        Event::new(kind).add_path(PathBuf::from(path))
    }

    #[test]
    fn test_sibling_files_count_as_database() {
        let name = "deckhand.db";
        for path in [
            "/data/deckhand.db",
            "/data/deckhand.db-wal",
            "/data/deckhand.db-journal",
        ] {
            assert!(touches_database(&event(EventKind::Modify(ModifyKind::Any), path), name));
        }
        assert!(!touches_database(
            &event(EventKind::Modify(ModifyKind::Any), "/data/config.kdl"),
            name
        ));
    }

    #[test]
    fn test_access_events_are_ignored() {
        let access = event(
            EventKind::Access(notify::event::AccessKind::Any),
            "/data/deckhand.db",
        );
        assert!(!is_write(&access));
        assert!(is_write(&event(
            EventKind::Create(CreateKind::File),
            "/data/deckhand.db"
        )));
    }
}
