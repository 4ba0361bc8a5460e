//! Reconciliation of the external task list into the local store.
//!
//! A pass is one-directional: Notion is authoritative and the store is
//! overwritten row by row, keyed by `notion_id`. Rows that disappear from
//! Notion are left in place.

use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;

use crate::models::{TaskRecord, UNTITLED};
use crate::normalize::{normalize_priority, normalize_status};
use crate::notion::{ExternalTask, TaskSource};
use crate::store::Store;
use crate::{Error, Result};

/// Result of a successful pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncReport {
    /// External records processed
    pub count: usize,
    /// The source had more rows than were read
    pub truncated: bool,
}

/// Wire form of a pass, as returned by `POST /api/sync` and `dh sync`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum SyncOutcome {
    Success {
        success: bool,
        count: usize,
        #[serde(skip_serializing_if = "std::ops::Not::not")]
        truncated: bool,
    },
    Failure {
        success: bool,
        error: String,
    },
}

impl SyncOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, SyncOutcome::Success { .. })
    }
}

impl From<&Result<SyncReport>> for SyncOutcome {
    fn from(result: &Result<SyncReport>) -> Self {
        match result {
            Ok(report) => SyncOutcome::Success {
                success: true,
                count: report.count,
                truncated: report.truncated,
            },
            Err(e) => SyncOutcome::Failure {
                success: false,
                error: e.to_string(),
            },
        }
    }
}

/// Build the normalized write shape for one external record.
pub fn to_record(task: &ExternalTask) -> TaskRecord {
    let title = task
        .title
        .as_deref()
        .filter(|t| !t.is_empty())
        .unwrap_or(UNTITLED);

    TaskRecord {
        external_id: task.id.clone(),
        title: title.to_string(),
        status: normalize_status(task.status.as_deref()),
        priority: normalize_priority(task.priority.as_deref()),
    }
}

/// Pulls the external task list and upserts it into the store.
pub struct SyncEngine {
    source: Arc<dyn TaskSource>,
    store: Arc<dyn Store>,
}

impl SyncEngine {
    pub fn new(source: Arc<dyn TaskSource>, store: Arc<dyn Store>) -> Self {
        Self { source, store }
    }

    /// Run one pass.
    ///
    /// Stops at the first failed upsert; rows written before it stay written.
    pub async fn sync(&self) -> Result<SyncReport> {
        let started = Instant::now();
        let source = self.source.describe();

        let snapshot = match self.source.fetch_tasks().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                tracing::error!(%source, error = %e, "sync fetch failed");
                return Err(Error::ExternalFetch(e));
            }
        };

        if snapshot.truncated {
            tracing::warn!(
                %source,
                read = snapshot.tasks.len(),
                "source has more tasks than one page; only the first page was synced"
            );
        }

        for (written, task) in snapshot.tasks.iter().enumerate() {
            let record = to_record(task);
            if let Err(e) = self.store.upsert_task(&record).await {
                tracing::error!(
                    %source,
                    external_id = %record.external_id,
                    written,
                    error = %e,
                    "sync aborted on upsert failure"
                );
                return Err(e);
            }
        }

        let report = SyncReport {
            count: snapshot.tasks.len(),
            truncated: snapshot.truncated,
        };
        tracing::info!(
            %source,
            store = self.store.backend(),
            count = report.count,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "sync complete"
        );
        Ok(report)
    }
}
