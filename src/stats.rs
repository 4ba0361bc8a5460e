//! Dashboard statistics.
//!
//! [`StatsEngine`] derives the four counters from the store on demand.
//! [`LiveStats`] keeps a current snapshot by recomputing the whole tuple
//! whenever any watched table changes; there is no incremental path.

use std::sync::Arc;
use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;

use crate::feed::{ChangeFeed, Subscription};
use crate::models::{Counter, DashboardStats, SessionStatus, TaskStatus};
use crate::store::{Filter, Store, Table, WATCHED_TABLES};

/// Computes [`DashboardStats`] from a store.
pub struct StatsEngine {
    store: Arc<dyn Store>,
}

impl StatsEngine {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Take all four counts.
    ///
    /// Each count is its own query; a failed one becomes
    /// [`Counter::Unknown`] without affecting the others.
    pub async fn compute_stats(&self) -> DashboardStats {
        let pending = Filter::status(TaskStatus::Pending.as_str());
        let done = Filter::status(TaskStatus::Done.as_str());
        let active = Filter::status(SessionStatus::Active.as_str());

        let (pending_tasks, completed_tasks, total_activities, active_sessions) = tokio::join!(
            self.counter("pendingTasks", Table::Tasks, &pending),
            self.counter("completedTasks", Table::Tasks, &done),
            self.counter("totalActivities", Table::ActivityLog, &Filter::All),
            self.counter("activeSessions", Table::Sessions, &active),
        );

        DashboardStats {
            pending_tasks,
            completed_tasks,
            total_activities,
            active_sessions,
            computed_at: chrono::Utc::now(),
        }
    }

    async fn counter(&self, field: &'static str, table: Table, filter: &Filter) -> Counter {
        match self.store.count(table, filter).await {
            Ok(value) => Counter::known(value),
            Err(e) => {
                tracing::warn!(field, %table, error = %e, "count failed; reporting unknown");
                Counter::unknown(e.to_string())
            }
        }
    }
}

/// A continuously refreshed stats snapshot.
///
/// Change events only mark the snapshot stale; a burst of events while a
/// recompute is running results in exactly one more recompute.
pub struct LiveStats {
    rx: watch::Receiver<DashboardStats>,
    subscriptions: Vec<Subscription>,
    worker: Option<JoinHandle<()>>,
}

impl LiveStats {
    /// Subscribe to every watched table and compute the initial snapshot.
    pub async fn start(engine: Arc<StatsEngine>, feed: &ChangeFeed) -> Self {
        let stale = Arc::new(Notify::new());

        // Subscribe before the first computation so no change is missed
        let subscriptions = WATCHED_TABLES
            .iter()
            .map(|table| {
                let stale = Arc::clone(&stale);
                feed.subscribe(*table, move |_| stale.notify_one())
            })
            .collect();

        let (tx, rx) = watch::channel(engine.compute_stats().await);

        let worker = tokio::spawn(async move {
            loop {
                stale.notified().await;
                let stats = engine.compute_stats().await;
                tx.send_if_modified(|current| {
                    if current.same_counts(&stats) {
                        false
                    } else {
                        tracing::debug!(?stats, "stats changed");
                        *current = stats;
                        true
                    }
                });
            }
        });

        Self {
            rx,
            subscriptions,
            worker: Some(worker),
        }
    }

    /// Receiver notified whenever the counters change.
    pub fn subscribe(&self) -> watch::Receiver<DashboardStats> {
        self.rx.clone()
    }

    /// Latest snapshot.
    pub fn current(&self) -> DashboardStats {
        self.rx.borrow().clone()
    }

    /// Release every table subscription and stop recomputing.
    pub fn shutdown(mut self) {
        for subscription in self.subscriptions.drain(..) {
            subscription.unsubscribe();
        }
        if let Some(worker) = self.worker.take() {
            worker.abort();
        }
    }
}

impl Drop for LiveStats {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NewActivity, Priority, Session, TaskRecord};
    use crate::store::SqliteStore;
    use crate::test_utils::{FlakyStore, TestEnv};
    use std::time::Duration;

    async fn seed_task(store: &SqliteStore, id: &str, status: TaskStatus) {
        store
            .upsert_task(&TaskRecord {
                external_id: id.to_string(),
                title: id.to_uppercase(),
                status,
                priority: Priority::P3,
            })
            .await
            .unwrap();
    }

    /// Wait until the live snapshot satisfies `done`.
    async fn wait_for(
        rx: &mut watch::Receiver<DashboardStats>,
        done: impl Fn(&DashboardStats) -> bool,
    ) -> DashboardStats {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let stats = rx.borrow_and_update().clone();
                if done(&stats) {
                    return stats;
                }
                rx.changed().await.unwrap();
            }
        })
        .await
        .expect("stats did not converge")
    }

    #[tokio::test]
    async fn test_compute_stats_counts_each_field() {
        let env = TestEnv::new();
        let store = env.open_store();
        seed_task(&store, "a", TaskStatus::Pending).await;
        seed_task(&store, "b", TaskStatus::InProgress).await;
        seed_task(&store, "c", TaskStatus::Done).await;
        store
            .record_session(&Session {
                session_key: "s1".to_string(),
                status: crate::models::SessionStatus::Active,
                model: "worker".to_string(),
                started_at: chrono::Utc::now(),
                token_usage: 10,
            })
            .await
            .unwrap();
        store
            .append_activity(&NewActivity {
                actor: None,
                action: "sync".to_string(),
                details: serde_json::Value::Null,
            })
            .await
            .unwrap();

        let stats = StatsEngine::new(Arc::new(store)).compute_stats().await;
        assert_eq!(stats.pending_tasks, Counter::known(1));
        assert_eq!(stats.completed_tasks, Counter::known(1));
        assert_eq!(stats.total_activities, Counter::known(1));
        assert_eq!(stats.active_sessions, Counter::known(1));
        assert!(!stats.is_degraded());
    }

    #[tokio::test]
    async fn test_failed_count_is_unknown_for_that_field_only() {
        let env = TestEnv::new();
        let store = env.open_store();
        seed_task(&store, "a", TaskStatus::Pending).await;
        let flaky = FlakyStore::new(store).fail_counts_on(Table::Sessions);

        let stats = StatsEngine::new(Arc::new(flaky)).compute_stats().await;
        assert_eq!(stats.pending_tasks, Counter::known(1));
        assert_eq!(stats.completed_tasks, Counter::known(0));
        assert!(!stats.active_sessions.is_known());
        assert_eq!(stats.active_sessions.value_or_zero(), 0);
        assert!(stats.is_degraded());
    }

    #[tokio::test]
    async fn test_live_stats_follow_status_transition() {
        let env = TestEnv::new();
        let store = Arc::new(env.open_store());
        for id in ["p1", "p2", "p3"] {
            seed_task(&store, id, TaskStatus::Pending).await;
        }
        for id in ["d1", "d2"] {
            seed_task(&store, id, TaskStatus::Done).await;
        }

        let feed = ChangeFeed::new();
        let _connection = store.connect_feed(&feed).unwrap();
        let engine = Arc::new(StatsEngine::new(Arc::clone(&store) as Arc<dyn Store>));
        let live = LiveStats::start(engine, &feed).await;

        let initial = live.current();
        assert_eq!(initial.pending_tasks, Counter::known(3));
        assert_eq!(initial.completed_tasks, Counter::known(2));

        seed_task(&store, "p1", TaskStatus::Done).await;

        let mut rx = live.subscribe();
        let stats = wait_for(&mut rx, |s| s.pending_tasks == Counter::known(2)).await;
        assert_eq!(stats.pending_tasks, Counter::known(2));
        assert_eq!(stats.completed_tasks, Counter::known(3));

        live.shutdown();
    }

    #[tokio::test]
    async fn test_shutdown_releases_every_subscription() {
        let env = TestEnv::new();
        let store: Arc<dyn Store> = Arc::new(env.open_store());
        let feed = ChangeFeed::new();

        let live = LiveStats::start(Arc::new(StatsEngine::new(store)), &feed).await;
        assert_eq!(feed.active_subscriptions(), WATCHED_TABLES.len());

        live.shutdown();
        assert_eq!(feed.active_subscriptions(), 0);
    }

    #[tokio::test]
    async fn test_dropping_live_stats_releases_subscriptions() {
        let env = TestEnv::new();
        let store: Arc<dyn Store> = Arc::new(env.open_store());
        let feed = ChangeFeed::new();

        {
            let _live = LiveStats::start(Arc::new(StatsEngine::new(store)), &feed).await;
            assert_eq!(feed.active_subscriptions(), WATCHED_TABLES.len());
        }
        assert_eq!(feed.active_subscriptions(), 0);
    }
}
