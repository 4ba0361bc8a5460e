//! Derived dashboard counters.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One dashboard counter.
///
/// A failed store read is reported as `Unknown` so that a real zero can be
/// told apart from a count that could not be taken.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Counter {
    Known { value: u64 },
    Unknown { reason: String },
}

impl Counter {
    pub fn known(value: u64) -> Self {
        Counter::Known { value }
    }

    pub fn unknown(reason: impl Into<String>) -> Self {
        Counter::Unknown {
            reason: reason.into(),
        }
    }

    /// The count, if it was taken.
    pub fn value(&self) -> Option<u64> {
        match self {
            Counter::Known { value } => Some(*value),
            Counter::Unknown { .. } => None,
        }
    }

    /// The count, with unknown collapsed to zero.
    pub fn value_or_zero(&self) -> u64 {
        self.value().unwrap_or(0)
    }

    pub fn is_known(&self) -> bool {
        matches!(self, Counter::Known { .. })
    }
}

impl Default for Counter {
    fn default() -> Self {
        Counter::known(0)
    }
}

/// Dashboard statistics, recomputed from the store; never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardStats {
    pub pending_tasks: Counter,
    pub completed_tasks: Counter,
    pub total_activities: Counter,
    pub active_sessions: Counter,
    pub computed_at: DateTime<Utc>,
}

impl DashboardStats {
    /// All counters known and zero.
    pub fn empty() -> Self {
        Self {
            pending_tasks: Counter::default(),
            completed_tasks: Counter::default(),
            total_activities: Counter::default(),
            active_sessions: Counter::default(),
            computed_at: Utc::now(),
        }
    }

    /// Whether any counter could not be taken.
    pub fn is_degraded(&self) -> bool {
        !(self.pending_tasks.is_known()
            && self.completed_tasks.is_known()
            && self.total_activities.is_known()
            && self.active_sessions.is_known())
    }

    /// Same counters, ignoring when they were computed.
    pub fn same_counts(&self, other: &DashboardStats) -> bool {
        self.pending_tasks == other.pending_tasks
            && self.completed_tasks == other.completed_tasks
            && self.total_activities == other.total_activities
            && self.active_sessions == other.active_sessions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter_serialization() {
        let known = serde_json::to_value(Counter::known(3)).unwrap();
        assert_eq!(known, serde_json::json!({"state": "known", "value": 3}));

        let unknown = serde_json::to_value(Counter::unknown("timeout")).unwrap();
        assert_eq!(
            unknown,
            serde_json::json!({"state": "unknown", "reason": "timeout"})
        );
    }

    #[test]
    fn test_unknown_collapses_to_zero() {
        assert_eq!(Counter::unknown("boom").value_or_zero(), 0);
        assert_eq!(Counter::unknown("boom").value(), None);
        assert_eq!(Counter::known(7).value_or_zero(), 7);
    }

    #[test]
    fn test_stats_field_names_are_camel_case() {
        let value = serde_json::to_value(DashboardStats::empty()).unwrap();
        assert!(value.get("pendingTasks").is_some());
        assert!(value.get("completedTasks").is_some());
        assert!(value.get("totalActivities").is_some());
        assert!(value.get("activeSessions").is_some());
        assert!(value.get("computedAt").is_some());
    }

    #[test]
    fn test_is_degraded() {
        let mut stats = DashboardStats::empty();
        assert!(!stats.is_degraded());
        stats.active_sessions = Counter::unknown("store offline");
        assert!(stats.is_degraded());
    }
}
