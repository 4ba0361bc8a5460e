//! Mapping from the external source's vocabulary to task enums.
//!
//! Both functions are total: every input, including absent and empty labels,
//! maps to a variant.

use crate::models::{Priority, TaskStatus};

/// Map an external status label to a [`TaskStatus`].
///
/// Only the exact labels `"Done"` and `"In Progress"` are recognized;
/// everything else is pending, including padded or differently cased labels.
pub fn normalize_status(label: Option<&str>) -> TaskStatus {
    match label {
        Some("Done") => TaskStatus::Done,
        Some("In Progress") => TaskStatus::InProgress,
        _ => TaskStatus::Pending,
    }
}

/// Map an external priority label to a [`Priority`], defaulting to P3.
pub fn normalize_priority(label: Option<&str>) -> Priority {
    label
        .map(str::trim)
        .and_then(Priority::parse)
        .unwrap_or_default()
}
