//! Task status transition guard.
//!
//! ```text
//! CREATED ──start──▶ IN_PROGRESS ──complete──▶ COMPLETED
//!    │                    │
//!    └──cancel──┬─────────┘
//!               ▼
//!           CANCELLED
//! ```

use vendhub_core::error::{Result, VendHubError};
use vendhub_core::types::TaskStatus;

/// Statuses reachable from `from` in one step.
pub fn allowed_targets(from: TaskStatus) -> &'static [TaskStatus] {
    match from {
        TaskStatus::Created => &[TaskStatus::InProgress, TaskStatus::Cancelled],
        TaskStatus::InProgress => &[TaskStatus::Completed, TaskStatus::Cancelled],
        TaskStatus::Completed | TaskStatus::Cancelled => &[],
    }
}

pub fn can_transition(from: TaskStatus, to: TaskStatus) -> bool {
    allowed_targets(from).contains(&to)
}

/// `Ok` if the edge is legal, `InvalidTransition` otherwise.
pub fn check_transition(from: TaskStatus, to: TaskStatus) -> Result<()> {
    if can_transition(from, to) {
        Ok(())
    } else {
        Err(VendHubError::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        })
    }
}
