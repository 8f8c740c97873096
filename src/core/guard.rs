//! Status transition guard.
//!
//! Pure rules deciding which status transitions are legal for nodes and
//! plans. Every handler consults these before mutating state, and the same
//! allowed-from sets are handed to the store so the update is conditional on
//! the authoritative current status.

use crate::domain::{ExecutionMode, Status};

/// Statuses that may be paused
pub const ACTIVE_STATUSES: &[Status] = &[Status::Queued, Status::Running];

/// Statuses from which a leaf node may be retried
pub const RETRYABLE_STATUSES: &[Status] = &[Status::Failed, Status::Expired, Status::Aborted];

/// Statuses that have not reached an end state
pub const NON_FINAL_STATUSES: &[Status] = &[
    Status::Queued,
    Status::Running,
    Status::Pausing,
    Status::Paused,
    Status::Discontinuing,
];

/// Whether a node in `current` status and `mode` may move to `target`
pub fn can_transition(current: Status, target: Status, mode: ExecutionMode) -> bool {
    node_allowed_start_set(target, mode).contains(&current)
}

/// Whether a plan in `current` status may move to `target`
pub fn can_transition_plan(current: Status, target: Status) -> bool {
    plan_allowed_start_set(target).contains(&current)
}

/// Statuses a node may be in when moving to `target`
pub fn node_allowed_start_set(target: Status, mode: ExecutionMode) -> Vec<Status> {
    match target {
        Status::Queued if mode.is_leaf() => RETRYABLE_STATUSES.to_vec(),
        Status::Queued => Vec::new(),
        Status::Running => vec![Status::Queued, Status::Paused],
        Status::Pausing => Vec::new(),
        Status::Paused => ACTIVE_STATUSES.to_vec(),
        Status::Discontinuing => vec![Status::Queued, Status::Running, Status::Paused],
        Status::Aborted => vec![
            Status::Queued,
            Status::Running,
            Status::Paused,
            Status::Discontinuing,
        ],
        Status::Failed | Status::Expired => NON_FINAL_STATUSES.to_vec(),
        Status::Succeeded => {
            let mut allowed = NON_FINAL_STATUSES.to_vec();
            allowed.extend([Status::Failed, Status::Expired]);
            allowed
        }
    }
}

/// Statuses a plan may be in when moving to `target`
pub fn plan_allowed_start_set(target: Status) -> Vec<Status> {
    match target {
        Status::Queued => Vec::new(),
        Status::Running => {
            let mut allowed = vec![Status::Queued, Status::Pausing, Status::Paused];
            allowed.extend_from_slice(RETRYABLE_STATUSES);
            allowed
        }
        Status::Pausing => vec![Status::Running],
        Status::Paused => vec![Status::Running, Status::Pausing],
        Status::Discontinuing => vec![Status::Queued, Status::Running, Status::Pausing, Status::Paused],
        Status::Aborted => NON_FINAL_STATUSES.to_vec(),
        Status::Failed | Status::Expired => NON_FINAL_STATUSES.to_vec(),
        Status::Succeeded => {
            let mut allowed = NON_FINAL_STATUSES.to_vec();
            allowed.extend([Status::Failed, Status::Expired]);
            allowed
        }
    }
}

/// Whether a node may be retried directly
pub fn is_retryable(status: Status, mode: ExecutionMode) -> bool {
    mode.is_leaf() && RETRYABLE_STATUSES.contains(&status)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_active_statuses_pause() {
        for status in Status::ALL {
            let expected = matches!(status, Status::Queued | Status::Running);
            assert_eq!(
                can_transition(status, Status::Paused, ExecutionMode::Leaf),
                expected,
                "{} -> PAUSED",
                status
            );
        }
    }

    #[test]
    fn test_retry_is_leaf_only() {
        for status in RETRYABLE_STATUSES {
            assert!(can_transition(*status, Status::Queued, ExecutionMode::Leaf));
            assert!(!can_transition(*status, Status::Queued, ExecutionMode::Parent));
            assert!(is_retryable(*status, ExecutionMode::Leaf));
            assert!(!is_retryable(*status, ExecutionMode::Parent));
        }

        assert!(!can_transition(Status::Succeeded, Status::Queued, ExecutionMode::Leaf));
        assert!(!can_transition(Status::Running, Status::Queued, ExecutionMode::Leaf));
    }

    #[test]
    fn test_no_self_transitions() {
        for status in Status::ALL {
            assert!(!can_transition(status, status, ExecutionMode::Leaf), "{}", status);
            assert!(!can_transition(status, status, ExecutionMode::Parent), "{}", status);
            assert!(!can_transition_plan(status, status), "{}", status);
        }
    }

    #[test]
    fn test_mark_failed_from_any_non_final() {
        for status in NON_FINAL_STATUSES {
            assert!(can_transition(*status, Status::Failed, ExecutionMode::Leaf));
        }
        assert!(!can_transition(Status::Succeeded, Status::Failed, ExecutionMode::Leaf));
        assert!(can_transition(Status::Failed, Status::Succeeded, ExecutionMode::Leaf));
    }

    #[test]
    fn test_plan_pause_and_resume() {
        assert!(can_transition_plan(Status::Running, Status::Pausing));
        assert!(can_transition_plan(Status::Pausing, Status::Paused));
        assert!(can_transition_plan(Status::Paused, Status::Running));
        assert!(can_transition_plan(Status::Failed, Status::Running));
        assert!(!can_transition_plan(Status::Succeeded, Status::Running));
    }
}
