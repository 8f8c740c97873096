//! Engine error taxonomy.
//!
//! Validation, conflict and state errors are caller mistakes and are never
//! retried. Transient store errors are retried a bounded number of times
//! before they surface here.

use std::fmt;

use thiserror::Error;

use crate::domain::{InterruptType, Status};

use super::store::StoreError;

/// Named conflict codes for plan-scoped signals that must be unique
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictCode {
    PauseAllAlready,
    ResumeAllAlready,
    AbortAllAlready,
}

impl ConflictCode {
    /// Conflict code raised when a second active interrupt of this type is requested
    pub fn for_type(interrupt_type: InterruptType) -> Option<Self> {
        match interrupt_type {
            InterruptType::PauseAll => Some(ConflictCode::PauseAllAlready),
            InterruptType::ResumeAll => Some(ConflictCode::ResumeAllAlready),
            InterruptType::AbortAll => Some(ConflictCode::AbortAllAlready),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictCode::PauseAllAlready => "PAUSE_ALL_ALREADY",
            ConflictCode::ResumeAllAlready => "RESUME_ALL_ALREADY",
            ConflictCode::AbortAllAlready => "ABORT_ALL_ALREADY",
        }
    }
}

impl fmt::Display for ConflictCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors surfaced by interrupt registration and application
#[derive(Debug, Error)]
pub enum InterruptError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("{code}: an active interrupt already exists for plan execution {plan_execution_id}")]
    Conflict {
        code: ConflictCode,
        plan_execution_id: String,
    },

    #[error("Invalid status transition for {entity} {id}: {from} -> {to}")]
    InvalidTransition {
        entity: &'static str,
        id: String,
        from: Status,
        to: Status,
    },

    #[error("No handler registered for interrupt type {0}")]
    UnsupportedInterruptType(InterruptType),

    #[error("{0} handling not required for overall plan")]
    NotRequired(InterruptType),

    #[error("Step runtime failed: {0}")]
    Runtime(String),

    /// Registration succeeded but applying the interrupt did not. The
    /// interrupt stays `PROCESSING` for an operator to reconcile.
    #[error("Interrupt {interrupt_id} left in PROCESSING: {source}")]
    ApplyFailed {
        interrupt_id: String,
        #[source]
        source: Box<InterruptError>,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl InterruptError {
    pub fn invalid_request(message: impl Into<String>) -> Self {
        InterruptError::InvalidRequest(message.into())
    }

    /// The conflict code, if this is a conflict error
    pub fn conflict_code(&self) -> Option<ConflictCode> {
        match self {
            InterruptError::Conflict { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// The error that caused an apply failure, or `self`
    pub fn root(&self) -> &InterruptError {
        match self {
            InterruptError::ApplyFailed { source, .. } => source.root(),
            other => other,
        }
    }

    /// Only transient store failures are worth retrying
    pub fn is_retryable(&self) -> bool {
        matches!(self, InterruptError::Store(e) if e.is_transient())
    }
}
