//! Interrupts: out-of-band control signals targeting a plan or a node.
//!
//! An interrupt is created by `register()`, moved through its lifecycle by
//! `apply()` or a fan-in callback, and never deleted. It stays behind as
//! audit history once it reaches a terminal state.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use super::status::Status;

/// Kind of control signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InterruptType {
    /// Pause every active node of a plan
    PauseAll,

    /// Resume every node paused by a `PauseAll`
    ResumeAll,

    /// Re-queue a failed leaf node
    Retry,

    /// Force a node or plan to `FAILED`
    MarkFailed,

    /// Force a node or plan to `EXPIRED`
    MarkExpired,

    /// Force a node or plan to `SUCCEEDED`
    MarkSuccess,

    /// Abort a single node
    Abort,

    /// Abort the whole plan
    AbortAll,
}

impl InterruptType {
    pub const ALL: [InterruptType; 8] = [
        InterruptType::PauseAll,
        InterruptType::ResumeAll,
        InterruptType::Retry,
        InterruptType::MarkFailed,
        InterruptType::MarkExpired,
        InterruptType::MarkSuccess,
        InterruptType::Abort,
        InterruptType::AbortAll,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            InterruptType::PauseAll => "PAUSE_ALL",
            InterruptType::ResumeAll => "RESUME_ALL",
            InterruptType::Retry => "RETRY",
            InterruptType::MarkFailed => "MARK_FAILED",
            InterruptType::MarkExpired => "MARK_EXPIRED",
            InterruptType::MarkSuccess => "MARK_SUCCESS",
            InterruptType::Abort => "ABORT",
            InterruptType::AbortAll => "ABORT_ALL",
        }
    }

    /// Plan-scoped types of which at most one may be active per plan
    pub fn is_exclusive(&self) -> bool {
        matches!(
            self,
            InterruptType::PauseAll | InterruptType::ResumeAll | InterruptType::AbortAll
        )
    }

    /// Target status for the mark-status family
    pub fn mark_target(&self) -> Option<Status> {
        match self {
            InterruptType::MarkFailed => Some(Status::Failed),
            InterruptType::MarkExpired => Some(Status::Expired),
            InterruptType::MarkSuccess => Some(Status::Succeeded),
            _ => None,
        }
    }
}

impl fmt::Display for InterruptType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for InterruptType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.replace('-', "_");
        InterruptType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str().eq_ignore_ascii_case(&normalized))
            .ok_or_else(|| format!("Unknown interrupt type: {}", s))
    }
}

/// Lifecycle state of an interrupt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InterruptState {
    Registered,
    Processing,
    ProcessedSuccessfully,
    Discarded,
}

impl InterruptState {
    pub fn as_str(&self) -> &'static str {
        match self {
            InterruptState::Registered => "REGISTERED",
            InterruptState::Processing => "PROCESSING",
            InterruptState::ProcessedSuccessfully => "PROCESSED_SUCCESSFULLY",
            InterruptState::Discarded => "DISCARDED",
        }
    }

    /// Registered or processing
    pub fn is_active(&self) -> bool {
        matches!(self, InterruptState::Registered | InterruptState::Processing)
    }
}

impl fmt::Display for InterruptState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// A control signal as requested by a caller, before registration
#[derive(Debug, Clone, PartialEq)]
pub struct InterruptRequest {
    pub interrupt_type: InterruptType,
    pub plan_execution_id: String,
    pub node_execution_id: Option<String>,
    pub parameters: Map<String, Value>,
}

impl InterruptRequest {
    /// Create a plan-scoped request
    pub fn new(interrupt_type: InterruptType, plan_execution_id: impl Into<String>) -> Self {
        Self {
            interrupt_type,
            plan_execution_id: plan_execution_id.into(),
            node_execution_id: None,
            parameters: Map::new(),
        }
    }

    /// Target a single node execution
    pub fn for_node(mut self, node_execution_id: impl Into<String>) -> Self {
        self.node_execution_id = Some(node_execution_id.into());
        self
    }

    /// Attach parameters (e.g. retry input overrides)
    pub fn with_parameters(mut self, parameters: Map<String, Value>) -> Self {
        self.parameters = parameters;
        self
    }

    /// Node id, treating an empty string as absent
    pub fn node_id(&self) -> Option<&str> {
        self.node_execution_id
            .as_deref()
            .filter(|id| !id.trim().is_empty())
    }
}

/// A persisted control signal
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Interrupt {
    pub id: String,

    pub interrupt_type: InterruptType,

    pub plan_execution_id: String,

    /// Set for node-scoped signals
    pub node_execution_id: Option<String>,

    pub state: InterruptState,

    /// Opaque payload, e.g. retry input overrides
    #[serde(default)]
    pub parameters: Map<String, Value>,

    pub created_at: DateTime<Utc>,

    pub last_updated_at: DateTime<Utc>,

    /// Optimistic concurrency version
    #[serde(default)]
    pub version: u64,
}

impl Interrupt {
    /// Build a new interrupt record from a request, in the given initial state
    pub fn from_request(request: &InterruptRequest, state: InterruptState) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            interrupt_type: request.interrupt_type,
            plan_execution_id: request.plan_execution_id.clone(),
            node_execution_id: request.node_id().map(str::to_string),
            state,
            parameters: request.parameters.clone(),
            created_at: now,
            last_updated_at: now,
            version: 0,
        }
    }

    pub fn is_active(&self) -> bool {
        self.state.is_active()
    }

    /// Build the audit record for this interrupt taking effect now
    pub fn effect(&self) -> InterruptEffect {
        InterruptEffect::new(self.id.clone(), self.interrupt_type)
    }
}

/// Audit record of an interrupt having been applied to a node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterruptEffect {
    pub interrupt_id: String,
    pub interrupt_type: InterruptType,
    pub applied_at_millis: i64,
}

impl InterruptEffect {
    pub fn new(interrupt_id: String, interrupt_type: InterruptType) -> Self {
        Self {
            interrupt_id,
            interrupt_type,
            applied_at_millis: Utc::now().timestamp_millis(),
        }
    }
}
