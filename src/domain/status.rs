//! Execution statuses shared by plan and node executions.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Status of a plan execution or a node execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    /// Created but not yet started
    Queued,

    /// Currently executing
    Running,

    /// Plan only: a pause is registered but not yet applied
    Pausing,

    /// Suspended by an interrupt (can be resumed)
    Paused,

    /// Abort requested, waiting for the runtime to stop
    Discontinuing,

    /// Completed successfully
    Succeeded,

    /// Failed (with error)
    Failed,

    /// Timed out or declared expired
    Expired,

    /// Aborted by an interrupt
    Aborted,
}

impl Status {
    /// All statuses, in declaration order
    pub const ALL: [Status; 9] = [
        Status::Queued,
        Status::Running,
        Status::Pausing,
        Status::Paused,
        Status::Discontinuing,
        Status::Succeeded,
        Status::Failed,
        Status::Expired,
        Status::Aborted,
    ];

    /// Wire name, e.g. `RUNNING`
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Queued => "QUEUED",
            Status::Running => "RUNNING",
            Status::Pausing => "PAUSING",
            Status::Paused => "PAUSED",
            Status::Discontinuing => "DISCONTINUING",
            Status::Succeeded => "SUCCEEDED",
            Status::Failed => "FAILED",
            Status::Expired => "EXPIRED",
            Status::Aborted => "ABORTED",
        }
    }

    /// Final statuses never change again without a retry
    pub fn is_final(&self) -> bool {
        matches!(
            self,
            Status::Succeeded | Status::Failed | Status::Expired | Status::Aborted
        )
    }
}

impl Default for Status {
    fn default() -> Self {
        Self::Queued
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for Status {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Status::ALL
            .iter()
            .copied()
            .find(|status| status.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("Unknown status: {}", s))
    }
}

/// How a node executes: leaves do work, parents only contain children
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionMode {
    /// Runs business logic directly
    Leaf,

    /// Composite node (child/children modes)
    Parent,
}

impl ExecutionMode {
    pub fn is_leaf(&self) -> bool {
        matches!(self, ExecutionMode::Leaf)
    }
}

impl Default for ExecutionMode {
    fn default() -> Self {
        Self::Leaf
    }
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionMode::Leaf => f.pad("LEAF"),
            ExecutionMode::Parent => f.pad("PARENT"),
        }
    }
}
