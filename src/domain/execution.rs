//! Plan executions and the node executions they are made of.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use super::interrupt::{InterruptEffect, InterruptType};
use super::status::{ExecutionMode, Status};

/// One run of a workflow
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanExecution {
    pub id: String,

    /// Human-readable plan name
    pub name: String,

    pub status: Status,

    pub created_at: DateTime<Utc>,

    pub last_updated_at: DateTime<Utc>,

    /// Optimistic concurrency version
    #[serde(default)]
    pub version: u64,
}

impl PlanExecution {
    /// Create a running plan execution
    pub fn new(name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            status: Status::Running,
            created_at: now,
            last_updated_at: now,
            version: 0,
        }
    }
}

/// One step within a plan execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeExecution {
    pub id: String,

    /// Back-reference to the owning plan execution
    pub plan_execution_id: String,

    pub name: String,

    /// Enclosing parent node, if any
    pub parent_id: Option<String>,

    pub mode: ExecutionMode,

    pub status: Status,

    /// Resolved step input handed to the runtime
    #[serde(default)]
    pub input: Map<String, Value>,

    /// Number of times an operator re-queued this node
    #[serde(default)]
    pub retry_count: u32,

    /// Append-only audit trail of interrupts applied to this node
    #[serde(default)]
    pub interrupt_histories: Vec<InterruptEffect>,

    pub created_at: DateTime<Utc>,

    pub last_updated_at: DateTime<Utc>,

    #[serde(default)]
    pub version: u64,
}

impl NodeExecution {
    /// Create a leaf node in the given status
    pub fn leaf(plan_execution_id: impl Into<String>, name: impl Into<String>, status: Status) -> Self {
        Self::new(plan_execution_id, name, ExecutionMode::Leaf, status)
    }

    /// Create a parent node in the given status
    pub fn parent(
        plan_execution_id: impl Into<String>,
        name: impl Into<String>,
        status: Status,
    ) -> Self {
        Self::new(plan_execution_id, name, ExecutionMode::Parent, status)
    }

    fn new(
        plan_execution_id: impl Into<String>,
        name: impl Into<String>,
        mode: ExecutionMode,
        status: Status,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            plan_execution_id: plan_execution_id.into(),
            name: name.into(),
            parent_id: None,
            mode,
            status,
            input: Map::new(),
            retry_count: 0,
            interrupt_histories: Vec::new(),
            created_at: now,
            last_updated_at: now,
            version: 0,
        }
    }

    /// Nest this node under a parent
    pub fn with_parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    /// Set the step input
    pub fn with_input(mut self, input: Map<String, Value>) -> Self {
        self.input = input;
        self
    }

    /// Whether the given interrupt already took effect on this node
    pub fn has_effect_of(&self, interrupt_id: &str) -> bool {
        self.interrupt_histories
            .iter()
            .any(|effect| effect.interrupt_id == interrupt_id)
    }

    /// Append an effect, once per interrupt id. Returns false on a duplicate.
    pub fn add_interrupt_effect(&mut self, effect: InterruptEffect) -> bool {
        if self.has_effect_of(&effect.interrupt_id) {
            return false;
        }
        self.interrupt_histories.push(effect);
        true
    }

    /// Most recent effect of the given type
    pub fn last_effect_of_type(&self, interrupt_type: InterruptType) -> Option<&InterruptEffect> {
        self.interrupt_histories
            .iter()
            .rev()
            .find(|effect| effect.interrupt_type == interrupt_type)
    }
}
