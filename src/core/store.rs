//! Durable execution store interface.
//!
//! The store owns every plan, node and interrupt record. The engine keeps
//! no authoritative state of its own: every decision re-reads from here,
//! and every update is conditional on the record's version (and, for
//! status changes, on the current status).

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::{Interrupt, InterruptState, InterruptType, NodeExecution, PlanExecution, Status};

/// Errors returned by an execution store
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("{entity} already exists: {id}")]
    AlreadyExists { entity: &'static str, id: String },

    #[error("Version conflict on {entity} {id} (read version {expected})")]
    VersionConflict {
        entity: &'static str,
        id: String,
        expected: u64,
    },

    #[error("{entity} {id} is {actual}, expected one of {allowed:?}")]
    StatusMismatch {
        entity: &'static str,
        id: String,
        actual: Status,
        allowed: Vec<Status>,
    },

    #[error("Active {interrupt_type} interrupt already exists for plan execution {plan_execution_id}")]
    ActiveInterruptExists {
        plan_execution_id: String,
        interrupt_type: InterruptType,
    },

    #[error("Interrupt {id} is no longer active ({state})")]
    InterruptNotActive { id: String, state: InterruptState },

    #[error("{0} is not a terminal interrupt state")]
    InvalidTerminalState(InterruptState),

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(String),
}

impl StoreError {
    /// Optimistic-lock collisions and connection trouble may succeed on retry
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            StoreError::VersionConflict { .. } | StoreError::Unavailable(_)
        )
    }
}

/// Durable, versioned records for plan executions, node executions and interrupts
#[async_trait]
pub trait ExecutionStore: Send + Sync {
    /// Insert a new plan execution
    async fn save_plan_execution(&self, plan: &PlanExecution) -> Result<(), StoreError>;

    async fn get_plan_execution(&self, id: &str) -> Result<PlanExecution, StoreError>;

    /// Move a plan to `status` if its current status is in `allowed_from`
    async fn update_plan_status(
        &self,
        id: &str,
        status: Status,
        allowed_from: &[Status],
    ) -> Result<PlanExecution, StoreError>;

    /// Insert a new node execution
    async fn save_node_execution(&self, node: &NodeExecution) -> Result<(), StoreError>;

    async fn get_node_execution(&self, id: &str) -> Result<NodeExecution, StoreError>;

    /// All node executions of a plan, in creation order
    async fn fetch_node_executions(
        &self,
        plan_execution_id: &str,
    ) -> Result<Vec<NodeExecution>, StoreError>;

    /// Move a node to `status` if its current status is in `allowed_from`,
    /// applying `mutator` (e.g. appending an interrupt effect) in the same write
    async fn update_node_execution_status(
        &self,
        id: &str,
        status: Status,
        allowed_from: &[Status],
        mutator: &(dyn for<'n> Fn(&'n mut NodeExecution) + Send + Sync),
    ) -> Result<NodeExecution, StoreError>;

    /// Insert an interrupt. Rejects a second active exclusive interrupt
    /// (`PAUSE_ALL`, `RESUME_ALL`, `ABORT_ALL`) of the same type for a plan.
    async fn create_interrupt(&self, interrupt: &Interrupt) -> Result<String, StoreError>;

    async fn get_interrupt(&self, id: &str) -> Result<Interrupt, StoreError>;

    /// Registered or processing interrupts of a plan, oldest first
    async fn get_active_interrupts(
        &self,
        plan_execution_id: &str,
    ) -> Result<Vec<Interrupt>, StoreError>;

    /// Every interrupt of a plan, oldest first
    async fn list_interrupts(&self, plan_execution_id: &str) -> Result<Vec<Interrupt>, StoreError>;

    /// `REGISTERED -> PROCESSING`
    async fn mark_interrupt_processing(&self, id: &str) -> Result<Interrupt, StoreError>;

    /// Active -> `terminal_state`. Fails with `InterruptNotActive` if another
    /// writer already finished the interrupt.
    async fn mark_interrupt_processed(
        &self,
        id: &str,
        terminal_state: InterruptState,
    ) -> Result<Interrupt, StoreError>;
}
