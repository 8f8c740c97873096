//! Interrupt handlers, one per interrupt type.
//!
//! Each handler has two phases. `register_interrupt` validates the request
//! against current store state and persists the interrupt; on failure
//! nothing is persisted. `handle_interrupt` applies the interrupt's effect
//! to nodes and plan and finishes the interrupt (or, for Pause-All, leaves
//! finishing to a fan-in continuation).

pub mod abort;
pub mod mark_status;
pub mod pause_all;
pub mod resume_all;
pub mod retry;

use async_trait::async_trait;

use crate::domain::{Interrupt, InterruptRequest, NodeExecution};

use super::error::InterruptError;

pub use abort::{AbortAllInterruptHandler, AbortInterruptHandler};
pub use mark_status::MarkStatusInterruptHandler;
pub use pause_all::{PauseAllInterruptHandler, PauseFanInCallback};
pub use resume_all::ResumeAllInterruptHandler;
pub use retry::RetryInterruptHandler;

/// Handler for one interrupt type
#[async_trait]
pub trait InterruptHandler: Send + Sync {
    /// Validate and persist the interrupt
    async fn register_interrupt(&self, request: InterruptRequest) -> Result<Interrupt, InterruptError>;

    /// Apply a registered interrupt
    async fn handle_interrupt(&self, interrupt: Interrupt) -> Result<Interrupt, InterruptError>;

    /// Apply an active plan-wide interrupt to a single node that is about to
    /// start. Only plan-wide signals that hold nodes back implement this.
    async fn handle_interrupt_for_node(
        &self,
        interrupt: &Interrupt,
        _node_execution_id: &str,
    ) -> Result<NodeExecution, InterruptError> {
        Err(InterruptError::NotRequired(interrupt.interrupt_type))
    }
}
