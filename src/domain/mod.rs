//! Domain types for the interrupt engine.
//!
//! This module contains the core data structures:
//! - Status: execution statuses and execution modes
//! - Execution: plan and node executions
//! - Interrupt: control signals and their audit effects

pub mod execution;
pub mod interrupt;
pub mod status;

// Re-export commonly used types
pub use execution::{NodeExecution, PlanExecution};
pub use interrupt::{Interrupt, InterruptEffect, InterruptRequest, InterruptState, InterruptType};
pub use status::{ExecutionMode, Status};
