//! plancontrol - Interrupt processing for orchestrated plan executions
//!
//! Operators and automation steer a running plan (a tree of node
//! executions) by registering interrupts: pause or resume the whole plan,
//! retry a failed leaf, force a node or plan into a terminal status, or
//! abort. Each interrupt is validated and persisted, then applied to node
//! and plan statuses through a transition guard and a versioned store.
//!
//! # Modules
//!
//! - `domain`: Data structures (PlanExecution, NodeExecution, Interrupt, Status)
//! - `core`: Interrupt engine (guard, store, handlers, registry, service)
//! - `adapters`: Step runtime and status observer seams
//! - `config`: Layered configuration
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Seed a plan with three running leaves
//! plancontrol create-plan nightly --leaves 3
//!
//! # Pause it, then resume it
//! plancontrol interrupt PAUSE_ALL <plan-id>
//! plancontrol interrupt RESUME_ALL <plan-id>
//!
//! # Inspect
//! plancontrol status <plan-id>
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;

// Re-export main types at crate root for convenience
pub use core::{
    ConflictCode, ExecutionStore, InterruptCheck, InterruptError, InterruptService,
    SqliteExecutionStore, StoreError,
};
pub use domain::{
    ExecutionMode, Interrupt, InterruptEffect, InterruptRequest, InterruptState, InterruptType,
    NodeExecution, PlanExecution, Status,
};
