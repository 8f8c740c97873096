//! Adapter interfaces for external systems.
//!
//! The interrupt engine never runs business logic itself. It hands nodes to
//! a step runtime to (re)start, resume or stop, and tells status observers
//! about every committed node status change.

pub mod channel;
pub mod logging;

use anyhow::Result;
use async_trait::async_trait;

use crate::domain::NodeExecution;

// Re-export the bundled adapters
pub use channel::{ChannelRuntime, RuntimeCommand};
pub use logging::{LoggingRuntime, TracingObserver};

/// Trait for the step-execution runtime that runs node business logic
#[async_trait]
pub trait StepRuntime: Send + Sync {
    /// Human-readable runtime name
    fn name(&self) -> &str;

    /// Run a queued node (first run or retry)
    async fn start(&self, node: &NodeExecution) -> Result<()>;

    /// Continue a node that was paused
    async fn resume(&self, node: &NodeExecution) -> Result<()>;

    /// Stop a node's business logic
    async fn abort(&self, node: &NodeExecution) -> Result<()>;
}

/// Observer of node status updates
pub trait StatusObserver: Send + Sync {
    fn on_node_status_update(&self, node: &NodeExecution);
}
