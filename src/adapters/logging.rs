//! Log-only runtime and observer.
//!
//! Used where no real step runtime is attached (the CLI): commands are
//! recorded in the log and succeed.

use anyhow::Result;
use async_trait::async_trait;
use tracing::info;

use crate::domain::NodeExecution;

use super::{StatusObserver, StepRuntime};

/// Runtime that only logs the commands it receives
#[derive(Debug, Clone, Default)]
pub struct LoggingRuntime;

impl LoggingRuntime {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl StepRuntime for LoggingRuntime {
    fn name(&self) -> &str {
        "logging"
    }

    async fn start(&self, node: &NodeExecution) -> Result<()> {
        info!(node_execution_id = %node.id, node = %node.name, retry = node.retry_count, "Start node");
        Ok(())
    }

    async fn resume(&self, node: &NodeExecution) -> Result<()> {
        info!(node_execution_id = %node.id, node = %node.name, "Resume node");
        Ok(())
    }

    async fn abort(&self, node: &NodeExecution) -> Result<()> {
        info!(node_execution_id = %node.id, node = %node.name, "Abort node");
        Ok(())
    }
}

/// Observer that logs every node status update
#[derive(Debug, Clone, Default)]
pub struct TracingObserver;

impl StatusObserver for TracingObserver {
    fn on_node_status_update(&self, node: &NodeExecution) {
        info!(
            plan_execution_id = %node.plan_execution_id,
            node_execution_id = %node.id,
            status = %node.status,
            "Node status updated"
        );
    }
}
