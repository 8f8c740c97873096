//! Re-queue a failed leaf node and hand it back to the step runtime.

use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::{info, instrument};

use crate::domain::{InterruptEffect, NodeExecution, Status};

use super::context::{HandlerContext, RuntimeAction};
use super::error::InterruptError;
use super::guard;

pub struct RetryHelper {
    ctx: Arc<HandlerContext>,
}

impl RetryHelper {
    pub fn new(ctx: Arc<HandlerContext>) -> Self {
        Self { ctx }
    }

    /// Merge `parameters` into the node input, bump its retry count, move it
    /// to `QUEUED` and start it again. Errors are returned as they are and
    /// never retried here.
    #[instrument(skip(self, parameters, effect), fields(interrupt_id = %effect.interrupt_id))]
    pub async fn retry_node_execution(
        &self,
        node_execution_id: &str,
        parameters: &Map<String, Value>,
        effect: InterruptEffect,
    ) -> Result<NodeExecution, InterruptError> {
        let node = self.ctx.node(node_execution_id).await?;

        if !node.mode.is_leaf() {
            return Err(InterruptError::invalid_request(
                "Node Retry is supported only for Leaf Nodes",
            ));
        }
        if node.has_effect_of(&effect.interrupt_id) {
            // Already re-queued by this interrupt
            return Ok(node);
        }
        if !guard::is_retryable(node.status, node.mode) {
            return Err(InterruptError::InvalidTransition {
                entity: "node execution",
                id: node.id,
                from: node.status,
                to: Status::Queued,
            });
        }

        let queued = self
            .ctx
            .transition_node_with(&node, Status::Queued, &|n: &mut NodeExecution| {
                for (key, value) in parameters {
                    n.input.insert(key.clone(), value.clone());
                }
                n.retry_count += 1;
                n.add_interrupt_effect(effect.clone());
            })
            .await?;

        self.ctx.runtime_call(RuntimeAction::Start, &queued).await?;
        info!(node_execution_id = %queued.id, retry = queued.retry_count, "Node re-queued");
        Ok(queued)
    }
}
