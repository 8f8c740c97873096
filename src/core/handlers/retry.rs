use std::sync::Arc;

use async_trait::async_trait;
use tracing::instrument;

use crate::core::context::HandlerContext;
use crate::core::error::InterruptError;
use crate::core::guard;
use crate::core::retry_helper::RetryHelper;
use crate::domain::{Interrupt, InterruptRequest, InterruptState, Status};

use super::InterruptHandler;

/// Retry: re-run a single failed, expired or aborted leaf node
pub struct RetryInterruptHandler {
    ctx: Arc<HandlerContext>,
    helper: RetryHelper,
}

impl RetryInterruptHandler {
    pub fn new(ctx: Arc<HandlerContext>) -> Self {
        Self {
            helper: RetryHelper::new(ctx.clone()),
            ctx,
        }
    }
}

#[async_trait]
impl InterruptHandler for RetryInterruptHandler {
    #[instrument(skip(self, request), fields(plan_execution_id = %request.plan_execution_id))]
    async fn register_interrupt(&self, request: InterruptRequest) -> Result<Interrupt, InterruptError> {
        if request.node_id().is_none() {
            return Err(InterruptError::invalid_request(
                "NodeExecutionId cannot be empty for RETRY interrupt",
            ));
        }

        let plan = self.ctx.plan(&request.plan_execution_id).await?;
        if plan.status.is_final() && !guard::can_transition_plan(plan.status, Status::Running) {
            return Err(InterruptError::invalid_request(format!(
                "Plan execution {} already finished with status {}",
                plan.id, plan.status
            )));
        }

        let node = self.ctx.require_node(&request).await?;
        if !node.mode.is_leaf() {
            return Err(InterruptError::invalid_request(
                "Node Retry is supported only for Leaf Nodes",
            ));
        }
        if !guard::is_retryable(node.status, node.mode) {
            return Err(InterruptError::InvalidTransition {
                entity: "node execution",
                id: node.id,
                from: node.status,
                to: Status::Queued,
            });
        }

        self.ctx.create_interrupt(&request).await
    }

    #[instrument(skip(self, interrupt), fields(interrupt_id = %interrupt.id))]
    async fn handle_interrupt(&self, interrupt: Interrupt) -> Result<Interrupt, InterruptError> {
        let node_id = interrupt.node_execution_id.as_deref().ok_or_else(|| {
            InterruptError::invalid_request("RETRY interrupt has no node execution")
        })?;

        self.helper
            .retry_node_execution(node_id, &interrupt.parameters, interrupt.effect())
            .await?;

        // A finished plan comes back to life with its retried node
        let plan = self.ctx.plan(&interrupt.plan_execution_id).await?;
        if plan.status.is_final() {
            self.ctx
                .transition_plan(&plan.id, Status::Running)
                .await?;
        }

        self.ctx
            .finish_interrupt(&interrupt.id, InterruptState::ProcessedSuccessfully)
            .await
    }
}
