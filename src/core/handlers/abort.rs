//! Abort (one node) and Abort-All (the whole plan).
//!
//! Leaves go through `DISCONTINUING` while the step runtime is told to stop
//! them, then land in `ABORTED`. Parent nodes have no business logic of
//! their own and go straight to `ABORTED`.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, instrument};

use crate::core::context::{HandlerContext, RuntimeAction};
use crate::core::error::{ConflictCode, InterruptError};
use crate::core::guard;
use crate::domain::{
    Interrupt, InterruptRequest, InterruptState, InterruptType, NodeExecution, Status,
};

use super::InterruptHandler;

/// Stop one node on behalf of `interrupt`
async fn abort_node(
    ctx: &HandlerContext,
    interrupt: &Interrupt,
    node: NodeExecution,
) -> Result<NodeExecution, InterruptError> {
    if node.status.is_final() {
        return Ok(node);
    }

    let mut node = node;
    if node.mode.is_leaf() && node.status != Status::Discontinuing {
        let was_paused = node.status == Status::Paused;
        node = ctx
            .transition_node(&node, Status::Discontinuing, Some(interrupt.effect()))
            .await?;
        ctx.runtime_call(RuntimeAction::Abort, &node).await?;
        if was_paused {
            ctx.release_pause_party(&node);
        }
    }

    let effect = (!node.has_effect_of(&interrupt.id)).then(|| interrupt.effect());
    ctx.transition_node(&node, Status::Aborted, effect).await
}

pub struct AbortInterruptHandler {
    ctx: Arc<HandlerContext>,
}

impl AbortInterruptHandler {
    pub fn new(ctx: Arc<HandlerContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl InterruptHandler for AbortInterruptHandler {
    #[instrument(skip(self, request), fields(plan_execution_id = %request.plan_execution_id))]
    async fn register_interrupt(&self, request: InterruptRequest) -> Result<Interrupt, InterruptError> {
        self.ctx.require_running_plan(&request.plan_execution_id).await?;

        let node = self.ctx.require_node(&request).await?;
        let first_step = if node.mode.is_leaf() {
            Status::Discontinuing
        } else {
            Status::Aborted
        };
        if !guard::can_transition(node.status, first_step, node.mode) {
            return Err(InterruptError::InvalidTransition {
                entity: "node execution",
                id: node.id,
                from: node.status,
                to: first_step,
            });
        }

        self.ctx.create_interrupt(&request).await
    }

    #[instrument(skip(self, interrupt), fields(interrupt_id = %interrupt.id))]
    async fn handle_interrupt(&self, interrupt: Interrupt) -> Result<Interrupt, InterruptError> {
        let node_id = interrupt.node_execution_id.as_deref().ok_or_else(|| {
            InterruptError::invalid_request("ABORT interrupt has no node execution")
        })?;

        let node = self.ctx.node(node_id).await?;
        let aborted = abort_node(&self.ctx, &interrupt, node).await?;
        info!(node_execution_id = %aborted.id, status = %aborted.status, "Node aborted");

        self.ctx
            .finish_interrupt(&interrupt.id, InterruptState::ProcessedSuccessfully)
            .await
    }
}

pub struct AbortAllInterruptHandler {
    ctx: Arc<HandlerContext>,
}

impl AbortAllInterruptHandler {
    pub fn new(ctx: Arc<HandlerContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl InterruptHandler for AbortAllInterruptHandler {
    #[instrument(skip(self, request), fields(plan_execution_id = %request.plan_execution_id))]
    async fn register_interrupt(&self, request: InterruptRequest) -> Result<Interrupt, InterruptError> {
        if request.node_id().is_some() {
            return Err(InterruptError::invalid_request(
                "ABORT_ALL applies to the whole plan; use ABORT for a single node",
            ));
        }
        self.ctx.require_running_plan(&request.plan_execution_id).await?;

        let active = self.ctx.active_interrupts(&request.plan_execution_id).await?;
        if active.iter().any(|i| i.interrupt_type == InterruptType::AbortAll) {
            return Err(InterruptError::Conflict {
                code: ConflictCode::AbortAllAlready,
                plan_execution_id: request.plan_execution_id,
            });
        }

        self.ctx.create_interrupt(&request).await
    }

    #[instrument(skip(self, interrupt), fields(interrupt_id = %interrupt.id))]
    async fn handle_interrupt(&self, interrupt: Interrupt) -> Result<Interrupt, InterruptError> {
        self.ctx
            .discard_pause_signals(&interrupt.plan_execution_id)
            .await?;
        self.ctx
            .transition_plan_if_allowed(&interrupt.plan_execution_id, Status::Discontinuing)
            .await?;

        let nodes = self.ctx.nodes(&interrupt.plan_execution_id).await?;

        // Leaves first so parents never outlive running children
        let (leaves, parents): (Vec<_>, Vec<_>) =
            nodes.into_iter().partition(|n| n.mode.is_leaf());

        let mut aborted = 0usize;
        for node in leaves.into_iter().chain(parents) {
            if node.status.is_final() {
                continue;
            }
            match abort_node(&self.ctx, &interrupt, node).await {
                Ok(_) => aborted += 1,
                Err(InterruptError::InvalidTransition { id, from, .. }) if from.is_final() => {
                    debug!(node_execution_id = %id, %from, "Node finished before abort");
                }
                Err(e) => return Err(e),
            }
        }

        self.ctx
            .transition_plan_if_allowed(&interrupt.plan_execution_id, Status::Aborted)
            .await?;
        info!(aborted, "Plan aborted");

        self.ctx
            .finish_interrupt(&interrupt.id, InterruptState::ProcessedSuccessfully)
            .await
    }

    async fn handle_interrupt_for_node(
        &self,
        interrupt: &Interrupt,
        node_execution_id: &str,
    ) -> Result<NodeExecution, InterruptError> {
        let node = self.ctx.node(node_execution_id).await?;
        abort_node(&self.ctx, interrupt, node).await
    }
}
