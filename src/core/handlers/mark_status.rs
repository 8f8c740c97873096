//! Mark-Failed, Mark-Expired and Mark-Success: force a node or a whole plan
//! into a terminal status.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, instrument};

use crate::core::context::{HandlerContext, RuntimeAction};
use crate::core::error::InterruptError;
use crate::core::guard;
use crate::domain::{Interrupt, InterruptRequest, InterruptState, InterruptType, Status};

use super::InterruptHandler;

/// One handler instance per mark type, sharing the status-forcing logic
pub struct MarkStatusInterruptHandler {
    ctx: Arc<HandlerContext>,
    interrupt_type: InterruptType,
    target: Status,
}

impl MarkStatusInterruptHandler {
    /// Returns `None` for interrupt types that do not mark a status
    pub fn new(ctx: Arc<HandlerContext>, interrupt_type: InterruptType) -> Option<Self> {
        let target = interrupt_type.mark_target()?;
        Some(Self {
            ctx,
            interrupt_type,
            target,
        })
    }

    pub fn target(&self) -> Status {
        self.target
    }

    /// Force the interrupt's node (or its plan, when no node is named) into `target`
    pub async fn handle_interrupt_status(
        &self,
        interrupt: Interrupt,
        target: Status,
    ) -> Result<Interrupt, InterruptError> {
        match interrupt.node_execution_id.as_deref() {
            Some(node_id) => {
                let node = self.ctx.node(node_id).await?;
                if !node.has_effect_of(&interrupt.id) {
                    let previous = node.status;
                    let updated = self
                        .ctx
                        .transition_node(&node, target, Some(interrupt.effect()))
                        .await?;

                    match previous {
                        Status::Running => {
                            self.ctx.runtime_call(RuntimeAction::Abort, &updated).await?
                        }
                        Status::Paused => {
                            self.ctx.release_pause_party(&updated);
                        }
                        _ => {}
                    }
                    info!(node_execution_id = %node_id, %previous, %target, "Node status forced");
                }
            }
            None => {
                if target.is_final() {
                    self.ctx
                        .discard_pause_signals(&interrupt.plan_execution_id)
                        .await?;
                }
                self.ctx
                    .transition_plan(&interrupt.plan_execution_id, target)
                    .await?;
                info!(plan_execution_id = %interrupt.plan_execution_id, %target, "Plan status forced");
            }
        }

        self.ctx
            .finish_interrupt(&interrupt.id, InterruptState::ProcessedSuccessfully)
            .await
    }
}

#[async_trait]
impl InterruptHandler for MarkStatusInterruptHandler {
    #[instrument(skip(self, request), fields(plan_execution_id = %request.plan_execution_id, target = %self.target))]
    async fn register_interrupt(&self, request: InterruptRequest) -> Result<Interrupt, InterruptError> {
        if request.interrupt_type != self.interrupt_type {
            return Err(InterruptError::UnsupportedInterruptType(request.interrupt_type));
        }

        let plan = self.ctx.plan(&request.plan_execution_id).await?;

        if request.node_id().is_some() {
            let node = self.ctx.require_node(&request).await?;
            if !guard::can_transition(node.status, self.target, node.mode) {
                return Err(InterruptError::InvalidTransition {
                    entity: "node execution",
                    id: node.id,
                    from: node.status,
                    to: self.target,
                });
            }
        } else if !guard::can_transition_plan(plan.status, self.target) {
            return Err(InterruptError::InvalidTransition {
                entity: "plan execution",
                id: plan.id,
                from: plan.status,
                to: self.target,
            });
        }

        self.ctx.create_interrupt(&request).await
    }

    #[instrument(skip(self, interrupt), fields(interrupt_id = %interrupt.id))]
    async fn handle_interrupt(&self, interrupt: Interrupt) -> Result<Interrupt, InterruptError> {
        self.handle_interrupt_status(interrupt, self.target).await
    }
}
