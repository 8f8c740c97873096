//! Resume-All: release every node held by the active Pause-All.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, instrument};

use crate::core::context::{HandlerContext, RuntimeAction};
use crate::core::error::{ConflictCode, InterruptError};
use crate::domain::{Interrupt, InterruptRequest, InterruptState, InterruptType, Status};

use super::InterruptHandler;

pub struct ResumeAllInterruptHandler {
    ctx: Arc<HandlerContext>,
}

impl ResumeAllInterruptHandler {
    pub fn new(ctx: Arc<HandlerContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl InterruptHandler for ResumeAllInterruptHandler {
    #[instrument(skip(self, request), fields(plan_execution_id = %request.plan_execution_id))]
    async fn register_interrupt(&self, request: InterruptRequest) -> Result<Interrupt, InterruptError> {
        if request.node_id().is_some() {
            return Err(InterruptError::invalid_request(
                "RESUME_ALL applies to the whole plan; nodeExecutionId must be empty",
            ));
        }
        self.ctx.require_running_plan(&request.plan_execution_id).await?;

        let active = self.ctx.active_interrupts(&request.plan_execution_id).await?;
        if active.iter().any(|i| i.interrupt_type == InterruptType::ResumeAll) {
            return Err(InterruptError::Conflict {
                code: ConflictCode::ResumeAllAlready,
                plan_execution_id: request.plan_execution_id,
            });
        }
        if !active.iter().any(|i| i.interrupt_type == InterruptType::PauseAll) {
            return Err(InterruptError::invalid_request(format!(
                "No active PAUSE_ALL interrupt for plan execution {}",
                request.plan_execution_id
            )));
        }

        self.ctx.create_interrupt(&request).await
    }

    #[instrument(skip(self, interrupt), fields(interrupt_id = %interrupt.id))]
    async fn handle_interrupt(&self, interrupt: Interrupt) -> Result<Interrupt, InterruptError> {
        let plan_id = interrupt.plan_execution_id.as_str();
        let nodes = self.ctx.nodes(plan_id).await?;

        let mut resumed = 0usize;
        for node in nodes.iter().filter(|n| n.status == Status::Paused) {
            let running = self
                .ctx
                .transition_node(node, Status::Running, Some(interrupt.effect()))
                .await?;
            self.ctx.runtime_call(RuntimeAction::Resume, &running).await?;
            self.ctx.release_pause_party(&running);
            resumed += 1;
        }

        // Nodes held at start time are not parties of the fan-in wait, so
        // the pause may still be active here
        let active = self.ctx.active_interrupts(plan_id).await?;
        for pause in active
            .iter()
            .filter(|i| i.interrupt_type == InterruptType::PauseAll)
        {
            self.ctx.waits.withdraw(&pause.id);
            self.ctx
                .finish_if_active(&pause.id, InterruptState::ProcessedSuccessfully)
                .await?;
        }

        self.ctx.resume_plan(plan_id).await?;
        info!(resumed, "Plan resumed");

        self.ctx
            .finish_interrupt(&interrupt.id, InterruptState::ProcessedSuccessfully)
            .await
    }
}
