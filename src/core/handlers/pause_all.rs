//! Pause-All: hold every active leaf of a plan and resume the plan once
//! every held node has been released.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error, info, instrument};

use crate::core::context::HandlerContext;
use crate::core::error::{ConflictCode, InterruptError};
use crate::core::guard::ACTIVE_STATUSES;
use crate::core::wait_notify::{NotifyCallback, NotifyResponse, WaitError};
use crate::domain::{
    Interrupt, InterruptRequest, InterruptState, InterruptType, NodeExecution, Status,
};

use super::InterruptHandler;

pub struct PauseAllInterruptHandler {
    ctx: Arc<HandlerContext>,
}

impl PauseAllInterruptHandler {
    pub fn new(ctx: Arc<HandlerContext>) -> Self {
        Self { ctx }
    }

    /// Finish a Resume-All that is still active when a new pause arrives.
    /// If it already moved some node it counts as processed.
    async fn supersede_resume(&self, resume: &Interrupt) -> Result<(), InterruptError> {
        let nodes = self.ctx.nodes(&resume.plan_execution_id).await?;
        let state = if nodes.iter().any(|n| n.has_effect_of(&resume.id)) {
            InterruptState::ProcessedSuccessfully
        } else {
            InterruptState::Discarded
        };

        info!(interrupt_id = %resume.id, %state, "Superseding active RESUME_ALL");
        self.ctx.finish_if_active(&resume.id, state).await?;
        Ok(())
    }
}

#[async_trait]
impl InterruptHandler for PauseAllInterruptHandler {
    #[instrument(skip(self, request), fields(plan_execution_id = %request.plan_execution_id))]
    async fn register_interrupt(&self, request: InterruptRequest) -> Result<Interrupt, InterruptError> {
        if request.node_id().is_some() {
            return Err(InterruptError::invalid_request(
                "PAUSE_ALL applies to the whole plan; nodeExecutionId must be empty",
            ));
        }
        self.ctx.require_running_plan(&request.plan_execution_id).await?;

        let active = self.ctx.active_interrupts(&request.plan_execution_id).await?;
        if active.iter().any(|i| i.interrupt_type == InterruptType::PauseAll) {
            return Err(InterruptError::Conflict {
                code: ConflictCode::PauseAllAlready,
                plan_execution_id: request.plan_execution_id,
            });
        }
        if active.iter().any(|i| i.interrupt_type == InterruptType::AbortAll) {
            return Err(InterruptError::invalid_request(format!(
                "Plan execution {} is being aborted",
                request.plan_execution_id
            )));
        }

        // The insert is the arbiter between concurrent pauses
        self.ctx.create_interrupt(&request).await
    }

    #[instrument(skip(self, interrupt), fields(interrupt_id = %interrupt.id))]
    async fn handle_interrupt(&self, interrupt: Interrupt) -> Result<Interrupt, InterruptError> {
        let active = self.ctx.active_interrupts(&interrupt.plan_execution_id).await?;
        for resume in active
            .iter()
            .filter(|i| i.interrupt_type == InterruptType::ResumeAll)
        {
            self.supersede_resume(resume).await?;
        }

        self.ctx
            .transition_plan_if_allowed(&interrupt.plan_execution_id, Status::Pausing)
            .await?;

        let nodes = self.ctx.nodes(&interrupt.plan_execution_id).await?;
        let mut parties = Vec::new();

        for node in nodes.iter().filter(|n| n.mode.is_leaf()) {
            if node.has_effect_of(&interrupt.id) {
                // Applied by an earlier pass; still held if it is paused
                if node.status == Status::Paused {
                    parties.push(node.id.clone());
                }
                continue;
            }
            if !ACTIVE_STATUSES.contains(&node.status) {
                continue;
            }

            match self.handle_interrupt_for_node(&interrupt, &node.id).await {
                Ok(paused) => parties.push(paused.id),
                Err(InterruptError::InvalidTransition { from, .. }) => {
                    debug!(node_execution_id = %node.id, %from, "Node left active status before pause");
                }
                Err(e) => return Err(e),
            }
        }

        self.ctx
            .transition_plan_if_allowed(&interrupt.plan_execution_id, Status::Paused)
            .await?;

        if parties.is_empty() {
            info!("No active nodes to hold");
        } else {
            let callback = Arc::new(PauseFanInCallback::new(self.ctx.clone(), &interrupt));
            let held = parties.len();
            match self
                .ctx
                .waits
                .wait_for_all_on(&self.ctx.channel, &interrupt.id, parties, callback)
            {
                Ok(()) => info!(held, "Waiting for paused nodes to be released"),
                Err(WaitError::AlreadyRegistered(_)) => debug!("Fan-in wait already registered"),
                Err(e) => return Err(InterruptError::Runtime(e.to_string())),
            }
        }

        self.ctx.interrupt(&interrupt.id).await
    }

    async fn handle_interrupt_for_node(
        &self,
        interrupt: &Interrupt,
        node_execution_id: &str,
    ) -> Result<NodeExecution, InterruptError> {
        let node = self.ctx.node(node_execution_id).await?;
        if node.has_effect_of(&interrupt.id) {
            return Ok(node);
        }
        self.ctx
            .transition_node(&node, Status::Paused, Some(interrupt.effect()))
            .await
    }
}

/// Continuation run once every node held by a Pause-All has been released
pub struct PauseFanInCallback {
    ctx: Arc<HandlerContext>,
    interrupt_id: String,
    plan_execution_id: String,
}

impl PauseFanInCallback {
    pub fn new(ctx: Arc<HandlerContext>, interrupt: &Interrupt) -> Self {
        Self {
            ctx,
            interrupt_id: interrupt.id.clone(),
            plan_execution_id: interrupt.plan_execution_id.clone(),
        }
    }

    async fn complete(&self) -> Result<(), InterruptError> {
        let finished = self
            .ctx
            .finish_if_active(&self.interrupt_id, InterruptState::ProcessedSuccessfully)
            .await?;
        if finished.is_none() {
            // Already finalized by Resume-All or Abort-All; the plan may be under a newer pause
            debug!(interrupt_id = %self.interrupt_id, "PAUSE_ALL already finalized");
            return Ok(());
        }
        self.ctx.resume_plan(&self.plan_execution_id).await
    }
}

#[async_trait]
impl NotifyCallback for PauseFanInCallback {
    async fn notify(&self, responses: HashMap<String, NotifyResponse>) {
        info!(
            interrupt_id = %self.interrupt_id,
            released = responses.len(),
            "All paused nodes released"
        );
        if let Err(e) = self.complete().await {
            error!(interrupt_id = %self.interrupt_id, error = %e, "Failed to complete PAUSE_ALL");
        }
    }
}
