//! Shared plumbing for interrupt handlers.
//!
//! Every read goes to the store (with bounded retry on transient failures),
//! every status change is checked against the transition guard and then
//! written conditionally on the current status, and observers hear about
//! each committed node update.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::adapters::{StatusObserver, StepRuntime};
use crate::domain::{
    Interrupt, InterruptEffect, InterruptRequest, InterruptState, InterruptType, NodeExecution,
    PlanExecution, Status,
};

use super::error::{ConflictCode, InterruptError};
use super::guard;
use super::store::{ExecutionStore, StoreError};
use super::store_retry::StoreRetryPolicy;
use super::wait_notify::{NotifyResponse, WaitNotify};

/// Collaborators shared by every handler
pub struct HandlerContext {
    pub store: Arc<dyn ExecutionStore>,
    pub waits: Arc<dyn WaitNotify>,
    pub runtime: Arc<dyn StepRuntime>,
    pub observers: Vec<Arc<dyn StatusObserver>>,
    pub retry: StoreRetryPolicy,
    /// Wait/notify channel used for fan-in waits
    pub channel: String,
}

fn not_found_as_invalid(err: StoreError) -> InterruptError {
    match err {
        StoreError::NotFound { entity, id } => {
            InterruptError::invalid_request(format!("No {} found for id {}", entity, id))
        }
        other => other.into(),
    }
}

impl HandlerContext {
    pub async fn plan(&self, id: &str) -> Result<PlanExecution, InterruptError> {
        let store = &self.store;
        self.retry
            .run("get plan execution", move || store.get_plan_execution(id))
            .await
            .map_err(not_found_as_invalid)
    }

    pub async fn node(&self, id: &str) -> Result<NodeExecution, InterruptError> {
        let store = &self.store;
        self.retry
            .run("get node execution", move || store.get_node_execution(id))
            .await
            .map_err(not_found_as_invalid)
    }

    pub async fn nodes(&self, plan_execution_id: &str) -> Result<Vec<NodeExecution>, InterruptError> {
        let store = &self.store;
        Ok(self
            .retry
            .run("fetch node executions", move || {
                store.fetch_node_executions(plan_execution_id)
            })
            .await?)
    }

    pub async fn interrupt(&self, id: &str) -> Result<Interrupt, InterruptError> {
        let store = &self.store;
        Ok(self
            .retry
            .run("get interrupt", move || store.get_interrupt(id))
            .await?)
    }

    pub async fn active_interrupts(
        &self,
        plan_execution_id: &str,
    ) -> Result<Vec<Interrupt>, InterruptError> {
        let store = &self.store;
        Ok(self
            .retry
            .run("get active interrupts", move || {
                store.get_active_interrupts(plan_execution_id)
            })
            .await?)
    }

    /// The plan must exist and still be executing
    pub async fn require_running_plan(&self, id: &str) -> Result<PlanExecution, InterruptError> {
        let plan = self.plan(id).await?;
        if plan.status.is_final() {
            return Err(InterruptError::invalid_request(format!(
                "Plan execution {} already finished with status {}",
                id, plan.status
            )));
        }
        Ok(plan)
    }

    /// The request must name a node belonging to its plan
    pub async fn require_node(&self, request: &InterruptRequest) -> Result<NodeExecution, InterruptError> {
        let node_id = request.node_id().ok_or_else(|| {
            InterruptError::invalid_request(format!(
                "NodeExecutionId cannot be empty for {} interrupt",
                request.interrupt_type
            ))
        })?;

        let node = self.node(node_id).await?;
        if node.plan_execution_id != request.plan_execution_id {
            return Err(InterruptError::invalid_request(format!(
                "Node execution {} does not belong to plan execution {}",
                node_id, request.plan_execution_id
            )));
        }
        Ok(node)
    }

    /// Persist a new interrupt in `PROCESSING`
    pub async fn create_interrupt(&self, request: &InterruptRequest) -> Result<Interrupt, InterruptError> {
        let interrupt = Interrupt::from_request(request, InterruptState::Processing);
        let store = &self.store;
        let record = &interrupt;

        self.retry
            .run("create interrupt", move || store.create_interrupt(record))
            .await
            .map_err(|e| match e {
                StoreError::ActiveInterruptExists {
                    plan_execution_id,
                    interrupt_type,
                } => match ConflictCode::for_type(interrupt_type) {
                    Some(code) => InterruptError::Conflict {
                        code,
                        plan_execution_id,
                    },
                    None => StoreError::ActiveInterruptExists {
                        plan_execution_id,
                        interrupt_type,
                    }
                    .into(),
                },
                other => other.into(),
            })?;

        info!(
            interrupt_id = %interrupt.id,
            interrupt_type = %interrupt.interrupt_type,
            plan_execution_id = %interrupt.plan_execution_id,
            "Interrupt registered"
        );
        Ok(interrupt)
    }

    /// Move an active interrupt to a terminal state
    pub async fn finish_interrupt(
        &self,
        id: &str,
        state: InterruptState,
    ) -> Result<Interrupt, InterruptError> {
        let store = &self.store;
        let interrupt = self
            .retry
            .run("mark interrupt processed", move || {
                store.mark_interrupt_processed(id, state)
            })
            .await?;
        info!(interrupt_id = %id, %state, "Interrupt finished");
        Ok(interrupt)
    }

    /// Like `finish_interrupt`, but another writer finishing first is not an error
    pub async fn finish_if_active(
        &self,
        id: &str,
        state: InterruptState,
    ) -> Result<Option<Interrupt>, InterruptError> {
        match self.finish_interrupt(id, state).await {
            Ok(interrupt) => Ok(Some(interrupt)),
            Err(InterruptError::Store(StoreError::InterruptNotActive { state: current, .. })) => {
                debug!(interrupt_id = %id, %current, "Interrupt already finished");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Move a node to `target`, appending `effect` (at most once per interrupt)
    pub async fn transition_node(
        &self,
        node: &NodeExecution,
        target: Status,
        effect: Option<InterruptEffect>,
    ) -> Result<NodeExecution, InterruptError> {
        if let Some(effect) = &effect {
            if node.has_effect_of(&effect.interrupt_id) && node.status == target {
                debug!(node_execution_id = %node.id, interrupt_id = %effect.interrupt_id, "Effect already applied");
                return Ok(node.clone());
            }
        }

        self.transition_node_with(node, target, &|n: &mut NodeExecution| {
            if let Some(effect) = &effect {
                n.add_interrupt_effect(effect.clone());
            }
        })
        .await
    }

    /// Move a node to `target`, applying `mutator` in the same conditional write
    pub async fn transition_node_with(
        &self,
        node: &NodeExecution,
        target: Status,
        mutator: &(dyn for<'n> Fn(&'n mut NodeExecution) + Send + Sync),
    ) -> Result<NodeExecution, InterruptError> {
        let invalid = |from: Status| InterruptError::InvalidTransition {
            entity: "node execution",
            id: node.id.clone(),
            from,
            to: target,
        };

        if !guard::can_transition(node.status, target, node.mode) {
            return Err(invalid(node.status));
        }

        let allowed = guard::node_allowed_start_set(target, node.mode);
        let allowed = allowed.as_slice();
        let store = &self.store;
        let id = node.id.as_str();

        let updated = self
            .retry
            .run("update node execution status", move || {
                store.update_node_execution_status(id, target, allowed, mutator)
            })
            .await
            .map_err(|e| match e {
                StoreError::StatusMismatch { actual, .. } => invalid(actual),
                other => other.into(),
            })?;

        for observer in &self.observers {
            observer.on_node_status_update(&updated);
        }
        Ok(updated)
    }

    /// Move a plan to `target`, failing if the guard forbids it
    pub async fn transition_plan(
        &self,
        plan_execution_id: &str,
        target: Status,
    ) -> Result<PlanExecution, InterruptError> {
        let allowed = guard::plan_allowed_start_set(target);
        let allowed = allowed.as_slice();
        let store = &self.store;

        self.retry
            .run("update plan status", move || {
                store.update_plan_status(plan_execution_id, target, allowed)
            })
            .await
            .map_err(|e| match e {
                StoreError::StatusMismatch { actual, .. } => InterruptError::InvalidTransition {
                    entity: "plan execution",
                    id: plan_execution_id.to_string(),
                    from: actual,
                    to: target,
                },
                other => not_found_as_invalid(other),
            })
    }

    /// Move a plan to `target` when the guard allows it, otherwise leave it
    pub async fn transition_plan_if_allowed(
        &self,
        plan_execution_id: &str,
        target: Status,
    ) -> Result<Option<PlanExecution>, InterruptError> {
        match self.transition_plan(plan_execution_id, target).await {
            Ok(plan) => Ok(Some(plan)),
            Err(InterruptError::InvalidTransition { from, .. }) => {
                debug!(%plan_execution_id, %from, to = %target, "Plan status left unchanged");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Return a paused or pausing plan to `RUNNING`
    pub async fn resume_plan(&self, plan_execution_id: &str) -> Result<(), InterruptError> {
        let plan = self.plan(plan_execution_id).await?;
        if matches!(plan.status, Status::Paused | Status::Pausing) {
            self.transition_plan_if_allowed(plan_execution_id, Status::Running)
                .await?;
        }
        Ok(())
    }

    /// Report a node leaving `PAUSED` to the Pause-All wait that holds it
    pub fn release_pause_party(&self, node: &NodeExecution) -> bool {
        let Some(pause) = node.last_effect_of_type(InterruptType::PauseAll) else {
            return false;
        };

        let released = self.waits.done_with(
            &pause.interrupt_id,
            &node.id,
            NotifyResponse {
                party: node.id.clone(),
                status: node.status,
            },
        );
        debug!(
            node_execution_id = %node.id,
            interrupt_id = %pause.interrupt_id,
            released,
            "Pause party reported"
        );
        released
    }

    /// Withdraw outstanding Pause-All waits and discard pause/resume signals
    /// of a plan that is being torn down
    pub async fn discard_pause_signals(&self, plan_execution_id: &str) -> Result<(), InterruptError> {
        for interrupt in self.active_interrupts(plan_execution_id).await? {
            if !matches!(
                interrupt.interrupt_type,
                InterruptType::PauseAll | InterruptType::ResumeAll
            ) {
                continue;
            }

            if self.waits.withdraw(&interrupt.id) {
                warn!(interrupt_id = %interrupt.id, "Withdrew outstanding wait");
            }
            self.finish_if_active(&interrupt.id, InterruptState::Discarded)
                .await?;
        }
        Ok(())
    }

    /// Hand a node to the step runtime, mapping failures to engine errors
    pub async fn runtime_call(
        &self,
        action: RuntimeAction,
        node: &NodeExecution,
    ) -> Result<(), InterruptError> {
        let result = match action {
            RuntimeAction::Start => self.runtime.start(node).await,
            RuntimeAction::Resume => self.runtime.resume(node).await,
            RuntimeAction::Abort => self.runtime.abort(node).await,
        };

        result.map_err(|e| {
            InterruptError::Runtime(format!(
                "{} {:?} failed for node execution {}: {:#}",
                self.runtime.name(),
                action,
                node.id,
                e
            ))
        })
    }
}

/// Commands the engine sends to the step runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeAction {
    Start,
    Resume,
    Abort,
}


#[cfg(test)]
mod tests {
    use super::testing::test_context;
    use super::*;

    #[tokio::test]
    async fn test_transition_node_appends_effect_once() {
        let (ctx, store, _) = test_context();
        let plan = PlanExecution::new("plan");
        store.save_plan_execution(&plan).await.unwrap();
        let node = NodeExecution::leaf(&plan.id, "step", Status::Running);
        store.save_node_execution(&node).await.unwrap();

        let request = InterruptRequest::new(InterruptType::PauseAll, &plan.id);
        let interrupt = Interrupt::from_request(&request, InterruptState::Processing);

        let paused = ctx
            .transition_node(&node, Status::Paused, Some(interrupt.effect()))
            .await
            .unwrap();
        let again = ctx
            .transition_node(&paused, Status::Paused, Some(interrupt.effect()))
            .await
            .unwrap();

        assert_eq!(again.status, Status::Paused);
        assert_eq!(again.interrupt_histories.len(), 1);
        assert_eq!(again.version, paused.version);
    }

    #[tokio::test]
    async fn test_guard_rejects_before_store_write() {
        let (ctx, store, _) = test_context();
        let node = NodeExecution::leaf("plan", "step", Status::Succeeded);
        store.save_node_execution(&node).await.unwrap();

        let err = ctx
            .transition_node(&node, Status::Paused, None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            InterruptError::InvalidTransition {
                from: Status::Succeeded,
                to: Status::Paused,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_stale_read_reports_actual_status() {
        let (ctx, store, _) = test_context();
        let node = NodeExecution::leaf("plan", "step", Status::Running);
        store.save_node_execution(&node).await.unwrap();

        ctx.transition_node(&node, Status::Failed, None).await.unwrap();

        // `node` still says RUNNING
        let err = ctx
            .transition_node(&node, Status::Paused, None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            InterruptError::InvalidTransition {
                from: Status::Failed,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_missing_plan_is_invalid_request() {
        let (ctx, _, _) = test_context();
        let err = ctx.require_running_plan("missing").await.unwrap_err();
        assert!(matches!(err, InterruptError::InvalidRequest(_)));
    }
}
