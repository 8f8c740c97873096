//! Transient Store Failure Integration Tests
//!
//! A store wrapper that fails a configurable number of node updates with
//! version conflicts, standing in for a concurrent writer.

mod common;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use common::*;
use plancontrol::core::{
    ExecutionStore, InterruptError, InterruptService, SqliteExecutionStore, StoreError,
    StoreRetryPolicy,
};
use plancontrol::domain::{
    Interrupt, InterruptRequest, InterruptState, InterruptType, NodeExecution, PlanExecution,
    Status,
};

struct ContendedStore {
    inner: SqliteExecutionStore,
    conflicts_left: AtomicU32,
    plan_conflicts_left: AtomicU32,
    node_update_calls: AtomicU32,
}

impl ContendedStore {
    fn new(conflicts: u32) -> Self {
        Self {
            inner: SqliteExecutionStore::in_memory().unwrap(),
            conflicts_left: AtomicU32::new(conflicts),
            plan_conflicts_left: AtomicU32::new(0),
            node_update_calls: AtomicU32::new(0),
        }
    }

    fn with_plan_conflicts(self, conflicts: u32) -> Self {
        self.plan_conflicts_left.store(conflicts, Ordering::SeqCst);
        self
    }
}

fn take_one(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

#[async_trait]
impl ExecutionStore for ContendedStore {
    async fn save_plan_execution(&self, plan: &PlanExecution) -> Result<(), StoreError> {
        self.inner.save_plan_execution(plan).await
    }

    async fn get_plan_execution(&self, id: &str) -> Result<PlanExecution, StoreError> {
        self.inner.get_plan_execution(id).await
    }

    async fn update_plan_status(
        &self,
        id: &str,
        status: Status,
        allowed_from: &[Status],
    ) -> Result<PlanExecution, StoreError> {
        if take_one(&self.plan_conflicts_left) {
            return Err(StoreError::VersionConflict {
                entity: "plan execution",
                id: id.to_string(),
                expected: 0,
            });
        }
        self.inner.update_plan_status(id, status, allowed_from).await
    }

    async fn save_node_execution(&self, node: &NodeExecution) -> Result<(), StoreError> {
        self.inner.save_node_execution(node).await
    }

    async fn get_node_execution(&self, id: &str) -> Result<NodeExecution, StoreError> {
        self.inner.get_node_execution(id).await
    }

    async fn fetch_node_executions(
        &self,
        plan_execution_id: &str,
    ) -> Result<Vec<NodeExecution>, StoreError> {
        self.inner.fetch_node_executions(plan_execution_id).await
    }

    async fn update_node_execution_status(
        &self,
        id: &str,
        status: Status,
        allowed_from: &[Status],
        mutator: &(dyn for<'n> Fn(&'n mut NodeExecution) + Send + Sync),
    ) -> Result<NodeExecution, StoreError> {
        self.node_update_calls.fetch_add(1, Ordering::SeqCst);
        if take_one(&self.conflicts_left) {
            return Err(StoreError::VersionConflict {
                entity: "node execution",
                id: id.to_string(),
                expected: 0,
            });
        }
        self.inner
            .update_node_execution_status(id, status, allowed_from, mutator)
            .await
    }

    async fn create_interrupt(&self, interrupt: &Interrupt) -> Result<String, StoreError> {
        self.inner.create_interrupt(interrupt).await
    }

    async fn get_interrupt(&self, id: &str) -> Result<Interrupt, StoreError> {
        self.inner.get_interrupt(id).await
    }

    async fn get_active_interrupts(
        &self,
        plan_execution_id: &str,
    ) -> Result<Vec<Interrupt>, StoreError> {
        self.inner.get_active_interrupts(plan_execution_id).await
    }

    async fn list_interrupts(&self, plan_execution_id: &str) -> Result<Vec<Interrupt>, StoreError> {
        self.inner.list_interrupts(plan_execution_id).await
    }

    async fn mark_interrupt_processing(&self, id: &str) -> Result<Interrupt, StoreError> {
        self.inner.mark_interrupt_processing(id).await
    }

    async fn mark_interrupt_processed(
        &self,
        id: &str,
        terminal_state: InterruptState,
    ) -> Result<Interrupt, StoreError> {
        self.inner.mark_interrupt_processed(id, terminal_state).await
    }
}

async fn seed(store: &ContendedStore) -> (PlanExecution, NodeExecution) {
    let (plan, mut nodes) = seed_plan(store, &[Status::Running]).await;
    (plan, nodes.remove(0))
}

#[tokio::test]
async fn test_version_conflicts_are_retried() {
    let store = Arc::new(ContendedStore::new(2));
    let service = InterruptService::builder(store.clone())
        .retry_policy(fast_retry())
        .build();
    let (plan, leaf) = seed(&store).await;

    let request = InterruptRequest::new(InterruptType::MarkFailed, &plan.id).for_node(&leaf.id);
    let mark = service.register_interrupt(request).await.unwrap();

    assert_eq!(mark.state, InterruptState::ProcessedSuccessfully);
    assert_eq!(store.node_update_calls.load(Ordering::SeqCst), 3);

    let failed = store.get_node_execution(&leaf.id).await.unwrap();
    assert_eq!(failed.status, Status::Failed);
    assert_eq!(failed.interrupt_histories.len(), 1);
}

#[tokio::test]
async fn test_exhausted_retries_surface_transient_error() {
    let store = Arc::new(ContendedStore::new(10));
    let service = InterruptService::builder(store.clone())
        .retry_policy(fast_retry())
        .build();
    let (plan, leaf) = seed(&store).await;

    let request = InterruptRequest::new(InterruptType::MarkFailed, &plan.id).for_node(&leaf.id);
    let err = service.register_interrupt(request).await.unwrap_err();

    assert!(matches!(err, InterruptError::ApplyFailed { .. }));
    assert!(err.root().is_retryable());
    assert!(matches!(
        err.root(),
        InterruptError::Store(StoreError::VersionConflict { .. })
    ));
    assert_eq!(store.node_update_calls.load(Ordering::SeqCst), 3);

    // Nothing was applied and the interrupt waits for reconciliation
    let unchanged = store.get_node_execution(&leaf.id).await.unwrap();
    assert_eq!(unchanged.status, Status::Running);
    assert!(unchanged.interrupt_histories.is_empty());
}

#[tokio::test]
async fn test_no_retry_policy_fails_fast() {
    let store = Arc::new(ContendedStore::new(1));
    let service = InterruptService::builder(store.clone())
        .retry_policy(StoreRetryPolicy::none())
        .build();
    let (plan, leaf) = seed(&store).await;

    let request = InterruptRequest::new(InterruptType::Abort, &plan.id).for_node(&leaf.id);
    assert!(service.register_interrupt(request).await.is_err());
    assert_eq!(store.node_update_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_pause_all_failure_after_insert_names_the_interrupt() {
    let store = Arc::new(ContendedStore::new(0).with_plan_conflicts(1));
    let service = InterruptService::builder(store.clone())
        .retry_policy(StoreRetryPolicy::none())
        .build();
    let (plan, leaf) = seed(&store).await;

    let request = InterruptRequest::new(InterruptType::PauseAll, &plan.id);
    let err = service.register_interrupt(request).await.unwrap_err();

    let interrupt_id = match &err {
        InterruptError::ApplyFailed { interrupt_id, .. } => interrupt_id.clone(),
        other => panic!("unexpected error: {}", other),
    };
    let active = store.get_active_interrupts(&plan.id).await.unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].id, interrupt_id);
    assert_eq!(active[0].state, InterruptState::Processing);

    // Nothing past the insert was applied
    assert_eq!(
        store.get_node_execution(&leaf.id).await.unwrap().status,
        Status::Running
    );
    assert_eq!(
        store.get_plan_execution(&plan.id).await.unwrap().status,
        Status::Running
    );
}

#[tokio::test]
async fn test_abort_all_failure_after_insert_names_the_interrupt() {
    let store = Arc::new(ContendedStore::new(0).with_plan_conflicts(1));
    let service = InterruptService::builder(store.clone())
        .retry_policy(StoreRetryPolicy::none())
        .build();
    let (plan, _) = seed(&store).await;

    let request = InterruptRequest::new(InterruptType::AbortAll, &plan.id);
    let err = service.register_interrupt(request).await.unwrap_err();

    assert!(err.root().is_retryable());
    match &err {
        InterruptError::ApplyFailed { interrupt_id, .. } => {
            let recorded = store.get_interrupt(interrupt_id).await.unwrap();
            assert_eq!(recorded.interrupt_type, InterruptType::AbortAll);
            assert_eq!(recorded.state, InterruptState::Processing);
        }
        other => panic!("unexpected error: {}", other),
    }
}
