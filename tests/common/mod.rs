//! Shared fixtures for the interrupt engine integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use plancontrol::adapters::{ChannelRuntime, RuntimeCommand};
use plancontrol::core::{
    ExecutionStore, InProcessWaitNotify, InterruptService, SqliteExecutionStore, StoreRetryPolicy,
};
use plancontrol::domain::{Interrupt, InterruptState, NodeExecution, PlanExecution, Status};
use tokio::sync::mpsc::UnboundedReceiver;

pub struct Harness {
    pub service: Arc<InterruptService>,
    pub store: Arc<SqliteExecutionStore>,
    pub waits: InProcessWaitNotify,
    pub commands: UnboundedReceiver<RuntimeCommand>,
}

/// In-memory store, in-process wait/notify and a channel runtime
pub fn harness() -> Harness {
    let store = Arc::new(SqliteExecutionStore::in_memory().unwrap());
    harness_with_store(store)
}

pub fn harness_with_store(store: Arc<SqliteExecutionStore>) -> Harness {
    let waits = InProcessWaitNotify::new();
    let (runtime, commands) = ChannelRuntime::new();

    let service = InterruptService::builder(store.clone())
        .wait_notify(Arc::new(waits.clone()))
        .runtime(Arc::new(runtime))
        .retry_policy(fast_retry())
        .build();

    Harness {
        service: Arc::new(service),
        store,
        waits,
        commands,
    }
}

pub fn fast_retry() -> StoreRetryPolicy {
    StoreRetryPolicy {
        max_attempts: 3,
        initial_delay_ms: 1,
        max_delay_ms: 5,
    }
}

/// A running plan with one leaf per given status
pub async fn seed_plan(
    store: &dyn ExecutionStore,
    leaves: &[Status],
) -> (PlanExecution, Vec<NodeExecution>) {
    let plan = PlanExecution::new("nightly");
    store.save_plan_execution(&plan).await.unwrap();

    let mut nodes = Vec::new();
    for (i, status) in leaves.iter().enumerate() {
        let node = NodeExecution::leaf(&plan.id, format!("step-{}", i + 1), *status);
        store.save_node_execution(&node).await.unwrap();
        nodes.push(node);
    }
    (plan, nodes)
}

pub async fn node(store: &dyn ExecutionStore, id: &str) -> NodeExecution {
    store.get_node_execution(id).await.unwrap()
}

pub async fn plan_status(store: &dyn ExecutionStore, id: &str) -> Status {
    store.get_plan_execution(id).await.unwrap().status
}

pub async fn interrupt_state(store: &dyn ExecutionStore, id: &str) -> InterruptState {
    store.get_interrupt(id).await.unwrap().state
}

/// Poll until the interrupt reaches `state` (fan-in continuations run on
/// spawned tasks)
pub async fn wait_for_state(store: &dyn ExecutionStore, id: &str, state: InterruptState) -> Interrupt {
    for _ in 0..100 {
        let interrupt = store.get_interrupt(id).await.unwrap();
        if interrupt.state == state {
            return interrupt;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("interrupt {} never reached {}", id, state);
}

/// Drain runtime commands sent so far
pub fn drain(commands: &mut UnboundedReceiver<RuntimeCommand>) -> Vec<RuntimeCommand> {
    let mut sent = Vec::new();
    while let Ok(command) = commands.try_recv() {
        sent.push(command);
    }
    sent
}
