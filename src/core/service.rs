//! Public entry point of the interrupt engine.

use std::sync::Arc;

use serde::Serialize;
use tracing::{info, instrument};

use crate::adapters::{LoggingRuntime, StatusObserver, StepRuntime, TracingObserver};
use crate::domain::{Interrupt, InterruptRequest, InterruptType};

use super::context::HandlerContext;
use super::error::InterruptError;
use super::registry::InterruptRegistry;
use super::store::ExecutionStore;
use super::store_retry::StoreRetryPolicy;
use super::wait_notify::{InProcessWaitNotify, WaitNotify};

/// Default wait/notify channel for fan-in waits
pub const DEFAULT_CHANNEL: &str = "orchestration";

/// Verdict for a node about to start
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InterruptCheck {
    pub proceed: bool,
    pub reason: String,
}

impl InterruptCheck {
    fn proceed() -> Self {
        Self {
            proceed: true,
            reason: "No interrupts found".to_string(),
        }
    }

    fn hold(reason: impl Into<String>) -> Self {
        Self {
            proceed: false,
            reason: reason.into(),
        }
    }
}

/// Registers and applies interrupts against an execution store
pub struct InterruptService {
    ctx: Arc<HandlerContext>,
    registry: InterruptRegistry,
}

impl InterruptService {
    pub fn builder(store: Arc<dyn ExecutionStore>) -> InterruptServiceBuilder {
        InterruptServiceBuilder::new(store)
    }

    pub fn store(&self) -> &Arc<dyn ExecutionStore> {
        &self.ctx.store
    }

    pub fn wait_notify(&self) -> &Arc<dyn WaitNotify> {
        &self.ctx.waits
    }

    pub fn registry(&self) -> &InterruptRegistry {
        &self.registry
    }

    /// Validate, persist and apply an interrupt.
    ///
    /// Returns the interrupt as it stands after apply. A Pause-All comes back
    /// `PROCESSING` until every held node has been released.
    #[instrument(skip(self, request), fields(
        interrupt_type = %request.interrupt_type,
        plan_execution_id = %request.plan_execution_id,
        node_execution_id = request.node_execution_id.as_deref().unwrap_or("")
    ))]
    pub async fn register_interrupt(&self, request: InterruptRequest) -> Result<Interrupt, InterruptError> {
        self.registry.dispatch(request).await
    }

    /// Decide whether a queued node may start, holding it back under an
    /// active Abort-All or Pause-All
    #[instrument(skip(self))]
    pub async fn check_interrupts_before_node_start(
        &self,
        plan_execution_id: &str,
        node_execution_id: &str,
    ) -> Result<InterruptCheck, InterruptError> {
        let active = self.ctx.active_interrupts(plan_execution_id).await?;

        for (interrupt_type, reason) in [
            (InterruptType::AbortAll, "Plan is being aborted"),
            (InterruptType::PauseAll, "Plan is paused"),
        ] {
            let Some(interrupt) = active.iter().find(|i| i.interrupt_type == interrupt_type)
            else {
                continue;
            };

            let node = self
                .registry
                .handler(interrupt_type)?
                .handle_interrupt_for_node(interrupt, node_execution_id)
                .await?;
            info!(
                interrupt_id = %interrupt.id,
                status = %node.status,
                "Node held back before start"
            );
            return Ok(InterruptCheck::hold(reason));
        }

        Ok(InterruptCheck::proceed())
    }
}

pub struct InterruptServiceBuilder {
    store: Arc<dyn ExecutionStore>,
    waits: Option<Arc<dyn WaitNotify>>,
    runtime: Option<Arc<dyn StepRuntime>>,
    observers: Vec<Arc<dyn StatusObserver>>,
    retry: StoreRetryPolicy,
    channel: String,
}

impl InterruptServiceBuilder {
    fn new(store: Arc<dyn ExecutionStore>) -> Self {
        Self {
            store,
            waits: None,
            runtime: None,
            observers: Vec::new(),
            retry: StoreRetryPolicy::default(),
            channel: DEFAULT_CHANNEL.to_string(),
        }
    }

    pub fn wait_notify(mut self, waits: Arc<dyn WaitNotify>) -> Self {
        self.waits = Some(waits);
        self
    }

    pub fn runtime(mut self, runtime: Arc<dyn StepRuntime>) -> Self {
        self.runtime = Some(runtime);
        self
    }

    pub fn observer(mut self, observer: Arc<dyn StatusObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn retry_policy(mut self, retry: StoreRetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = channel.into();
        self
    }

    /// Defaults: in-process wait/notify, logging runtime, tracing observer
    pub fn build(self) -> InterruptService {
        let observers = if self.observers.is_empty() {
            vec![Arc::new(TracingObserver) as Arc<dyn StatusObserver>]
        } else {
            self.observers
        };

        let ctx = Arc::new(HandlerContext {
            store: self.store,
            waits: self
                .waits
                .unwrap_or_else(|| Arc::new(InProcessWaitNotify::new())),
            runtime: self
                .runtime
                .unwrap_or_else(|| Arc::new(LoggingRuntime::new())),
            observers,
            retry: self.retry,
            channel: self.channel,
        });

        InterruptService {
            registry: InterruptRegistry::with_defaults(ctx.clone()),
            ctx,
        }
    }
}
