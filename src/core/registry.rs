//! Interrupt type to handler lookup, and the register-then-apply dispatch.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{error, info};

use crate::domain::{Interrupt, InterruptRequest, InterruptType};

use super::context::HandlerContext;
use super::error::InterruptError;
use super::handlers::{
    AbortAllInterruptHandler, AbortInterruptHandler, InterruptHandler, MarkStatusInterruptHandler,
    PauseAllInterruptHandler, ResumeAllInterruptHandler, RetryInterruptHandler,
};

#[derive(Default)]
pub struct InterruptRegistry {
    handlers: HashMap<InterruptType, Arc<dyn InterruptHandler>>,
}

impl InterruptRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with a handler for every interrupt type
    pub fn with_defaults(ctx: Arc<HandlerContext>) -> Self {
        let mut registry = Self::new();

        registry.register(
            InterruptType::PauseAll,
            Arc::new(PauseAllInterruptHandler::new(ctx.clone())),
        );
        registry.register(
            InterruptType::ResumeAll,
            Arc::new(ResumeAllInterruptHandler::new(ctx.clone())),
        );
        registry.register(
            InterruptType::Retry,
            Arc::new(RetryInterruptHandler::new(ctx.clone())),
        );
        registry.register(
            InterruptType::Abort,
            Arc::new(AbortInterruptHandler::new(ctx.clone())),
        );
        registry.register(
            InterruptType::AbortAll,
            Arc::new(AbortAllInterruptHandler::new(ctx.clone())),
        );

        for interrupt_type in InterruptType::ALL {
            if let Some(handler) = MarkStatusInterruptHandler::new(ctx.clone(), interrupt_type) {
                registry.register(interrupt_type, Arc::new(handler));
            }
        }

        registry
    }

    /// Install a handler, returning the one it replaces
    pub fn register(
        &mut self,
        interrupt_type: InterruptType,
        handler: Arc<dyn InterruptHandler>,
    ) -> Option<Arc<dyn InterruptHandler>> {
        self.handlers.insert(interrupt_type, handler)
    }

    pub fn handler(&self, interrupt_type: InterruptType) -> Result<Arc<dyn InterruptHandler>, InterruptError> {
        self.handlers
            .get(&interrupt_type)
            .cloned()
            .ok_or(InterruptError::UnsupportedInterruptType(interrupt_type))
    }

    pub fn contains(&self, interrupt_type: InterruptType) -> bool {
        self.handlers.contains_key(&interrupt_type)
    }

    /// Register the interrupt, then apply it.
    ///
    /// Apply is never retried: a failure leaves the interrupt `PROCESSING`
    /// and comes back as `ApplyFailed` naming it.
    pub async fn dispatch(&self, request: InterruptRequest) -> Result<Interrupt, InterruptError> {
        let handler = self.handler(request.interrupt_type)?;

        let interrupt = handler.register_interrupt(request).await?;
        let interrupt_id = interrupt.id.clone();

        match handler.handle_interrupt(interrupt).await {
            Ok(interrupt) => {
                info!(
                    interrupt_id = %interrupt.id,
                    interrupt_type = %interrupt.interrupt_type,
                    state = %interrupt.state,
                    "Interrupt applied"
                );
                Ok(interrupt)
            }
            Err(e) => {
                error!(%interrupt_id, error = %e, "Interrupt apply failed, left in PROCESSING");
                Err(InterruptError::ApplyFailed {
                    interrupt_id,
                    source: Box::new(e),
                })
            }
        }
    }
}
