//! Runtime that forwards commands over a tokio channel.
//!
//! The receiving side is the orchestrator's dispatcher (or a test) that
//! actually drives node execution.

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::domain::NodeExecution;

use super::StepRuntime;

/// A command for the step runtime, carrying the node snapshot it applies to
#[derive(Debug, Clone)]
pub enum RuntimeCommand {
    Start(NodeExecution),
    Resume(NodeExecution),
    Abort(NodeExecution),
}

impl RuntimeCommand {
    pub fn node(&self) -> &NodeExecution {
        match self {
            RuntimeCommand::Start(node)
            | RuntimeCommand::Resume(node)
            | RuntimeCommand::Abort(node) => node,
        }
    }
}

/// Channel-backed step runtime
#[derive(Debug, Clone)]
pub struct ChannelRuntime {
    sender: mpsc::UnboundedSender<RuntimeCommand>,
}

impl ChannelRuntime {
    /// Create a runtime and the receiver its commands arrive on
    pub fn new() -> (Self, mpsc::UnboundedReceiver<RuntimeCommand>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }

    fn send(&self, command: RuntimeCommand) -> Result<()> {
        self.sender
            .send(command)
            .ok()
            .context("Runtime command receiver dropped")
    }
}

#[async_trait]
impl StepRuntime for ChannelRuntime {
    fn name(&self) -> &str {
        "channel"
    }

    async fn start(&self, node: &NodeExecution) -> Result<()> {
        self.send(RuntimeCommand::Start(node.clone()))
    }

    async fn resume(&self, node: &NodeExecution) -> Result<()> {
        self.send(RuntimeCommand::Resume(node.clone()))
    }

    async fn abort(&self, node: &NodeExecution) -> Result<()> {
        self.send(RuntimeCommand::Abort(node.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Status;

    #[tokio::test]
    async fn test_commands_are_forwarded_in_order() {
        let (runtime, mut receiver) = ChannelRuntime::new();
        let node = NodeExecution::leaf("plan", "build", Status::Queued);

        runtime.start(&node).await.unwrap();
        runtime.abort(&node).await.unwrap();

        assert!(matches!(receiver.recv().await, Some(RuntimeCommand::Start(_))));
        let abort = receiver.recv().await.unwrap();
        assert!(matches!(abort, RuntimeCommand::Abort(_)));
        assert_eq!(abort.node().id, node.id);
    }

    #[tokio::test]
    async fn test_dropped_receiver_is_an_error() {
        let (runtime, receiver) = ChannelRuntime::new();
        drop(receiver);

        let node = NodeExecution::leaf("plan", "build", Status::Queued);
        assert!(runtime.resume(&node).await.is_err());
    }
}
