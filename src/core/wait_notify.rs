//! Wait/notify coordination for fan-in over independent parties.
//!
//! A handler registers a callback under a correlation id together with the
//! set of parties expected to report. Each party reports once with
//! `done_with`; when the last one arrives the callback runs exactly once on
//! a spawned task. Nothing polls and no caller thread blocks. Withdrawing a
//! wait drops its single-fire sender so the task exits without running the
//! callback.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{debug, info};

use crate::domain::Status;

/// Errors from the wait/notify coordinator
#[derive(Debug, Error)]
pub enum WaitError {
    #[error("A wait is already registered for correlation id {0}")]
    AlreadyRegistered(String),

    #[error("Wait for correlation id {0} has no parties")]
    NoParties(String),

    #[error("Wait registry lock poisoned")]
    Poisoned,
}

/// What a party reported when it finished
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotifyResponse {
    pub party: String,
    pub status: Status,
}

/// Continuation invoked once every party of a wait has reported
#[async_trait]
pub trait NotifyCallback: Send + Sync {
    async fn notify(&self, responses: HashMap<String, NotifyResponse>);
}

/// Wait/notify coordinator interface
pub trait WaitNotify: Send + Sync {
    /// Register `callback` to run once every party in `parties` has reported
    /// on `correlation_id`. Returns immediately.
    fn wait_for_all_on(
        &self,
        channel: &str,
        correlation_id: &str,
        parties: Vec<String>,
        callback: Arc<dyn NotifyCallback>,
    ) -> Result<(), WaitError>;

    /// Report `party` done. Returns true if this report completed the wait.
    fn done_with(&self, correlation_id: &str, party: &str, response: NotifyResponse) -> bool;

    /// Withdraw a pending wait. Returns false if nothing was pending.
    fn withdraw(&self, correlation_id: &str) -> bool;

    fn is_waiting(&self, correlation_id: &str) -> bool;
}

struct PendingWait {
    channel: String,
    remaining: HashSet<String>,
    responses: HashMap<String, NotifyResponse>,
    fire: oneshot::Sender<HashMap<String, NotifyResponse>>,
}

/// In-process coordinator backed by tokio tasks and oneshot channels
#[derive(Clone, Default)]
pub struct InProcessWaitNotify {
    waits: Arc<Mutex<HashMap<String, PendingWait>>>,
}

impl InProcessWaitNotify {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of waits still pending
    pub fn pending(&self) -> usize {
        self.waits.lock().map(|waits| waits.len()).unwrap_or(0)
    }
}

impl WaitNotify for InProcessWaitNotify {
    fn wait_for_all_on(
        &self,
        channel: &str,
        correlation_id: &str,
        parties: Vec<String>,
        callback: Arc<dyn NotifyCallback>,
    ) -> Result<(), WaitError> {
        if parties.is_empty() {
            return Err(WaitError::NoParties(correlation_id.to_string()));
        }

        let mut waits = self.waits.lock().map_err(|_| WaitError::Poisoned)?;
        if waits.contains_key(correlation_id) {
            return Err(WaitError::AlreadyRegistered(correlation_id.to_string()));
        }

        let (fire, fired) = oneshot::channel();
        waits.insert(
            correlation_id.to_string(),
            PendingWait {
                channel: channel.to_string(),
                remaining: parties.into_iter().collect(),
                responses: HashMap::new(),
                fire,
            },
        );

        let correlation = correlation_id.to_string();
        tokio::spawn(async move {
            match fired.await {
                Ok(responses) => {
                    debug!(correlation_id = %correlation, "Wait complete, invoking callback");
                    callback.notify(responses).await;
                }
                Err(_) => debug!(correlation_id = %correlation, "Wait withdrawn"),
            }
        });

        debug!(%channel, %correlation_id, "Wait registered");
        Ok(())
    }

    fn done_with(&self, correlation_id: &str, party: &str, response: NotifyResponse) -> bool {
        let Ok(mut waits) = self.waits.lock() else {
            return false;
        };

        let complete = match waits.get_mut(correlation_id) {
            Some(wait) => {
                if !wait.remaining.remove(party) {
                    debug!(%correlation_id, %party, "Party already reported or unknown");
                    return false;
                }
                wait.responses.insert(party.to_string(), response);
                wait.remaining.is_empty()
            }
            None => return false,
        };

        if !complete {
            return false;
        }

        match waits.remove(correlation_id) {
            Some(wait) => {
                info!(channel = %wait.channel, %correlation_id, "All parties reported");
                // The receiver is gone only if the runtime is shutting down
                let _ = wait.fire.send(wait.responses);
                true
            }
            None => false,
        }
    }

    fn withdraw(&self, correlation_id: &str) -> bool {
        let Ok(mut waits) = self.waits.lock() else {
            return false;
        };
        let withdrawn = waits.remove(correlation_id).is_some();
        if withdrawn {
            info!(%correlation_id, "Wait withdrawn");
        }
        withdrawn
    }

    fn is_waiting(&self, correlation_id: &str) -> bool {
        self.waits
            .lock()
            .map(|waits| waits.contains_key(correlation_id))
            .unwrap_or(false)
    }
}
