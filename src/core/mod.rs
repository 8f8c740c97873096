//! Interrupt processing engine.
//!
//! This module contains:
//! - Guard: status transition rules
//! - ExecutionStore: durable, versioned records (SQLite-backed)
//! - WaitNotify: fan-in coordination for Pause-All
//! - Handlers: one per interrupt type, dispatched through the registry
//! - InterruptService: the public entry point

pub mod context;
pub mod error;
pub mod guard;
pub mod handlers;
pub mod registry;
pub mod retry_helper;
pub mod service;
pub mod sqlite_store;
pub mod store;
pub mod store_retry;
pub mod wait_notify;

// Re-export commonly used types
pub use context::{HandlerContext, RuntimeAction};
pub use error::{ConflictCode, InterruptError};
pub use handlers::InterruptHandler;
pub use registry::InterruptRegistry;
pub use retry_helper::RetryHelper;
pub use service::{InterruptCheck, InterruptService, InterruptServiceBuilder, DEFAULT_CHANNEL};
pub use sqlite_store::SqliteExecutionStore;
pub use store::{ExecutionStore, StoreError};
pub use store_retry::StoreRetryPolicy;
pub use wait_notify::{InProcessWaitNotify, NotifyCallback, NotifyResponse, WaitError, WaitNotify};
