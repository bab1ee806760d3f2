//! Store Client Contracts
//!
//! The pipeline never speaks a wire protocol itself. It drives whatever client it wraps
//! through the two traits defined here.
//!
//! ## Contracts
//! - **`StoreClient`**: creates empty native batches and enumerates the command names the
//!   client understands. Enumeration is consulted once, when the pipeline is built.
//! - **`NativeBatch`**: queues commands without executing them, then runs them all as one
//!   round trip. The outcome is either a batch-level error or one result per appended
//!   command, in append order.

use crate::pipeline::types::Value;

use std::future::Future;
use std::pin::Pin;

/// Per-command outcome reported by a native batch.
pub type CommandOutcome = Result<Value, ReplyError>;

/// Type alias for the boxed future returned by `NativeBatch::execute`.
/// `Err` is a batch-level failure: the round trip itself did not happen or was rejected whole.
pub type BatchFuture = Pin<Box<dyn Future<Output = anyhow::Result<Vec<CommandOutcome>>> + Send>>;

/// An error reply for a single command inside an otherwise successful batch.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct ReplyError(pub String);

impl ReplyError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// A client able to build native batches.
pub trait StoreClient: Send + Sync + 'static {
    type Batch: NativeBatch;

    /// Instantiates an empty native batch.
    fn create_batch(&self) -> Self::Batch;

    /// Names of the commands this client supports.
    fn enumerate_commands(&self) -> Vec<String>;
}

/// A native batch under construction.
pub trait NativeBatch: Send + 'static {
    /// Queues one command without executing it.
    fn append(&mut self, command: &str, args: Vec<Value>);

    /// Number of queued commands.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Runs every queued command as a single round trip.
    fn execute(self) -> BatchFuture;
}
