//! Batches and the resolution channel.
//!
//! A `Batch` collects requests for one partition and forwards every append straight into
//! the native batch, so both sequences always share the same order. `execute` consumes the
//! batch: what comes out (`ExecutingBatch`) cannot accept further commands.

use super::types::{BatchState, CommandError, CommandResult, PartitionId, Value};
use crate::client::{BatchFuture, NativeBatch};

use tokio::sync::oneshot;
use uuid::Uuid;

/// Error-first completion handler supplied by callback-style callers.
pub type CompletionHandler = Box<dyn FnOnce(CommandResult) + Send + 'static>;

enum Channel {
    Future(oneshot::Sender<CommandResult>),
    Callback(CompletionHandler),
}

/// Delivers a command's result to its caller, whichever calling convention it used.
pub struct Resolver {
    channel: Option<Channel>,
}

impl Resolver {
    /// Resolver backing an awaitable, plus the receiving half for the caller.
    pub fn future() -> (Self, oneshot::Receiver<CommandResult>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                channel: Some(Channel::Future(tx)),
            },
            rx,
        )
    }

    pub fn callback<F>(handler: F) -> Self
    where
        F: FnOnce(CommandResult) + Send + 'static,
    {
        Self {
            channel: Some(Channel::Callback(Box::new(handler))),
        }
    }

    /// Hands the result over. A caller that dropped its awaitable is not an error.
    pub fn complete(mut self, result: CommandResult) {
        match self.channel.take() {
            Some(Channel::Future(tx)) => {
                let _ = tx.send(result);
            }
            Some(Channel::Callback(handler)) => handler(result),
            None => {}
        }
    }
}

impl Drop for Resolver {
    fn drop(&mut self) {
        // A callback never hears about a dropped sender the way a receiver does.
        if let Some(Channel::Callback(handler)) = self.channel.take()
            && !std::thread::panicking()
        {
            handler(Err(CommandError::Abandoned));
        }
    }
}

/// One queued command awaiting its result.
pub struct CommandRequest {
    pub command: String,
    pub resolver: Resolver,
}

/// The collecting batch of a partition.
pub struct Batch<B: NativeBatch> {
    id: Uuid,
    partition: PartitionId,
    native: B,
    requests: Vec<CommandRequest>,
    state: BatchState,
}

impl<B: NativeBatch> Batch<B> {
    pub fn new(partition: PartitionId, native: B) -> Self {
        Self {
            id: Uuid::new_v4(),
            partition,
            native,
            requests: Vec::new(),
            state: BatchState::Collecting,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn partition(&self) -> &PartitionId {
        &self.partition
    }

    pub fn state(&self) -> BatchState {
        self.state
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    /// Appends a command to both the request list and the native batch.
    pub fn push(&mut self, command: &str, args: Vec<Value>, resolver: Resolver) {
        self.native.append(command, args);
        self.requests.push(CommandRequest {
            command: command.to_string(),
            resolver,
        });
    }

    /// Marks the batch as having a flush pending. Returns `false` if it already had one.
    pub fn arm(&mut self) -> bool {
        if self.state == BatchState::Collecting {
            self.state = BatchState::Scheduled;
            return true;
        }
        false
    }

    /// Freezes the batch. The native batch is only handed its `execute` call once the
    /// returned future is first polled, so a client that panics while starting a round trip
    /// panics inside whatever task drives the future.
    pub fn execute(self) -> (ExecutingBatch, BatchFuture) {
        let native = self.native;
        let future: BatchFuture = Box::pin(async move { native.execute().await });
        (
            ExecutingBatch {
                id: self.id,
                partition: self.partition,
                requests: self.requests,
                state: BatchState::Executing,
            },
            future,
        )
    }
}

/// A batch whose command list is frozen.
pub struct ExecutingBatch {
    pub id: Uuid,
    pub partition: PartitionId,
    pub requests: Vec<CommandRequest>,
    pub state: BatchState,
}

impl ExecutingBatch {
    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }
}
