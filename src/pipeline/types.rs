use crate::cluster::types::NodeId;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// A value exchanged with the store, used both for arguments and replies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Nil,
    Int(i64),
    Str(String),
    Bytes(Vec<u8>),
    Array(Vec<Value>),
}

impl Value {
    /// Byte view used for key hashing. Integers hash as their decimal form.
    pub fn key_bytes(&self) -> Vec<u8> {
        match self {
            Value::Str(s) => s.as_bytes().to_vec(),
            Value::Bytes(b) => b.clone(),
            Value::Int(i) => i.to_string().into_bytes(),
            Value::Nil | Value::Array(_) => Vec::new(),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Str(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Str(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<Vec<u8>> for Value {
    fn from(value: Vec<u8>) -> Self {
        Value::Bytes(value)
    }
}

impl From<&[u8]> for Value {
    fn from(value: &[u8]) -> Self {
        Value::Bytes(value.to_vec())
    }
}

/// Routing destination of a command.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PartitionId {
    /// The single partition used when the store is not clustered.
    Main,
    /// The node currently owning the command's key slot.
    Node(NodeId),
    /// A key slot whose owner is not known yet.
    Slot(u16),
}

impl fmt::Display for PartitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PartitionId::Main => write!(f, "main"),
            PartitionId::Node(node) => write!(f, "node:{}", node.0),
            PartitionId::Slot(slot) => write!(f, "slot:{}", slot),
        }
    }
}

/// Lifecycle of a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchState {
    /// Accepting commands, no flush armed yet.
    Collecting,
    /// Accepting commands, a flush has been armed.
    Scheduled,
    /// Detached from the table and handed to the store.
    Executing,
    /// All requests resolved.
    Done,
}

/// Error delivered to a single command's caller.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CommandError {
    /// The whole round trip failed. Every command of the batch shares this same error.
    #[error("batch failed: {0}")]
    Batch(Arc<anyhow::Error>),
    /// The store rejected this command only.
    #[error("{0}")]
    Reply(String),
    /// The command is not part of the exposed command set.
    #[error("command '{0}' is not exposed by this pipeline")]
    NotExposed(String),
    /// The store returned fewer results than commands were queued.
    #[error("no result for command #{index} (batch returned {returned} results)")]
    MissingResult { index: usize, returned: usize },
    /// The request was dropped before the batch could resolve it.
    #[error("command was abandoned before completion")]
    Abandoned,
    /// The awaitable lost its resolver without a result.
    #[error("result channel closed")]
    Dropped,
}

impl CommandError {
    pub fn is_batch_failure(&self) -> bool {
        matches!(self, CommandError::Batch(_))
    }
}

/// What every command's caller eventually receives.
pub type CommandResult = Result<Value, CommandError>;

/// Out-of-band reports emitted on the pipeline's alert channel.
#[derive(Debug, Clone)]
pub enum PipelineAlert {
    /// A completion handler panicked while being resolved.
    HandlerPanicked {
        partition: PartitionId,
        command: String,
        message: String,
    },
}
