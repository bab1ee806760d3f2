//! Automatic Pipelining Library
//!
//! A transparent request-coalescing layer for key-value store clients. Commands issued in
//! the same scheduling turn are grouped into as few native batches as possible, with at most
//! one batch in flight per partition, and every caller still receives its own result.
//!
//! ## Modules
//! - **`client`**: the contracts a wrapped client fulfils (native batches, command list).
//! - **`cluster`**: key slot hashing and slot ownership for clustered stores.
//! - **`pipeline`**: the coalescing scheduler and its public façade, `AutoPipeline`.
//! - **`storage`**: an in-memory store client, used by the benchmark binary and the tests.

pub mod client;
pub mod cluster;
pub mod pipeline;
pub mod storage;

pub use pipeline::{AutoPipeline, CommandError, PartitionId, PipelineOptions, Value};
