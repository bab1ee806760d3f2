//! Automatic Pipelining Module
//!
//! Groups independently issued commands into native batches without callers ever
//! building a batch themselves.
//!
//! ## Architecture Overview
//! 1. **Façade**: `AutoPipeline` exposes the allowed commands. Each call routes the command,
//!    appends it to its partition's collecting batch and bumps the queued counters before
//!    returning.
//! 2. **Routing**: `Router` picks the partition: one for a plain store, the owning node of
//!    the key's slot for a cluster.
//! 3. **Scheduling**: the first command of a batch spawns its flush. At most one batch per
//!    partition is in flight; anything queued meanwhile is flushed as soon as it completes.
//! 4. **Dispatch**: results return in append order. A batch failure reaches every command,
//!    a command failure only its own caller, and a panicking handler only itself.
//!
//! ## Submodules
//! - **`types`**: values, partition ids, errors, alerts.
//! - **`options`** / **`commands`**: the exposed command surface.
//! - **`router`**, **`batch`**, **`table`**, **`scheduler`**, **`dispatcher`**: the core.
//! - **`facade`**: the public wrapper.

pub mod batch;
pub mod commands;
pub mod dispatcher;
pub mod facade;
pub mod options;
pub mod router;
pub mod scheduler;
pub mod table;
pub mod types;

pub use facade::{AutoPipeline, Command, CommandFuture};
pub use options::PipelineOptions;
pub use types::{CommandError, CommandResult, PartitionId, PipelineAlert, Value};

#[cfg(test)]
mod tests;
