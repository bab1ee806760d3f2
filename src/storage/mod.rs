//! In-Memory Store Module
//!
//! A small key-value store that speaks the client contracts of `crate::client`, so the
//! pipeline can be exercised end to end without a server.
//!
//! ## Core Concepts
//! - **Native batches**: `MemoryBatch` queues commands and runs them in one simulated round
//!   trip, with configurable latency.
//! - **Observability**: every executed batch is recorded (`BatchRecord`), together with the
//!   peak number of concurrent round trips per owner.
//! - **Fault injection**: the next batch can be made to fail as a whole, or to panic.
//! - **Cluster mode**: given a `ClusterTopology`, a batch whose keys span several owners is
//!   rejected as a whole, the way a real cluster node refuses cross-node pipelines.

pub mod commands;
pub mod memory;
