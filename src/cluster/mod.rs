//! Cluster Topology Module
//!
//! Describes how a clustered store spreads its keyspace, so the pipeline can keep one batch
//! per node instead of one batch for everything.
//!
//! ## Core Concepts
//! - **Slots**: every key hashes (CRC16, honoring `{hash tags}`) to one of 16384 slots.
//! - **Ownership**: `ClusterTopology` maps slots to nodes in contiguous ranges and announces
//!   every change on a `watch` channel.
//! - **Lookup**: the `Topology` trait is all the router needs; other discovery mechanisms can
//!   implement it instead.

pub mod slot;
pub mod topology;
pub mod types;
