use serde::{Deserialize, Serialize};
use std::ops::RangeInclusive;

/// Number of hash slots in the cluster keyspace.
pub const SLOT_COUNT: u16 = 16384;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

/// A contiguous slot range owned by one node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotRange {
    pub slots: RangeInclusive<u16>,
    pub owner: NodeId,
}

/// Resolves slot ownership for the router.
///
/// Implementations must be cheap to call: the router asks on every command and never
/// caches the answer, so ownership changes are picked up immediately.
pub trait Topology: Send + Sync + 'static {
    fn resolve_owner(&self, slot: u16) -> Option<NodeId>;

    fn is_ready(&self) -> bool;
}
