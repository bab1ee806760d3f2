use super::types::{PartitionId, Value};
use crate::cluster::slot::key_slot;
use crate::cluster::types::Topology;

use std::fmt;
use std::sync::Arc;

/// Decides which partition serves a command.
///
/// Routing is recomputed on every call; ownership is always read from the topology,
/// never remembered here.
#[derive(Clone)]
pub enum Router {
    /// Non-clustered store: everything goes to `PartitionId::Main`.
    Single,
    /// Clustered store: the first argument is the key, its slot owner is the partition.
    Cluster(Arc<dyn Topology>),
}

impl Router {
    pub fn route(&self, args: &[Value]) -> PartitionId {
        match self {
            Router::Single => PartitionId::Main,
            Router::Cluster(topology) => {
                let key = args.first().map(Value::key_bytes).unwrap_or_default();
                let slot = key_slot(&key);
                match topology.resolve_owner(slot) {
                    Some(node) => PartitionId::Node(node),
                    None => PartitionId::Slot(slot),
                }
            }
        }
    }

    pub fn is_clustered(&self) -> bool {
        matches!(self, Router::Cluster(_))
    }
}

impl fmt::Debug for Router {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Router::Single => write!(f, "Router::Single"),
            Router::Cluster(topology) => write!(
                f,
                "Router::Cluster(ready={})",
                topology.is_ready()
            ),
        }
    }
}
