//! Slot Ownership Table
//!
//! Keeps track of which node serves every hash slot. Slots are handed out in contiguous
//! ranges; `rebalance` spreads the whole keyspace evenly over a sorted node list so every
//! process that sees the same membership derives the same layout.
//!
//! Every change bumps an epoch published on a `watch` channel. Readiness means every slot
//! has an owner.

use super::types::{NodeId, SLOT_COUNT, SlotRange, Topology};

use dashmap::DashMap;
use std::ops::RangeInclusive;
use std::sync::Arc;
use tokio::sync::watch;

pub struct ClusterTopology {
    owners: DashMap<u16, NodeId>,
    epoch: watch::Sender<u64>,
}

impl ClusterTopology {
    /// Creates an empty topology. It reports not-ready until every slot is assigned.
    pub fn new() -> Arc<Self> {
        let (epoch, _) = watch::channel(0);
        Arc::new(Self {
            owners: DashMap::new(),
            epoch,
        })
    }

    /// Creates a topology with the keyspace split evenly across `nodes`.
    pub fn with_nodes(nodes: &[NodeId]) -> Arc<Self> {
        let topology = Self::new();
        topology.rebalance(nodes);
        topology
    }

    /// Assigns a slot range to `owner`, replacing any previous owner.
    pub fn assign(&self, slots: RangeInclusive<u16>, owner: NodeId) {
        let end = (*slots.end()).min(SLOT_COUNT - 1);
        for slot in *slots.start()..=end {
            self.owners.insert(slot, owner.clone());
        }
        tracing::debug!(
            "Assigned slots {}..={} to {:?}",
            slots.start(),
            end,
            owner
        );
        self.bump();
    }

    /// Drops ownership of a slot range, e.g. while it migrates.
    pub fn unassign(&self, slots: RangeInclusive<u16>) {
        for slot in slots {
            self.owners.remove(&slot);
        }
        self.bump();
    }

    /// Replaces the whole layout with contiguous, near-equal ranges over the sorted nodes.
    pub fn rebalance(&self, nodes: &[NodeId]) {
        self.owners.clear();

        let mut nodes = nodes.to_vec();
        nodes.sort();
        nodes.dedup();

        if !nodes.is_empty() {
            let total = SLOT_COUNT as usize;
            let count = nodes.len();
            for (idx, node) in nodes.iter().enumerate() {
                let start = idx * total / count;
                let end = (idx + 1) * total / count;
                for slot in start..end {
                    self.owners.insert(slot as u16, node.clone());
                }
            }
            tracing::info!("Rebalanced {} slots across {} nodes", total, count);
        }

        self.bump();
    }

    /// Current layout compressed into contiguous ranges, in slot order.
    pub fn ranges(&self) -> Vec<SlotRange> {
        let mut ranges: Vec<SlotRange> = Vec::new();
        for slot in 0..SLOT_COUNT {
            let Some(owner) = self.owners.get(&slot).map(|entry| entry.value().clone()) else {
                continue;
            };
            match ranges.last_mut() {
                Some(last) if last.owner == owner && *last.slots.end() + 1 == slot => {
                    last.slots = *last.slots.start()..=slot;
                }
                _ => ranges.push(SlotRange {
                    slots: slot..=slot,
                    owner,
                }),
            }
        }
        ranges
    }

    /// Distinct owners, sorted.
    pub fn nodes(&self) -> Vec<NodeId> {
        let mut nodes: Vec<NodeId> = self
            .owners
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        nodes.sort();
        nodes.dedup();
        nodes
    }

    pub fn epoch(&self) -> u64 {
        *self.epoch.borrow()
    }

    /// Notifies on every topology change.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.epoch.subscribe()
    }

    /// Resolves once every slot has an owner.
    pub async fn wait_ready(&self) {
        let mut changes = self.subscribe();
        while !self.is_ready() {
            if changes.changed().await.is_err() {
                return;
            }
        }
    }

    fn bump(&self) {
        self.epoch.send_modify(|epoch| *epoch += 1);
    }
}

impl Topology for ClusterTopology {
    fn resolve_owner(&self, slot: u16) -> Option<NodeId> {
        self.owners.get(&slot).map(|entry| entry.value().clone())
    }

    fn is_ready(&self) -> bool {
        self.owners.len() == SLOT_COUNT as usize
    }
}
