//! Partition Table
//!
//! Maps each partition to its collecting batch, its in-flight flag and its queued count.
//! Every operation is a single critical section on that partition: a `DashMap` shard guard
//! plus a per-partition mutex. Nothing here awaits and no guard escapes a method.

use super::batch::{Batch, Resolver};
use super::types::{BatchState, PartitionId, Value};
use crate::client::NativeBatch;

use dashmap::DashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

pub struct PartitionSlot<B: NativeBatch> {
    collecting: Option<Batch<B>>,
    in_flight: bool,
    queued: usize,
}

impl<B: NativeBatch> PartitionSlot<B> {
    fn new() -> Self {
        Self {
            collecting: None,
            in_flight: false,
            queued: 0,
        }
    }

    fn is_idle(&self) -> bool {
        self.collecting.is_none() && !self.in_flight && self.queued == 0
    }
}

/// Result of registering one command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Enqueued {
    /// Position of the command inside its batch.
    pub position: usize,
    /// Whether the caller must schedule a flush for this partition.
    pub arm: bool,
}

pub struct PartitionTable<B: NativeBatch> {
    slots: DashMap<PartitionId, Mutex<PartitionSlot<B>>>,
}

fn lock<B: NativeBatch>(slot: &Mutex<PartitionSlot<B>>) -> MutexGuard<'_, PartitionSlot<B>> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<B: NativeBatch> PartitionTable<B> {
    pub fn new() -> Self {
        Self {
            slots: DashMap::new(),
        }
    }

    /// Appends a command to the partition's collecting batch, creating the batch if needed.
    pub fn enqueue<F>(
        &self,
        partition: &PartitionId,
        command: &str,
        args: Vec<Value>,
        resolver: Resolver,
        create_batch: F,
    ) -> Enqueued
    where
        F: FnOnce() -> B,
    {
        let entry = self
            .slots
            .entry(partition.clone())
            .or_insert_with(|| Mutex::new(PartitionSlot::new()));
        let mut slot = lock(entry.value());

        let batch = slot
            .collecting
            .get_or_insert_with(|| Batch::new(partition.clone(), create_batch()));
        batch.push(command, args, resolver);
        let position = batch.len() - 1;
        let arm = batch.arm();

        slot.queued += 1;

        Enqueued { position, arm }
    }

    /// Detaches the collecting batch and marks the partition in flight.
    ///
    /// Returns `None` when a batch is already executing or nothing is collecting.
    pub fn try_begin(&self, partition: &PartitionId) -> Option<Batch<B>> {
        let entry = self.slots.get(partition)?;
        let mut slot = lock(entry.value());

        if slot.in_flight {
            return None;
        }
        let batch = slot.collecting.take()?;
        slot.in_flight = true;
        Some(batch)
    }

    /// Clears the in-flight flag once `resolved` commands are about to be delivered.
    pub fn finish(&self, partition: &PartitionId, resolved: usize) {
        if let Some(entry) = self.slots.get(partition) {
            let mut slot = lock(entry.value());
            slot.in_flight = false;
            slot.queued = slot.queued.saturating_sub(resolved);
        }

        self.slots
            .remove_if(partition, |_, slot| lock(slot).is_idle());
    }

    pub fn queued(&self, partition: &PartitionId) -> usize {
        self.slots
            .get(partition)
            .map(|entry| {
                let slot = lock(entry.value());
                slot.queued
            })
            .unwrap_or(0)
    }

    pub fn is_in_flight(&self, partition: &PartitionId) -> bool {
        self.slots
            .get(partition)
            .map(|entry| {
                let slot = lock(entry.value());
                slot.in_flight
            })
            .unwrap_or(false)
    }

    /// State of the partition's collecting batch, if there is one.
    pub fn collecting_state(&self, partition: &PartitionId) -> Option<BatchState> {
        let entry = self.slots.get(partition)?;
        let slot = lock(entry.value());
        let state = slot.collecting.as_ref().map(|batch| batch.state());
        state
    }

    pub fn collecting_len(&self, partition: &PartitionId) -> usize {
        self.slots
            .get(partition)
            .map(|entry| {
                let slot = lock(entry.value());
                slot.collecting.as_ref().map_or(0, |batch| batch.len())
            })
            .unwrap_or(0)
    }

    /// Partitions currently tracked (collecting or in flight).
    pub fn partitions(&self) -> Vec<PartitionId> {
        self.slots.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

impl<B: NativeBatch> Default for PartitionTable<B> {
    fn default() -> Self {
        Self::new()
    }
}
