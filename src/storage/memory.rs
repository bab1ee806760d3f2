use super::commands::{self, Stored};
use crate::client::{BatchFuture, CommandOutcome, NativeBatch, StoreClient};
use crate::cluster::slot::key_slot;
use crate::cluster::topology::ClusterTopology;
use crate::cluster::types::{NodeId, Topology};
use crate::pipeline::commands::BUFFER_SUFFIX;
use crate::pipeline::types::Value;

use anyhow::Result;
use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Settings of the in-memory store.
#[derive(Clone, Default)]
pub struct MemoryStoreConfig {
    /// Simulated round-trip time of every batch.
    pub latency: Duration,
    /// When set, the store behaves like a cluster: a batch must target a single node.
    pub topology: Option<Arc<ClusterTopology>>,
}

/// One round trip as seen by the store.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchRecord {
    /// Node that served the batch, `None` for a non-clustered store.
    pub owner: Option<NodeId>,
    /// Command names, in execution order.
    pub commands: Vec<String>,
    /// First argument of every command, in execution order.
    pub keys: Vec<Value>,
}

pub(super) struct StoreState {
    pub(super) data: DashMap<String, Stored>,
    pub(super) expires: DashMap<String, Instant>,
    config: MemoryStoreConfig,
    records: Mutex<Vec<BatchRecord>>,
    injected_failures: Mutex<VecDeque<String>>,
    panic_next: AtomicBool,
    in_flight: DashMap<String, usize>,
    max_in_flight: DashMap<String, usize>,
    concurrent: AtomicUsize,
    max_concurrent: AtomicUsize,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl StoreState {
    pub(super) fn purge_if_expired(&self, key: &str) {
        let expired = self
            .expires
            .get(key)
            .map(|deadline| *deadline.value() <= Instant::now())
            .unwrap_or(false);
        if expired {
            self.expires.remove(key);
            self.data.remove(key);
        }
    }

    /// Node serving every command of the batch. Fails the whole batch on a split.
    fn batch_owner(&self, queued: &[(String, Vec<Value>)]) -> Result<Option<NodeId>> {
        let Some(topology) = &self.config.topology else {
            return Ok(None);
        };

        let mut owner: Option<NodeId> = None;
        for (_, args) in queued {
            let key = args.first().map(Value::key_bytes).unwrap_or_default();
            let slot = key_slot(&key);
            let node = topology
                .resolve_owner(slot)
                .ok_or_else(|| anyhow::anyhow!("CLUSTERDOWN Hash slot {} not served", slot))?;
            match &owner {
                Some(current) if current != &node => {
                    return Err(anyhow::anyhow!(
                        "CROSSSLOT Batch spans nodes {} and {}",
                        current.0,
                        node.0
                    ));
                }
                Some(_) => {}
                None => owner = Some(node),
            }
        }
        Ok(owner)
    }

    fn enter(&self, label: &str) {
        let now = {
            let mut current = self.in_flight.entry(label.to_string()).or_insert(0);
            *current += 1;
            *current
        };
        let mut max = self.max_in_flight.entry(label.to_string()).or_insert(0);
        *max = (*max).max(now);

        let concurrent = self.concurrent.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_concurrent.fetch_max(concurrent, Ordering::SeqCst);
    }

    fn leave(&self, label: &str) {
        if let Some(mut current) = self.in_flight.get_mut(label) {
            *current = current.saturating_sub(1);
        }
        self.concurrent.fetch_sub(1, Ordering::SeqCst);
    }

    async fn run(
        self: Arc<Self>,
        queued: Vec<(String, Vec<Value>)>,
    ) -> Result<Vec<CommandOutcome>> {
        let owner = self.batch_owner(&queued)?;
        let label = owner
            .as_ref()
            .map(|node| node.0.clone())
            .unwrap_or_else(|| "main".to_string());

        self.enter(&label);
        if self.config.latency.is_zero() {
            tokio::task::yield_now().await;
        } else {
            tokio::time::sleep(self.config.latency).await;
        }
        self.leave(&label);

        if self.panic_next.swap(false, Ordering::SeqCst) {
            panic!("injected panic in batch execution");
        }
        let injected = lock(&self.injected_failures).pop_front();
        if let Some(message) = injected {
            return Err(anyhow::anyhow!(message));
        }

        let mut results = Vec::with_capacity(queued.len());
        let mut record = BatchRecord {
            owner,
            commands: Vec::with_capacity(queued.len()),
            keys: Vec::with_capacity(queued.len()),
        };
        for (command, args) in queued {
            record
                .keys
                .push(args.first().cloned().unwrap_or(Value::Nil));
            results.push(self.apply(&command, &args));
            record.commands.push(command);
        }

        tracing::trace!(
            "Executed batch of {} commands on {}",
            record.commands.len(),
            label
        );
        lock(&self.records).push(record);

        Ok(results)
    }

    fn apply(&self, command: &str, args: &[Value]) -> CommandOutcome {
        let (base, buffered) = match command.strip_suffix(BUFFER_SUFFIX) {
            Some(base) if !base.is_empty() => (base, true),
            _ => (command, false),
        };
        let value = commands::execute(self, base, args)?;
        Ok(if buffered { into_bytes(value) } else { value })
    }
}

fn into_bytes(value: Value) -> Value {
    match value {
        Value::Str(s) => Value::Bytes(s.into_bytes()),
        Value::Array(items) => Value::Array(items.into_iter().map(into_bytes).collect()),
        other => other,
    }
}

/// In-memory key-value store with a native batch primitive.
///
/// Cloning shares the same data.
#[derive(Clone)]
pub struct MemoryStore {
    state: Arc<StoreState>,
}

impl MemoryStore {
    pub fn new() -> Arc<Self> {
        Self::with_config(MemoryStoreConfig::default())
    }

    pub fn with_config(config: MemoryStoreConfig) -> Arc<Self> {
        Arc::new(Self {
            state: Arc::new(StoreState {
                data: DashMap::new(),
                expires: DashMap::new(),
                config,
                records: Mutex::new(Vec::new()),
                injected_failures: Mutex::new(VecDeque::new()),
                panic_next: AtomicBool::new(false),
                in_flight: DashMap::new(),
                max_in_flight: DashMap::new(),
                concurrent: AtomicUsize::new(0),
                max_concurrent: AtomicUsize::new(0),
            }),
        })
    }

    /// Runs a single command as its own round trip, bypassing any batching.
    pub async fn execute_one(&self, command: &str, args: Vec<Value>) -> Result<Value> {
        let mut batch = self.create_batch();
        batch.append(command, args);
        let mut results = batch.execute().await?;
        match results.pop() {
            Some(Ok(value)) => Ok(value),
            Some(Err(reply)) => Err(anyhow::anyhow!(reply)),
            None => Err(anyhow::anyhow!("empty batch reply")),
        }
    }

    /// Makes the next executed batch fail as a whole with `message`.
    pub fn fail_next_batch(&self, message: &str) {
        lock(&self.state.injected_failures).push_back(message.to_string());
    }

    /// Makes the next executed batch panic inside the store.
    pub fn panic_next_batch(&self) {
        self.state.panic_next.store(true, Ordering::SeqCst);
    }

    /// Every batch executed so far, in completion order.
    pub fn batches(&self) -> Vec<BatchRecord> {
        lock(&self.state.records).clone()
    }

    pub fn batch_count(&self) -> usize {
        lock(&self.state.records).len()
    }

    /// Highest number of simultaneous round trips seen for one owner ("main" when not clustered).
    pub fn max_in_flight(&self, owner: &str) -> usize {
        self.state
            .max_in_flight
            .get(owner)
            .map(|entry| *entry.value())
            .unwrap_or(0)
    }

    /// Highest number of simultaneous round trips seen across all owners.
    pub fn max_concurrent(&self) -> usize {
        self.state.max_concurrent.load(Ordering::SeqCst)
    }

    pub fn key_count(&self) -> usize {
        self.state.data.len()
    }

    pub fn clear(&self) {
        self.state.data.clear();
        self.state.expires.clear();
    }
}

impl StoreClient for MemoryStore {
    type Batch = MemoryBatch;

    fn create_batch(&self) -> MemoryBatch {
        MemoryBatch {
            state: self.state.clone(),
            queued: Vec::new(),
        }
    }

    fn enumerate_commands(&self) -> Vec<String> {
        commands::SUPPORTED_COMMANDS
            .iter()
            .map(|name| name.to_string())
            .collect()
    }
}

pub struct MemoryBatch {
    state: Arc<StoreState>,
    queued: Vec<(String, Vec<Value>)>,
}

impl NativeBatch for MemoryBatch {
    fn append(&mut self, command: &str, args: Vec<Value>) {
        self.queued.push((command.to_string(), args));
    }

    fn len(&self) -> usize {
        self.queued.len()
    }

    fn execute(self) -> BatchFuture {
        Box::pin(self.state.run(self.queued))
    }
}
