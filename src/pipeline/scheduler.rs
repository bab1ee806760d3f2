//! Flush Scheduler
//!
//! Decides when a collecting batch leaves the table and goes to the store.
//!
//! ## Lifecycle
//! 1. **Arm**: the first command of a fresh batch spawns a flush task. The task only runs
//!    once the registering code yields, so everything issued in the same turn joins the
//!    same batch. There is no timer.
//! 2. **Guard**: a flush for a partition that already has a batch in flight does nothing.
//!    The running flush picks the new batch up when it completes.
//! 3. **Execute**: the batch is detached (new commands start a fresh one) and its native
//!    round trip, including the client's `execute` call itself, runs in its own task. A panic
//!    anywhere inside the client surfaces as a batch-level failure, and the partition is
//!    always released afterwards.
//! 4. **Drain**: after dispatching, the same task flushes the next accumulated batch at
//!    once, without another deferral, until the partition has no backlog.

use super::batch::Resolver;
use super::dispatcher::Dispatcher;
use super::table::PartitionTable;
use super::types::{PartitionId, Value};
use crate::client::StoreClient;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tokio::runtime::Handle;

pub struct Scheduler<C: StoreClient> {
    client: Arc<C>,
    table: PartitionTable<C::Batch>,
    dispatcher: Dispatcher,
    runtime: Handle,
    queued: AtomicUsize,
    flushed_batches: AtomicU64,
}

impl<C: StoreClient> Scheduler<C> {
    pub fn new(client: Arc<C>, dispatcher: Dispatcher, runtime: Handle) -> Arc<Self> {
        Arc::new(Self {
            client,
            table: PartitionTable::new(),
            dispatcher,
            runtime,
            queued: AtomicUsize::new(0),
            flushed_batches: AtomicU64::new(0),
        })
    }

    /// Registers a command and arms a flush if its batch does not have one yet.
    pub fn enqueue(
        self: &Arc<Self>,
        partition: PartitionId,
        command: &str,
        args: Vec<Value>,
        resolver: Resolver,
    ) {
        // Counted before the table sees it, so a concurrent flush never observes more
        // resolved commands than registered ones.
        self.queued.fetch_add(1, Ordering::SeqCst);

        let enqueued = self.table.enqueue(&partition, command, args, resolver, || {
            self.client.create_batch()
        });

        tracing::trace!(
            "Queued '{}' at #{} on {}",
            command,
            enqueued.position,
            partition
        );

        if enqueued.arm {
            let scheduler = self.clone();
            self.runtime.spawn(async move {
                scheduler.flush(partition).await;
            });
        }
    }

    /// Executes the partition's collecting batch, then keeps draining while backlog remains.
    pub async fn flush(self: Arc<Self>, partition: PartitionId) {
        while let Some(batch) = self.table.try_begin(&partition) {
            let (mut executing, round_trip) = batch.execute();
            let count = executing.len();

            tracing::debug!(
                "Flushing batch {} on {} with {} commands",
                executing.id,
                partition,
                count
            );

            // Client code only runs inside this task, so `finish` below is always reached.
            let outcome = match self.runtime.spawn(round_trip).await {
                Ok(outcome) => outcome,
                Err(e) => Err(anyhow::anyhow!("native batch execution aborted: {}", e)),
            };

            self.table.finish(&partition, count);
            self.queued.fetch_sub(count, Ordering::SeqCst);
            self.flushed_batches.fetch_add(1, Ordering::Relaxed);

            let report = self.dispatcher.dispatch(&mut executing, outcome);
            tracing::debug!(
                "Batch {} on {} {:?}: {} resolved, {} failed, {} handler panics",
                executing.id,
                partition,
                executing.state,
                report.resolved,
                report.failed,
                report.panicked
            );
        }
    }

    pub fn client(&self) -> &Arc<C> {
        &self.client
    }

    pub fn table(&self) -> &PartitionTable<C::Batch> {
        &self.table
    }

    pub fn queued(&self) -> usize {
        self.queued.load(Ordering::SeqCst)
    }

    pub fn queued_for(&self, partition: &PartitionId) -> usize {
        self.table.queued(partition)
    }

    /// Number of round trips completed since construction.
    pub fn flushed_batches(&self) -> u64 {
        self.flushed_batches.load(Ordering::Relaxed)
    }
}
