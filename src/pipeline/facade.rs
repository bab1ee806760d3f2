//! Command Façade
//!
//! `AutoPipeline` is what callers hold instead of the raw client. Every call registers the
//! command synchronously (routing, batch append, queued counters) before returning, and
//! the caller then either awaits the returned `CommandFuture` or is called back.
//!
//! Registration never awaits: `call` is a plain function, so a command is queued even if
//! its future is never polled.

use super::batch::Resolver;
use super::commands::CommandSet;
use super::dispatcher::Dispatcher;
use super::options::PipelineOptions;
use super::router::Router;
use super::scheduler::Scheduler;
use super::types::{CommandError, CommandResult, PartitionId, PipelineAlert, Value};
use crate::client::StoreClient;
use crate::cluster::types::Topology;

use anyhow::Result;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::{broadcast, oneshot};

const ALERT_CAPACITY: usize = 64;

/// Awaitable result of a single command.
pub struct CommandFuture {
    state: FutureState,
}

enum FutureState {
    Pending(oneshot::Receiver<CommandResult>),
    Ready(Option<CommandResult>),
}

impl CommandFuture {
    fn pending(rx: oneshot::Receiver<CommandResult>) -> Self {
        Self {
            state: FutureState::Pending(rx),
        }
    }

    fn ready(result: CommandResult) -> Self {
        Self {
            state: FutureState::Ready(Some(result)),
        }
    }
}

impl Future for CommandFuture {
    type Output = CommandResult;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match &mut self.state {
            FutureState::Pending(rx) => Pin::new(rx)
                .poll(cx)
                .map(|received| received.unwrap_or(Err(CommandError::Dropped))),
            FutureState::Ready(result) => {
                Poll::Ready(result.take().unwrap_or(Err(CommandError::Dropped)))
            }
        }
    }
}

struct Shared<C: StoreClient> {
    router: Router,
    commands: CommandSet,
    scheduler: Arc<Scheduler<C>>,
    alerts: broadcast::Sender<PipelineAlert>,
}

/// Transparent batching wrapper around a store client.
pub struct AutoPipeline<C: StoreClient> {
    shared: Arc<Shared<C>>,
}

impl<C: StoreClient> Clone for AutoPipeline<C> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<C: StoreClient> AutoPipeline<C> {
    /// Wraps a non-clustered client: every command shares one partition.
    ///
    /// Must be called from within a tokio runtime; flushes are spawned onto it.
    pub fn new(client: Arc<C>, options: PipelineOptions) -> Result<Self> {
        Self::with_router(client, Router::Single, options)
    }

    /// Wraps a clustered client: commands are grouped per owning node.
    pub fn clustered(
        client: Arc<C>,
        topology: Arc<dyn Topology>,
        options: PipelineOptions,
    ) -> Result<Self> {
        Self::with_router(client, Router::Cluster(topology), options)
    }

    pub fn with_router(client: Arc<C>, router: Router, options: PipelineOptions) -> Result<Self> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| anyhow::anyhow!("AutoPipeline requires a tokio runtime: {}", e))?;

        let commands = CommandSet::build(client.enumerate_commands(), &options);
        let (alerts, _) = broadcast::channel(ALERT_CAPACITY);
        let dispatcher = Dispatcher::new(alerts.clone());
        let scheduler = Scheduler::new(client, dispatcher, runtime);

        tracing::info!(
            "Auto pipeline ready ({:?}, {} commands exposed)",
            router,
            commands.len()
        );

        Ok(Self {
            shared: Arc::new(Shared {
                router,
                commands,
                scheduler,
                alerts,
            }),
        })
    }

    /// Handle for an exposed command, `None` if the command is not exposed.
    pub fn command<'a>(&'a self, name: &'a str) -> Option<Command<'a, C>> {
        self.is_exposed(name).then_some(Command {
            pipeline: self,
            name,
        })
    }

    /// Queues a command and returns its awaitable result.
    ///
    /// A command that is not exposed is not queued; its future resolves to `NotExposed`.
    pub fn call(&self, command: &str, args: Vec<Value>) -> CommandFuture {
        if !self.is_exposed(command) {
            return CommandFuture::ready(Err(CommandError::NotExposed(command.to_string())));
        }
        let (resolver, rx) = Resolver::future();
        self.submit(command, args, resolver);
        CommandFuture::pending(rx)
    }

    /// Queues a command whose result is handed to `handler`.
    ///
    /// A command that is not exposed is rejected before anything is queued, and `handler`
    /// is not invoked.
    pub fn call_with<F>(&self, command: &str, args: Vec<Value>, handler: F) -> Result<(), CommandError>
    where
        F: FnOnce(CommandResult) + Send + 'static,
    {
        if !self.is_exposed(command) {
            return Err(CommandError::NotExposed(command.to_string()));
        }
        self.submit(command, args, Resolver::callback(handler));
        Ok(())
    }

    fn submit(&self, command: &str, args: Vec<Value>, resolver: Resolver) {
        let partition = self.shared.router.route(&args);
        self.shared
            .scheduler
            .enqueue(partition, command, args, resolver);
    }

    pub fn get(&self, key: impl Into<Value>) -> CommandFuture {
        self.call("get", vec![key.into()])
    }

    pub fn set(&self, key: impl Into<Value>, value: impl Into<Value>) -> CommandFuture {
        self.call("set", vec![key.into(), value.into()])
    }

    pub fn del(&self, key: impl Into<Value>) -> CommandFuture {
        self.call("del", vec![key.into()])
    }

    pub fn exists(&self, key: impl Into<Value>) -> CommandFuture {
        self.call("exists", vec![key.into()])
    }

    pub fn incr(&self, key: impl Into<Value>) -> CommandFuture {
        self.call("incr", vec![key.into()])
    }

    pub fn expire(&self, key: impl Into<Value>, seconds: i64) -> CommandFuture {
        self.call("expire", vec![key.into(), Value::Int(seconds)])
    }

    pub fn mget<I, K>(&self, keys: I) -> CommandFuture
    where
        I: IntoIterator<Item = K>,
        K: Into<Value>,
    {
        self.call("mget", keys.into_iter().map(Into::into).collect())
    }

    pub fn hget(&self, key: impl Into<Value>, field: impl Into<Value>) -> CommandFuture {
        self.call("hget", vec![key.into(), field.into()])
    }

    pub fn hset(
        &self,
        key: impl Into<Value>,
        field: impl Into<Value>,
        value: impl Into<Value>,
    ) -> CommandFuture {
        self.call("hset", vec![key.into(), field.into(), value.into()])
    }

    pub fn hmget<I, F>(&self, key: impl Into<Value>, fields: I) -> CommandFuture
    where
        I: IntoIterator<Item = F>,
        F: Into<Value>,
    {
        let mut args = vec![key.into()];
        args.extend(fields.into_iter().map(Into::into));
        self.call("hmget", args)
    }

    pub fn ping(&self) -> CommandFuture {
        self.call("ping", Vec::new())
    }

    /// Commands registered but not yet resolved, across all partitions.
    pub fn queued(&self) -> usize {
        self.shared.scheduler.queued()
    }

    pub fn queued_for(&self, partition: &PartitionId) -> usize {
        self.shared.scheduler.queued_for(partition)
    }

    /// Whether a batch for `partition` is currently executing.
    pub fn is_in_flight(&self, partition: &PartitionId) -> bool {
        self.shared.scheduler.table().is_in_flight(partition)
    }

    /// Partition a command with these arguments would currently be routed to.
    pub fn route(&self, args: &[Value]) -> PartitionId {
        self.shared.router.route(args)
    }

    /// The wrapped client, for operations that bypass batching.
    pub fn wrapped(&self) -> &Arc<C> {
        self.shared.scheduler.client()
    }

    pub fn is_exposed(&self, command: &str) -> bool {
        self.shared.commands.contains(command)
    }

    pub fn exposed_commands(&self) -> &CommandSet {
        &self.shared.commands
    }

    /// Receives reports that could not be delivered to a caller, such as handler panics.
    pub fn subscribe_alerts(&self) -> broadcast::Receiver<PipelineAlert> {
        self.shared.alerts.subscribe()
    }

    /// Round trips completed so far.
    pub fn flushed_batches(&self) -> u64 {
        self.shared.scheduler.flushed_batches()
    }
}

/// An exposed command, ready to be invoked.
pub struct Command<'a, C: StoreClient> {
    pipeline: &'a AutoPipeline<C>,
    name: &'a str,
}

impl<C: StoreClient> Command<'_, C> {
    pub fn name(&self) -> &str {
        self.name
    }

    pub fn call(&self, args: Vec<Value>) -> CommandFuture {
        let (resolver, rx) = Resolver::future();
        self.pipeline.submit(self.name, args, resolver);
        CommandFuture::pending(rx)
    }

    pub fn call_with<F>(&self, args: Vec<Value>, handler: F)
    where
        F: FnOnce(CommandResult) + Send + 'static,
    {
        self.pipeline
            .submit(self.name, args, Resolver::callback(handler));
    }
}
