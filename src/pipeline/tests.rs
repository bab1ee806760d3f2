//! Pipeline Module Tests
//!
//! Exercises the coalescing layer against the in-memory store.
//!
//! ## Test Scopes
//! - **Building blocks**: command surface, options, partition table, dispatcher, resolvers.
//! - **Coalescing**: one round trip per turn, back-to-back flushing, the in-flight guard.
//! - **Results & errors**: ordering, batch-level vs command-level failures, handler panics.
//! - **Cluster routing**: per-node batches flushing in parallel, live topology changes.

#[cfg(test)]
mod tests {
    use crate::client::{BatchFuture, NativeBatch, ReplyError, StoreClient};
    use crate::cluster::slot::key_slot;
    use crate::cluster::topology::ClusterTopology;
    use crate::cluster::types::{NodeId, Topology};
    use crate::pipeline::batch::{Batch, Resolver};
    use crate::pipeline::commands::CommandSet;
    use crate::pipeline::dispatcher::Dispatcher;
    use crate::pipeline::router::Router;
    use crate::pipeline::table::PartitionTable;
    use crate::pipeline::types::{BatchState, CommandError, PartitionId, PipelineAlert, Value};
    use crate::pipeline::{AutoPipeline, PipelineOptions};
    use crate::storage::memory::{MemoryBatch, MemoryStore, MemoryStoreConfig};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tokio::sync::{broadcast, oneshot};

    fn s(value: &str) -> Value {
        Value::from(value)
    }

    fn slow_store(latency_ms: u64) -> Arc<MemoryStore> {
        MemoryStore::with_config(MemoryStoreConfig {
            latency: Duration::from_millis(latency_ms),
            topology: None,
        })
    }

    async fn wait_in_flight(pipeline: &AutoPipeline<MemoryStore>, partition: &PartitionId) {
        for _ in 0..100 {
            if pipeline.is_in_flight(partition) {
                return;
            }
            tokio::task::yield_now().await;
        }
        panic!("partition {} never went in flight", partition);
    }

    // ============================================================
    // TEST 1: Command surface & options
    // ============================================================

    #[test]
    fn test_command_set_hides_disallowed_commands() {
        let enumerated = ["get", "subscribe", "multi", "pipeline", "quit", "set"]
            .map(String::from)
            .to_vec();

        let commands = CommandSet::build(enumerated, &PipelineOptions::default());

        assert!(commands.contains("get"));
        assert!(commands.contains("getBuffer"));
        assert!(commands.contains("set"));
        assert!(!commands.contains("subscribe"));
        assert!(!commands.contains("subscribeBuffer"));
        assert!(!commands.contains("multi"));
        assert!(!commands.contains("quit"));
        assert_eq!(commands.len(), 4);
    }

    #[test]
    fn test_command_set_applies_allow_and_deny_lists() {
        let enumerated = vec!["get".to_string(), "hmget".to_string()];
        let options = PipelineOptions::default()
            .allow(["whatever", ""])
            .deny(["hmget", "getBuffer"]);

        let commands = CommandSet::build(enumerated, &options);

        assert!(commands.contains("whatever"));
        assert!(commands.contains("whateverBuffer"));
        assert!(!commands.contains("hmget"));
        assert!(!commands.contains("hmgetBuffer"));
        assert!(commands.contains("get"));
        assert!(!commands.contains("getBuffer"));
        assert!(!commands.contains(""));
    }

    #[test]
    fn test_options_from_json_accepts_aliases_and_ignores_unknown_keys() {
        let options = PipelineOptions::from_json(
            r#"{"whitelist": ["custom"], "blacklist": ["hmget"], "retries": 3}"#,
        )
        .unwrap();

        assert_eq!(options.allow_list, vec!["custom"]);
        assert_eq!(options.deny_list, vec!["hmget"]);
    }

    #[test]
    fn test_options_sanitized_drops_empty_names() {
        let options = PipelineOptions {
            allow_list: vec!["".to_string(), " eval ".to_string()],
            deny_list: vec!["  ".to_string()],
        };

        let clean = options.sanitized();

        assert_eq!(clean.allow_list, vec!["eval"]);
        assert!(clean.deny_list.is_empty());
    }

    #[tokio::test]
    async fn test_exposed_commands_are_sorted_with_buffer_variants() {
        let store = MemoryStore::new();
        let pipeline = AutoPipeline::new(store, PipelineOptions::default()).unwrap();

        let names: Vec<&str> = pipeline.exposed_commands().names().collect();

        assert!(names.windows(2).all(|pair| pair[0] < pair[1]));
        assert!(names.contains(&"hmget"));
        assert!(names.contains(&"hmgetBuffer"));
        assert_eq!(names.len() % 2, 0);
    }

    #[test]
    fn test_router_single_mode_uses_main_partition() {
        let router = Router::Single;

        assert!(!router.is_clustered());
        assert_eq!(router.route(&[s("foo")]), PartitionId::Main);
        assert_eq!(router.route(&[]), PartitionId::Main);
    }

    #[test]
    fn test_router_cluster_mode_hashes_first_argument() {
        let topology = ClusterTopology::with_nodes(&[NodeId::new("a"), NodeId::new("b")]);
        let router = Router::Cluster(topology);

        assert!(router.is_clustered());
        assert_eq!(
            router.route(&[s("foo"), s("ignored")]),
            PartitionId::Node(NodeId::new("b"))
        );
        assert_eq!(
            router.route(&[Value::Bytes(b"bar".to_vec())]),
            PartitionId::Node(NodeId::new("a"))
        );
        assert_eq!(format!("{:?}", router), "Router::Cluster(ready=true)");
    }

    // ============================================================
    // TEST 2: Partition table
    // ============================================================

    #[tokio::test]
    async fn test_table_arms_only_first_command_of_a_batch() {
        let store = MemoryStore::new();
        let table: PartitionTable<MemoryBatch> = PartitionTable::new();
        let main = PartitionId::Main;

        let first = table.enqueue(&main, "ping", vec![], Resolver::future().0, || {
            store.create_batch()
        });
        let second = table.enqueue(&main, "ping", vec![], Resolver::future().0, || {
            store.create_batch()
        });

        assert!(first.arm);
        assert!(!second.arm);
        assert_eq!(second.position, 1);
        assert_eq!(table.queued(&main), 2);
        assert_eq!(table.collecting_state(&main), Some(BatchState::Scheduled));
    }

    #[tokio::test]
    async fn test_table_in_flight_guard_and_fresh_batch() {
        let store = MemoryStore::new();
        let table: PartitionTable<MemoryBatch> = PartitionTable::new();
        let main = PartitionId::Main;
        table.enqueue(&main, "ping", vec![], Resolver::future().0, || store.create_batch());

        let batch = table.try_begin(&main).expect("collecting batch");
        assert_eq!(batch.len(), 1);
        assert!(table.is_in_flight(&main));
        assert!(table.try_begin(&main).is_none());

        // Commands arriving now build a new batch, which needs its own flush.
        let next = table.enqueue(&main, "ping", vec![], Resolver::future().0, || {
            store.create_batch()
        });
        assert!(next.arm);
        assert_eq!(table.collecting_len(&main), 1);
        assert!(table.try_begin(&main).is_none(), "still guarded by the in-flight batch");
        assert_eq!(table.queued(&main), 2);

        table.finish(&main, 1);
        assert!(!table.is_in_flight(&main));
        assert_eq!(table.queued(&main), 1);
        assert!(table.try_begin(&main).is_some());
    }

    #[tokio::test]
    async fn test_table_removes_idle_partitions() {
        let store = MemoryStore::new();
        let table: PartitionTable<MemoryBatch> = PartitionTable::new();
        let partition = PartitionId::Slot(7);
        table.enqueue(&partition, "ping", vec![], Resolver::future().0, || {
            store.create_batch()
        });

        let batch = table.try_begin(&partition).unwrap();
        table.finish(&partition, batch.len());

        assert!(table.is_empty());
        assert_eq!(table.queued(&partition), 0);
    }

    // ============================================================
    // TEST 3: Dispatcher & resolvers
    // ============================================================

    fn executing_batch(
        store: &MemoryStore,
        count: usize,
    ) -> (
        crate::pipeline::batch::ExecutingBatch,
        Vec<oneshot::Receiver<crate::pipeline::types::CommandResult>>,
    ) {
        let mut batch = Batch::new(PartitionId::Main, store.create_batch());
        let mut receivers = Vec::new();
        for _ in 0..count {
            let (resolver, rx) = Resolver::future();
            batch.push("ping", vec![], resolver);
            receivers.push(rx);
        }
        let (executing, _round_trip) = batch.execute();
        (executing, receivers)
    }

    #[tokio::test]
    async fn test_dispatch_batch_failure_shares_one_error() {
        let store = MemoryStore::new();
        let (alerts, _) = broadcast::channel(4);
        let dispatcher = Dispatcher::new(alerts);
        let (mut batch, receivers) = executing_batch(&store, 3);

        let report = dispatcher.dispatch(&mut batch, Err(anyhow::anyhow!("connection lost")));

        assert_eq!(report.resolved, 3);
        assert_eq!(report.failed, 3);
        assert_eq!(batch.state, BatchState::Done);

        let mut errors = Vec::new();
        for rx in receivers {
            match rx.await.unwrap() {
                Err(CommandError::Batch(error)) => errors.push(error),
                other => panic!("expected batch failure, got {:?}", other),
            }
        }
        assert!(errors.iter().all(|e| Arc::ptr_eq(e, &errors[0])));
        assert_eq!(errors[0].to_string(), "connection lost");
    }

    #[tokio::test]
    async fn test_dispatch_short_result_list_resolves_every_request() {
        let store = MemoryStore::new();
        let (alerts, _) = broadcast::channel(4);
        let dispatcher = Dispatcher::new(alerts);
        let (mut batch, mut receivers) = executing_batch(&store, 3);

        let report = dispatcher.dispatch(
            &mut batch,
            Ok(vec![Ok(s("PONG")), Err(ReplyError::new("ERR nope"))]),
        );

        assert_eq!(report.resolved, 3);
        assert_eq!(report.failed, 2);

        let third = receivers.pop().unwrap().await.unwrap();
        let second = receivers.pop().unwrap().await.unwrap();
        let first = receivers.pop().unwrap().await.unwrap();
        assert_eq!(first.unwrap(), s("PONG"));
        assert!(matches!(second, Err(CommandError::Reply(msg)) if msg == "ERR nope"));
        assert!(matches!(
            third,
            Err(CommandError::MissingResult {
                index: 2,
                returned: 2
            })
        ));
    }

    #[test]
    fn test_dropped_callback_resolver_reports_abandoned() {
        let seen = Arc::new(Mutex::new(None));
        let sink = seen.clone();

        let resolver = Resolver::callback(move |result| {
            *sink.lock().unwrap() = Some(result);
        });
        drop(resolver);

        let result = seen.lock().unwrap().take().expect("handler should run");
        assert!(matches!(result, Err(CommandError::Abandoned)));
    }

    // ============================================================
    // TEST 4: Façade basics
    // ============================================================

    #[tokio::test]
    async fn test_automatic_pipeline_round_trip() {
        let store = MemoryStore::new();
        let pipeline = AutoPipeline::new(store.clone(), PipelineOptions::default()).unwrap();
        assert!(Arc::ptr_eq(pipeline.wrapped(), &store));

        pipeline.set("foo", "bar").await.unwrap();
        assert_eq!(pipeline.queued(), 0);

        let pending = pipeline.get("foo");
        assert_eq!(pipeline.queued(), 1);

        assert_eq!(pending.await.unwrap(), s("bar"));
        assert_eq!(pipeline.queued(), 0);
    }

    #[tokio::test]
    async fn test_set_then_five_gets_coalesce_into_one_batch() {
        let store = MemoryStore::new();
        let pipeline = AutoPipeline::new(store.clone(), PipelineOptions::default()).unwrap();
        pipeline.set("foo", "bar").await.unwrap();

        let gets: Vec<_> = (0..5).map(|_| pipeline.get("foo")).collect();
        assert_eq!(pipeline.queued(), 5);

        let mut values = Vec::new();
        for get in gets {
            values.push(get.await.unwrap());
        }

        assert_eq!(values, vec![s("bar"); 5]);
        assert_eq!(pipeline.queued(), 0);
        let batches = store.batches();
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[1].commands, vec!["get"; 5]);
    }

    #[tokio::test]
    async fn test_synchronous_commands_keep_issue_order() {
        let store = MemoryStore::new();
        let pipeline = AutoPipeline::new(store.clone(), PipelineOptions::default()).unwrap();

        let futures: Vec<_> = (0..20)
            .map(|i| pipeline.call("echo", vec![Value::Int(i)]))
            .collect();

        for (i, future) in futures.into_iter().enumerate() {
            assert_eq!(future.await.unwrap(), s(&i.to_string()));
        }
        assert_eq!(store.batch_count(), 1);
        assert_eq!(pipeline.flushed_batches(), 1);
        let keys = &store.batches()[0].keys;
        assert_eq!(keys, &(0..20).map(Value::Int).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_not_exposed_commands_are_never_queued() {
        let store = MemoryStore::new();
        let pipeline = AutoPipeline::new(store.clone(), PipelineOptions::default()).unwrap();

        assert!(pipeline.command("subscribe").is_none());
        let rejected = pipeline.call("subscribe", vec![s("channel")]);
        assert_eq!(pipeline.queued(), 0);
        assert!(matches!(rejected.await, Err(CommandError::NotExposed(name)) if name == "subscribe"));

        let refused = pipeline.call_with("unsubscribe", vec![], |_| panic!("must not run"));
        assert!(matches!(refused, Err(CommandError::NotExposed(_))));
        assert_eq!(pipeline.queued(), 0);
        assert_eq!(store.batch_count(), 0);
    }

    #[tokio::test]
    async fn test_deny_list_hides_commands() {
        let store = MemoryStore::new();
        let options = PipelineOptions::default().deny(["hmget"]);
        let pipeline = AutoPipeline::new(store, options).unwrap();

        let rejected = pipeline.hmget("foo", ["a"]);

        assert_eq!(pipeline.queued(), 0);
        assert!(!pipeline.is_exposed("hmget"));
        assert!(matches!(rejected.await, Err(CommandError::NotExposed(_))));
    }

    #[tokio::test]
    async fn test_allow_list_exposes_extra_commands() {
        let store = MemoryStore::new();
        let options = PipelineOptions::default().allow(["whatever"]);
        let pipeline = AutoPipeline::new(store, options).unwrap();

        let command = pipeline.command("whatever").expect("allow-listed command");
        assert_eq!(command.name(), "whatever");

        // The store itself does not know the command, so it comes back as a reply error.
        let result = command.call(vec![s("key")]).await;
        assert!(matches!(result, Err(CommandError::Reply(msg)) if msg.contains("unknown command")));
    }

    #[tokio::test]
    async fn test_command_level_error_does_not_affect_siblings() {
        let store = MemoryStore::new();
        let pipeline = AutoPipeline::new(store.clone(), PipelineOptions::default()).unwrap();

        let ok = pipeline.set("foo", "bar");
        let bad = pipeline.call("set", vec![s("foo")]);
        let after = pipeline.get("foo");

        assert_eq!(ok.await.unwrap(), s("OK"));
        let err = bad.await.unwrap_err();
        assert!(!err.is_batch_failure());
        assert!(err.to_string().contains("wrong number of arguments"));
        assert_eq!(after.await.unwrap(), s("bar"));
        assert_eq!(store.batch_count(), 1);
    }

    #[tokio::test]
    async fn test_rejected_expire_does_not_fail_sibling_commands() {
        let store = MemoryStore::new();
        let pipeline = AutoPipeline::new(store.clone(), PipelineOptions::default()).unwrap();
        pipeline.set("foo", "bar").await.unwrap();

        let get = pipeline.get("foo");
        let expire = pipeline.expire("foo", i64::MAX);

        assert_eq!(get.await.unwrap(), s("bar"));
        let err = expire.await.unwrap_err();
        assert!(!err.is_batch_failure());
        assert!(err.to_string().contains("invalid expire time"));
    }

    #[tokio::test]
    async fn test_buffer_variant_through_pipeline() {
        let store = MemoryStore::new();
        let pipeline = AutoPipeline::new(store, PipelineOptions::default()).unwrap();
        pipeline.set("foo", "bar").await.unwrap();

        let raw = pipeline.call("getBuffer", vec![s("foo")]).await.unwrap();

        assert_eq!(raw, Value::Bytes(b"bar".to_vec()));
    }

    #[tokio::test]
    async fn test_dropped_future_is_still_executed() {
        let store = MemoryStore::new();
        let pipeline = AutoPipeline::new(store, PipelineOptions::default()).unwrap();

        drop(pipeline.set("fire", "forget"));
        assert_eq!(pipeline.queued(), 1);

        let value = pipeline.get("fire").await.unwrap();
        assert_eq!(value, s("forget"));
        assert_eq!(pipeline.queued(), 0);
    }

    #[tokio::test]
    async fn test_separate_pipelines_do_not_share_state() {
        let store = MemoryStore::new();
        let a = AutoPipeline::new(store.clone(), PipelineOptions::default()).unwrap();
        let b = AutoPipeline::new(store.clone(), PipelineOptions::default()).unwrap();

        let pending = a.ping();

        assert_eq!(a.queued(), 1);
        assert_eq!(b.queued(), 0);
        pending.await.unwrap();
    }

    #[test]
    fn test_construction_requires_a_runtime() {
        let store = MemoryStore::new();

        let result = AutoPipeline::new(store, PipelineOptions::default());

        assert!(result.is_err());
    }

    // ============================================================
    // TEST 5: Callbacks
    // ============================================================

    #[tokio::test]
    async fn test_callbacks_in_the_happy_case() {
        let store = MemoryStore::new();
        let pipeline = AutoPipeline::new(store.clone(), PipelineOptions::default()).unwrap();
        let order = Arc::new(Mutex::new(Vec::new()));

        for (key, value) in [("foo1", "bar1"), ("foo2", "bar2")] {
            let order = order.clone();
            pipeline
                .call_with("set", vec![s(key), s(value)], move |result| {
                    order.lock().unwrap().push(result.unwrap());
                })
                .unwrap();
        }
        let (tx, rx) = oneshot::channel();
        {
            let order = order.clone();
            pipeline
                .call_with("get", vec![s("foo1")], move |result| {
                    order.lock().unwrap().push(result.unwrap());
                    let _ = tx.send(());
                })
                .unwrap();
        }
        assert_eq!(pipeline.queued(), 3);

        rx.await.unwrap();

        assert_eq!(
            *order.lock().unwrap(),
            vec![s("OK"), s("OK"), s("bar1")]
        );
        assert_eq!(pipeline.queued(), 0);
        assert_eq!(store.batch_count(), 1);
    }

    #[tokio::test]
    async fn test_panicking_handler_does_not_block_siblings() {
        let store = MemoryStore::new();
        let pipeline = AutoPipeline::new(store, PipelineOptions::default()).unwrap();
        let mut alerts = pipeline.subscribe_alerts();
        pipeline.set("foo", "bar").await.unwrap();

        pipeline
            .call_with("get", vec![s("foo")], |_| panic!("handler exploded"))
            .unwrap();
        let (tx, rx) = oneshot::channel();
        pipeline
            .call_with("get", vec![s("foo")], move |result| {
                let _ = tx.send(result);
            })
            .unwrap();

        assert_eq!(rx.await.unwrap().unwrap(), s("bar"));

        match alerts.recv().await.unwrap() {
            PipelineAlert::HandlerPanicked {
                partition,
                command,
                message,
            } => {
                assert_eq!(partition, PartitionId::Main);
                assert_eq!(command, "get");
                assert_eq!(message, "handler exploded");
            }
        }

        // The flush loop survives and keeps serving the partition.
        assert_eq!(pipeline.get("foo").await.unwrap(), s("bar"));
    }

    // ============================================================
    // TEST 6: Scheduling under load
    // ============================================================

    #[tokio::test]
    async fn test_commands_queued_while_in_flight_are_not_lost() {
        let store = slow_store(20);
        let pipeline = AutoPipeline::new(store.clone(), PipelineOptions::default()).unwrap();

        let first: Vec<_> = (0..3).map(|i| pipeline.set(format!("k{}", i), "v")).collect();
        wait_in_flight(&pipeline, &PartitionId::Main).await;

        let late = pipeline.get("k1");
        let late_too = pipeline.get("k2");
        assert_eq!(pipeline.queued(), 5);
        assert_eq!(pipeline.queued_for(&PartitionId::Main), 5);

        for future in first {
            future.await.unwrap();
        }
        assert_eq!(late.await.unwrap(), s("v"));
        assert_eq!(late_too.await.unwrap(), s("v"));

        let batches = store.batches();
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].commands.len(), 3);
        assert_eq!(batches[1].commands, vec!["get", "get"]);
        assert_eq!(pipeline.queued(), 0);
    }

    #[tokio::test]
    async fn test_one_batch_in_flight_per_partition() {
        let store = slow_store(5);
        let pipeline = AutoPipeline::new(store.clone(), PipelineOptions::default()).unwrap();

        let mut workers = Vec::new();
        for worker in 0..8 {
            let pipeline = pipeline.clone();
            workers.push(tokio::spawn(async move {
                for i in 0..10 {
                    let key = format!("w{}-{}", worker, i);
                    pipeline.set(key.clone(), "x").await.unwrap();
                    assert_eq!(pipeline.get(key).await.unwrap(), s("x"));
                }
            }));
        }
        for worker in workers {
            worker.await.unwrap();
        }

        assert_eq!(store.max_in_flight("main"), 1);
        assert!(store.batch_count() < 160, "commands should have coalesced");
        assert_eq!(pipeline.queued(), 0);
    }

    #[tokio::test]
    async fn test_batch_failure_rejects_every_pending_command() {
        let store = MemoryStore::new();
        let pipeline = AutoPipeline::new(store.clone(), PipelineOptions::default()).unwrap();
        store.fail_next_batch("connection reset by peer");

        let pending: Vec<_> = (0..4).map(|_| pipeline.ping()).collect();
        let mut errors = Vec::new();
        for future in pending {
            match future.await {
                Err(CommandError::Batch(error)) => errors.push(error),
                other => panic!("expected batch failure, got {:?}", other),
            }
        }

        assert!(errors.iter().all(|e| Arc::ptr_eq(e, &errors[0])));
        assert_eq!(errors[0].to_string(), "connection reset by peer");
        assert_eq!(pipeline.queued(), 0);

        // No retries, and the next batch is unaffected.
        assert_eq!(pipeline.ping().await.unwrap(), s("PONG"));
        assert_eq!(store.batch_count(), 1);
    }

    #[tokio::test]
    async fn test_panicking_store_becomes_batch_failure() {
        let store = MemoryStore::new();
        let pipeline = AutoPipeline::new(store.clone(), PipelineOptions::default()).unwrap();
        store.panic_next_batch();

        let a = pipeline.ping();
        let b = pipeline.ping();

        assert!(a.await.unwrap_err().is_batch_failure());
        assert!(b.await.unwrap_err().is_batch_failure());
        assert!(!pipeline.is_in_flight(&PartitionId::Main));
        assert_eq!(pipeline.ping().await.unwrap(), s("PONG"));
    }

    /// Client whose batches panic on the `execute` call itself, before any future exists.
    struct FragileClient {
        store: Arc<MemoryStore>,
        refuse_next: Arc<AtomicBool>,
    }

    struct FragileBatch {
        inner: MemoryBatch,
        refuse: Arc<AtomicBool>,
    }

    impl StoreClient for FragileClient {
        type Batch = FragileBatch;

        fn create_batch(&self) -> FragileBatch {
            FragileBatch {
                inner: self.store.create_batch(),
                refuse: self.refuse_next.clone(),
            }
        }

        fn enumerate_commands(&self) -> Vec<String> {
            self.store.enumerate_commands()
        }
    }

    impl NativeBatch for FragileBatch {
        fn append(&mut self, command: &str, args: Vec<Value>) {
            self.inner.append(command, args);
        }

        fn len(&self) -> usize {
            self.inner.len()
        }

        fn execute(self) -> BatchFuture {
            if self.refuse.swap(false, Ordering::SeqCst) {
                panic!("batch refused to start");
            }
            self.inner.execute()
        }
    }

    #[tokio::test]
    async fn test_client_panicking_on_execute_call_releases_partition() {
        let client = Arc::new(FragileClient {
            store: MemoryStore::new(),
            refuse_next: Arc::new(AtomicBool::new(true)),
        });
        let pipeline = AutoPipeline::new(client, PipelineOptions::default()).unwrap();

        let first = pipeline.ping();
        let (tx, rx) = oneshot::channel();
        pipeline
            .call_with("ping", vec![], move |result| {
                let _ = tx.send(result);
            })
            .unwrap();

        let first = tokio::time::timeout(Duration::from_secs(1), first)
            .await
            .expect("first command should resolve");
        assert!(first.unwrap_err().is_batch_failure());
        let second = tokio::time::timeout(Duration::from_secs(1), rx)
            .await
            .expect("callback should be invoked")
            .unwrap();
        assert!(second.unwrap_err().is_batch_failure());

        assert!(!pipeline.is_in_flight(&PartitionId::Main));
        assert_eq!(pipeline.queued(), 0);

        let next = tokio::time::timeout(Duration::from_secs(1), pipeline.ping())
            .await
            .expect("partition should not stay wedged");
        assert_eq!(next.unwrap(), s("PONG"));
        assert_eq!(pipeline.queued(), 0);
    }

    // ============================================================
    // TEST 7: Cluster routing
    // ============================================================

    fn cluster(latency_ms: u64) -> (Arc<ClusterTopology>, Arc<MemoryStore>) {
        let topology = ClusterTopology::with_nodes(&[NodeId::new("a"), NodeId::new("b")]);
        let store = MemoryStore::with_config(MemoryStoreConfig {
            latency: Duration::from_millis(latency_ms),
            topology: Some(topology.clone()),
        });
        (topology, store)
    }

    #[tokio::test]
    async fn test_cluster_partitions_flush_independently_and_in_parallel() {
        let (topology, store) = cluster(20);
        let pipeline =
            AutoPipeline::clustered(store.clone(), topology.clone(), PipelineOptions::default())
                .unwrap();

        let foo = pipeline.route(&[s("foo")]);
        let bar = pipeline.route(&[s("bar")]);
        assert_eq!(foo, PartitionId::Node(NodeId::new("b")));
        assert_eq!(bar, PartitionId::Node(NodeId::new("a")));

        let set_foo = pipeline.set("foo", "1");
        let set_bar = pipeline.set("bar", "2");
        let get_foo = pipeline.get("foo");
        let get_bar = pipeline.get("bar");
        assert_eq!(pipeline.queued_for(&foo), 2);
        assert_eq!(pipeline.queued_for(&bar), 2);

        set_foo.await.unwrap();
        set_bar.await.unwrap();
        assert_eq!(get_foo.await.unwrap(), s("1"));
        assert_eq!(get_bar.await.unwrap(), s("2"));

        let batches = store.batches();
        assert_eq!(batches.len(), 2);
        for batch in &batches {
            assert_eq!(batch.commands, vec!["set", "get"]);
            let owner = batch.owner.clone().unwrap();
            for key in &batch.keys {
                let slot = key_slot(&key.key_bytes());
                assert_eq!(topology.resolve_owner(slot), Some(owner.clone()));
            }
        }
        assert_eq!(store.max_concurrent(), 2);
    }

    #[tokio::test]
    async fn test_cluster_hash_tags_share_a_batch() {
        let (topology, store) = cluster(0);
        let pipeline =
            AutoPipeline::clustered(store.clone(), topology, PipelineOptions::default()).unwrap();

        let a = pipeline.set("{user42}.name", "ada");
        let b = pipeline.set("{user42}.mail", "ada@example.com");

        a.await.unwrap();
        b.await.unwrap();
        assert_eq!(store.batch_count(), 1);
    }

    #[tokio::test]
    async fn test_router_follows_topology_changes() {
        let (topology, store) = cluster(0);
        let pipeline =
            AutoPipeline::clustered(store, topology.clone(), PipelineOptions::default()).unwrap();
        let slot = key_slot(b"foo");

        assert_eq!(
            pipeline.route(&[s("foo")]),
            PartitionId::Node(NodeId::new("b"))
        );

        topology.assign(slot..=slot, NodeId::new("c"));
        assert_eq!(
            pipeline.route(&[s("foo")]),
            PartitionId::Node(NodeId::new("c"))
        );

        topology.unassign(slot..=slot);
        assert_eq!(pipeline.route(&[s("foo")]), PartitionId::Slot(slot));
    }

    #[tokio::test]
    async fn test_unready_topology_groups_by_slot() {
        let topology = ClusterTopology::new();
        let store = MemoryStore::new();
        let pipeline =
            AutoPipeline::clustered(store.clone(), topology, PipelineOptions::default()).unwrap();

        let foo = pipeline.set("foo", "1");
        let bar = pipeline.set("bar", "2");
        let foo_again = pipeline.get("foo");

        assert_eq!(
            pipeline.queued_for(&PartitionId::Slot(key_slot(b"foo"))),
            2
        );
        foo.await.unwrap();
        bar.await.unwrap();
        assert_eq!(foo_again.await.unwrap(), s("1"));
        assert_eq!(store.batch_count(), 2);
    }

    #[tokio::test]
    async fn test_keyless_commands_route_to_slot_zero_owner() {
        let (topology, store) = cluster(0);
        let pipeline =
            AutoPipeline::clustered(store, topology, PipelineOptions::default()).unwrap();

        assert_eq!(pipeline.route(&[]), PartitionId::Node(NodeId::new("a")));
        assert_eq!(pipeline.ping().await.unwrap(), s("PONG"));
    }
}
