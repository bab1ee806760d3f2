use autopipeline::cluster::topology::ClusterTopology;
use autopipeline::cluster::types::NodeId;
use autopipeline::storage::memory::{MemoryStore, MemoryStoreConfig};
use autopipeline::{AutoPipeline, PartitionId, PipelineOptions, Value};
use rand::Rng;
use std::time::{Duration, Instant};

struct BenchConfig {
    requests: usize,
    latency: Duration,
    nodes: usize,
    keys: usize,
    options: PipelineOptions,
}

impl Default for BenchConfig {
    fn default() -> Self {
        Self {
            requests: 1000,
            latency: Duration::from_millis(1),
            nodes: 0,
            keys: 100,
            options: PipelineOptions::default(),
        }
    }
}

fn parse_args(args: &[String]) -> anyhow::Result<BenchConfig> {
    let mut config = BenchConfig::default();

    let mut i = 1;
    while i < args.len() {
        let value = || {
            args.get(i + 1)
                .ok_or_else(|| anyhow::anyhow!("{} expects a value", args[i]))
        };
        match args[i].as_str() {
            "--requests" => {
                config.requests = value()?.parse()?;
                i += 2;
            }
            "--latency-ms" => {
                config.latency = Duration::from_millis(value()?.parse()?);
                i += 2;
            }
            "--nodes" => {
                config.nodes = value()?.parse()?;
                i += 2;
            }
            "--keys" => {
                config.keys = value()?.parse::<usize>()?.max(1);
                i += 2;
            }
            "--options" => {
                config.options = PipelineOptions::from_json(value()?)?;
                i += 2;
            }
            other => {
                tracing::warn!("Ignoring unknown argument {}", other);
                i += 1;
            }
        }
    }

    Ok(config)
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let args: Vec<String> = std::env::args().collect();
    if args.iter().any(|a| a == "--help" || a == "-h") {
        eprintln!(
            "Usage: {} [--requests <n>] [--latency-ms <ms>] [--nodes <n>] [--keys <n>] [--options <json>]",
            args[0]
        );
        eprintln!("Example: {} --requests 5000 --latency-ms 2 --nodes 3", args[0]);
        std::process::exit(1);
    }
    let config = parse_args(&args)?;

    // 1. Store (and cluster layout when asked for):
    let topology = (config.nodes > 0).then(|| {
        let nodes: Vec<NodeId> = (0..config.nodes)
            .map(|i| NodeId::new(format!("node-{}", i)))
            .collect();
        ClusterTopology::with_nodes(&nodes)
    });
    let store = MemoryStore::with_config(MemoryStoreConfig {
        latency: config.latency,
        topology: topology.clone(),
    });

    let pipeline = match &topology {
        Some(topology) => {
            AutoPipeline::clustered(store.clone(), topology.clone(), config.options.clone())?
        }
        None => AutoPipeline::new(store.clone(), config.options.clone())?,
    };

    tracing::info!(
        "Benchmark: {} requests over {} keys, {:?} per round trip, {}",
        config.requests,
        config.keys,
        config.latency,
        match config.nodes {
            0 => "single node".to_string(),
            n => format!("{} cluster nodes", n),
        }
    );

    // 2. Seed keys through the pipeline:
    let seeds: Vec<_> = (0..config.keys)
        .map(|i| pipeline.set(format!("key:{}", i), format!("value:{}", i)))
        .collect();
    for seed in seeds {
        seed.await?;
    }

    let keys: Vec<String> = {
        let mut rng = rand::thread_rng();
        (0..config.requests)
            .map(|_| format!("key:{}", rng.gen_range(0..config.keys)))
            .collect()
    };

    // 3. One round trip per command:
    let before = store.batch_count();
    let started = Instant::now();
    for key in &keys {
        store
            .execute_one("get", vec![Value::from(key.as_str())])
            .await?;
    }
    let direct = started.elapsed();
    tracing::info!(
        "Direct:    {} round trips in {:?}",
        store.batch_count() - before,
        direct
    );

    // 4. Same workload, issued concurrently through the pipeline:
    let before = store.batch_count();
    let started = Instant::now();
    let mut tasks = Vec::with_capacity(keys.len());
    for key in keys {
        let pipeline = pipeline.clone();
        tasks.push(tokio::spawn(async move { pipeline.get(key).await }));
    }
    let mut failures = 0usize;
    for task in tasks {
        if task.await?.is_err() {
            failures += 1;
        }
    }
    let pipelined = started.elapsed();
    let round_trips = store.batch_count() - before;

    tracing::info!(
        "Pipelined: {} round trips in {:?} ({} failed)",
        round_trips,
        pipelined,
        failures
    );
    if round_trips > 0 {
        tracing::info!(
            "Average batch size {:.1}, speedup x{:.1}",
            config.requests as f64 / round_trips as f64,
            direct.as_secs_f64() / pipelined.as_secs_f64().max(f64::EPSILON)
        );
    }

    match &topology {
        Some(topology) => {
            for range in topology.ranges() {
                let owner = PartitionId::Node(range.owner.clone());
                tracing::info!(
                    "  - {} slots {:?}: peak {} concurrent round trips",
                    owner,
                    range.slots,
                    store.max_in_flight(&range.owner.0)
                );
            }
        }
        None => tracing::info!(
            "  - main: peak {} concurrent round trips",
            store.max_in_flight("main")
        ),
    }
    tracing::info!(
        "Flushed {} batches, {} commands still queued",
        pipeline.flushed_batches(),
        pipeline.queued()
    );

    Ok(())
}
