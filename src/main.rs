//! RegionStore Workload Driver
//!
//! Runs a multi-threaded put/get/remove workload against one region and
//! reports what the storage core did with it.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        regionstore CLI                          │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  ┌──────────────┐    ┌──────────────┐    ┌──────────────┐       │
//! │  │   Workload   │───▶│    Region    │───▶│  Prometheus  │       │
//! │  │   threads    │    │              │    │   Registry   │       │
//! │  └──────────────┘    └──────────────┘    └──────┬───────┘       │
//! │                                                  ▼              │
//! │                                    /metrics   /healthz          │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context};
use bytes::Bytes;
use clap::Parser;
use prometheus::Registry;
use tracing::{error, info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use uuid::Uuid;

use regionstore::config::EvictionAction;
use regionstore::eviction::EvictionLimit;
use regionstore::stats::MultiStats;
use regionstore::{
    PrometheusStats, Region, RegionConfig, RegionContext, RegionKey, RegionStats, StatisticsSink,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// RegionStore - drive a workload against an entry-storage region
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Region config file (.json, .yaml or .yml)
    #[arg(long, env = "REGIONSTORE_CONFIG")]
    config: Option<PathBuf>,

    /// Enable off-heap storage with this many bytes
    #[arg(long, env = "OFF_HEAP_BYTES")]
    off_heap_bytes: Option<usize>,

    /// Overflow to disk once more than this many entries are resident
    #[arg(long, env = "MAX_RESIDENT_ENTRIES")]
    max_resident_entries: Option<u64>,

    /// Directory for the overflow file
    #[arg(long, env = "OVERFLOW_DIR")]
    overflow_dir: Option<PathBuf>,

    /// Worker threads
    #[arg(long, env = "THREADS", default_value = "4")]
    threads: usize,

    /// Operations per worker thread
    #[arg(long, env = "OPERATIONS", default_value = "100000")]
    operations: usize,

    /// Distinct keys touched by the workload
    #[arg(long, env = "KEY_SPACE", default_value = "10000")]
    key_space: usize,

    /// Bytes per value
    #[arg(long, env = "VALUE_SIZE", default_value = "256")]
    value_size: usize,

    /// Percentage of operations that are reads
    #[arg(long, env = "READ_PERCENT", default_value = "80")]
    read_percent: usize,

    /// Percentage of operations that remove their key
    #[arg(long, env = "REMOVE_PERCENT", default_value = "1")]
    remove_percent: usize,

    /// Metrics server bind address
    #[arg(long, env = "METRICS_ADDR")]
    metrics_addr: Option<String>,

    /// Health server bind address
    #[arg(long, env = "HEALTH_ADDR")]
    health_addr: Option<String>,

    /// Keep serving metrics after the workload until interrupted
    #[arg(long, env = "SERVE")]
    serve: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    init_logging(&args);

    let run_id = Uuid::new_v4();
    let config = load_config(&args)?;
    info!(%run_id, region = %config.name, "Starting regionstore workload");
    info!("  Threads: {}", args.threads);
    info!("  Operations per thread: {}", args.operations);
    info!("  Key space: {}", args.key_space);
    info!("  Value size: {} bytes", args.value_size);
    info!("  Off-heap: {}", config.off_heap.enabled);
    info!("  Eviction: {:?} at {:?}", config.eviction.action, config.eviction.limit);

    // Statistics: in-process counters plus Prometheus collectors
    let registry = Registry::new();
    let counters = Arc::new(RegionStats::new());
    let prometheus = PrometheusStats::register(&registry, &config.name)
        .context("registering region metrics")?;
    let sinks = vec![
        counters.clone() as Arc<dyn StatisticsSink>,
        Arc::new(prometheus) as Arc<dyn StatisticsSink>,
    ];

    let region = Arc::new(
        Region::with_stats(config, Arc::new(MultiStats::new(sinks)))
            .context("creating region")?,
    );

    if let Some(addr) = args.health_addr.clone() {
        tokio::spawn(async move {
            if let Err(e) = run_health_server(&addr).await {
                error!("Health server error: {:#}", e);
            }
        });
    }

    if let Some(addr) = args.metrics_addr.clone() {
        let registry = registry.clone();
        tokio::spawn(async move {
            if let Err(e) = run_metrics_server(&addr, registry).await {
                error!("Metrics server error: {:#}", e);
            }
        });
    }

    let workload = Workload::from_args(&args);
    let started = Instant::now();
    let tally = {
        let region = Arc::clone(&region);
        tokio::task::spawn_blocking(move || workload.run(&region))
            .await
            .context("workload task failed")??
    };
    let elapsed = started.elapsed();

    log_summary(&region, &counters, &tally, elapsed);

    if args.serve {
        info!("Workload complete, serving metrics until interrupted");
        tokio::signal::ctrl_c()
            .await
            .context("waiting for interrupt")?;
    }

    region.destroy().context("destroying region")?;
    info!(%run_id, "regionstore shutdown complete");
    Ok(())
}

fn load_config(args: &Args) -> anyhow::Result<RegionConfig> {
    let mut config = match &args.config {
        Some(path) => RegionConfig::from_path(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => RegionConfig::default(),
    };

    if let Some(bytes) = args.off_heap_bytes {
        config.off_heap.enabled = true;
        config.off_heap.capacity_bytes = bytes;
    }
    if let Some(max) = args.max_resident_entries {
        config.eviction.action = EvictionAction::OverflowToDisk;
        config.eviction.limit = EvictionLimit::EntryCount(max);
    }
    if let Some(dir) = &args.overflow_dir {
        config.overflow.directory = Some(dir.clone());
    }

    config.validate().context("invalid region config")?;
    Ok(config)
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let mut filter = EnvFilter::from_default_env().add_directive(level.into());
    if let Ok(directive) = "hyper=warn".parse() {
        filter = filter.add_directive(directive);
    }

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
}

// =============================================================================
// Workload
// =============================================================================

#[derive(Debug, Clone, Copy)]
struct Workload {
    threads: usize,
    operations: usize,
    key_space: usize,
    value_size: usize,
    read_percent: usize,
    remove_percent: usize,
}

/// Per-thread operation counts
#[derive(Debug, Default, Clone, Copy)]
struct Tally {
    puts: u64,
    gets: u64,
    hits: u64,
    misses: u64,
    removes: u64,
    errors: u64,
}

impl Tally {
    fn merge(mut self, other: Tally) -> Tally {
        self.puts += other.puts;
        self.gets += other.gets;
        self.hits += other.hits;
        self.misses += other.misses;
        self.removes += other.removes;
        self.errors += other.errors;
        self
    }

    fn operations(&self) -> u64 {
        self.puts + self.gets + self.removes
    }
}

impl Workload {
    fn from_args(args: &Args) -> Self {
        Self {
            threads: args.threads.max(1),
            operations: args.operations,
            key_space: args.key_space.max(1),
            value_size: args.value_size,
            read_percent: args.read_percent.min(100),
            remove_percent: args.remove_percent.min(100),
        }
    }

    fn run(self, region: &Region) -> anyhow::Result<Tally> {
        crossbeam::thread::scope(|s| {
            let handles: Vec<_> = (0..self.threads)
                .map(|thread| s.spawn(move |_| self.worker(region, thread)))
                .collect();

            handles
                .into_iter()
                .map(|h| h.join().map_err(|_| anyhow!("workload thread panicked")))
                .try_fold(Tally::default(), |acc, tally| -> anyhow::Result<Tally> {
                    Ok(acc.merge(tally?))
                })
        })
        .map_err(|_| anyhow!("workload scope panicked"))?
    }

    fn worker(&self, region: &Region, thread: usize) -> Tally {
        let mut tally = Tally::default();
        let value = Bytes::from(vec![thread as u8; self.value_size]);

        for op in 0..self.operations {
            // spread threads across the key space
            let slot = (op * 7919 + thread * 104_729) % self.key_space;
            let key = workload_key(slot);
            let roll = (op * 31 + thread * 17) % 100;

            let result = if roll < self.remove_percent {
                tally.removes += 1;
                region.remove(key).map(|_| ())
            } else if roll < self.remove_percent + self.read_percent {
                tally.gets += 1;
                region.get(key).map(|found| match found {
                    Some(_) => tally.hits += 1,
                    None => tally.misses += 1,
                })
            } else {
                tally.puts += 1;
                region.put(key, value.clone()).map(|_| ())
            };

            if let Err(e) = result {
                tally.errors += 1;
                warn!(thread, op, "operation failed: {}", e);
            }
        }
        tally
    }
}

/// Key for a workload slot, rotating through the inline key kinds
fn workload_key(slot: usize) -> RegionKey {
    match slot % 5 {
        0 => RegionKey::Int(slot as i32),
        1 => RegionKey::Long((1i64 << 32) + slot as i64),
        2 => RegionKey::Uuid(Uuid::from_u128(slot as u128)),
        3 => RegionKey::from(format!("k{}", slot)),
        _ => RegionKey::from(format!("workload-key-{:08}", slot)),
    }
}

fn log_summary(region: &Region, counters: &RegionStats, tally: &Tally, elapsed: Duration) {
    let ops = tally.operations();
    let secs = elapsed.as_secs_f64().max(f64::EPSILON);
    let snapshot = counters.snapshot();

    info!("Workload finished in {:.2?}", elapsed);
    info!("  Operations: {} ({:.0} ops/s)", ops, ops as f64 / secs);
    info!(
        "  Puts: {}, gets: {} ({} hits, {} misses), removes: {}, errors: {}",
        tally.puts, tally.gets, tally.hits, tally.misses, tally.removes, tally.errors
    );
    info!(
        "  Entries: {} ({} resident), memory in use: {} bytes",
        region.len(),
        region.resident_entries(),
        region.memory_in_use()
    );
    info!(
        "  Evictions: {} ({} failed), recalls: {} ({} failed)",
        snapshot.evictions, snapshot.eviction_failures, snapshot.recalls, snapshot.recall_failures
    );
    if let Some(overflow) = region.overflow_stats() {
        info!(
            "  Overflow: {} slots, {} of {} bytes",
            overflow.slots, overflow.stored_bytes, overflow.capacity_bytes
        );
    }
    if let Some(arena) = region.context().off_heap() {
        info!(
            "  Off-heap: {} of {} bytes, {} live blocks",
            arena.used(),
            arena.capacity(),
            arena.live_allocations()
        );
        if arena.invalid_handle_faults() > 0 || arena.leaked_allocations() > 0 {
            error!(
                faults = arena.invalid_handle_faults(),
                leaked = arena.leaked_allocations(),
                "off-heap accounting fault detected"
            );
        }
    }
}

// =============================================================================
// Health Server
// =============================================================================

async fn run_health_server(addr: &str) -> anyhow::Result<()> {
    use http_body_util::Full;
    use hyper::server::conn::http1;
    use hyper::service::service_fn;
    use hyper::{Request, Response, StatusCode};
    use hyper_util::rt::TokioIo;
    use std::net::SocketAddr;
    use tokio::net::TcpListener;

    async fn health_handler(
        req: Request<hyper::body::Incoming>,
    ) -> std::result::Result<Response<Full<Bytes>>, std::convert::Infallible> {
        let response = match req.uri().path() {
            "/healthz" | "/livez" | "/readyz" => Response::new(Full::new(Bytes::from("ok"))),
            _ => not_found(),
        };
        Ok(response)
    }

    fn not_found() -> Response<Full<Bytes>> {
        let mut response = Response::new(Full::new(Bytes::from("not found")));
        *response.status_mut() = StatusCode::NOT_FOUND;
        response
    }

    let addr: SocketAddr = addr
        .parse()
        .with_context(|| format!("invalid health server address {}", addr))?;

    let listener = TcpListener::bind(addr)
        .await
        .context("failed to bind health server")?;

    info!("Health server listening on {}", addr);

    loop {
        let (stream, _) = listener
            .accept()
            .await
            .context("health server accept error")?;

        let io = TokioIo::new(stream);

        tokio::spawn(async move {
            if let Err(e) = http1::Builder::new()
                .serve_connection(io, service_fn(health_handler))
                .await
            {
                error!("Health server connection error: {}", e);
            }
        });
    }
}

// =============================================================================
// Metrics Server
// =============================================================================

async fn run_metrics_server(addr: &str, registry: Registry) -> anyhow::Result<()> {
    use http_body_util::Full;
    use hyper::header::{HeaderValue, CONTENT_TYPE};
    use hyper::server::conn::http1;
    use hyper::service::service_fn;
    use hyper::{Request, Response, StatusCode};
    use hyper_util::rt::TokioIo;
    use prometheus::{Encoder, TextEncoder};
    use std::net::SocketAddr;
    use tokio::net::TcpListener;

    fn metrics_response(registry: &Registry, path: &str) -> Response<Full<Bytes>> {
        let (status, body) = match path {
            "/metrics" => {
                let encoder = TextEncoder::new();
                let mut buffer = Vec::new();
                match encoder.encode(&registry.gather(), &mut buffer) {
                    Ok(()) => (StatusCode::OK, Bytes::from(buffer)),
                    Err(e) => (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        Bytes::from(format!("encoding metrics failed: {}", e)),
                    ),
                }
            }
            _ => (StatusCode::NOT_FOUND, Bytes::from("not found")),
        };

        let mut response = Response::new(Full::new(body));
        *response.status_mut() = status;
        if status == StatusCode::OK {
            response
                .headers_mut()
                .insert(CONTENT_TYPE, HeaderValue::from_static(prometheus::TEXT_FORMAT));
        }
        response
    }

    let addr: SocketAddr = addr
        .parse()
        .with_context(|| format!("invalid metrics server address {}", addr))?;

    let listener = TcpListener::bind(addr)
        .await
        .context("failed to bind metrics server")?;

    info!("Metrics server listening on {}", addr);

    loop {
        let (stream, _) = listener
            .accept()
            .await
            .context("metrics server accept error")?;

        let io = TokioIo::new(stream);
        let registry = registry.clone();

        tokio::spawn(async move {
            let service = service_fn(move |req: Request<hyper::body::Incoming>| {
                let response = metrics_response(&registry, req.uri().path());
                async move { Ok::<_, std::convert::Infallible>(response) }
            });
            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                error!("Metrics server connection error: {}", e);
            }
        });
    }
}
