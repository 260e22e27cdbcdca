//! Statistics Sink
//!
//! Observability hook notified of allocate/free/evict/recall events.
//! `record` is infallible by signature: a sink can drop an event but can never
//! fail the operation that produced it.

use std::sync::atomic::{AtomicU64, Ordering};

use prometheus::{IntCounter, IntCounterVec, IntGauge, Opts, Registry};

use crate::error::{Error, Result};

/// Lifecycle event emitted by the storage core
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatEvent {
    /// Off-heap block allocated
    Allocated { bytes: u64 },
    /// Off-heap block reclaimed
    Freed { bytes: u64 },
    /// Value moved to the overflow store
    Evicted { bytes: u64 },
    /// An eviction candidate could not be persisted
    EvictionFailed,
    /// Value brought back from the overflow store
    Recalled { bytes: u64 },
    /// A recall could not produce the value
    RecallFailed,
    /// Entry published in a region
    EntryCreated,
    /// Entry removed and its resources released
    EntryDestroyed,
    /// A reclaimed off-heap handle was used
    InvalidHandle,
    /// An owned off-heap block was dropped without a release
    Leaked { bytes: u64 },
}

impl StatEvent {
    /// Label used for the event counter
    pub fn name(&self) -> &'static str {
        match self {
            StatEvent::Allocated { .. } => "allocated",
            StatEvent::Freed { .. } => "freed",
            StatEvent::Evicted { .. } => "evicted",
            StatEvent::EvictionFailed => "eviction_failed",
            StatEvent::Recalled { .. } => "recalled",
            StatEvent::RecallFailed => "recall_failed",
            StatEvent::EntryCreated => "entry_created",
            StatEvent::EntryDestroyed => "entry_destroyed",
            StatEvent::InvalidHandle => "invalid_handle",
            StatEvent::Leaked { .. } => "leaked",
        }
    }

    /// Bytes carried by the event, if any
    pub fn bytes(&self) -> Option<u64> {
        match *self {
            StatEvent::Allocated { bytes }
            | StatEvent::Freed { bytes }
            | StatEvent::Evicted { bytes }
            | StatEvent::Recalled { bytes }
            | StatEvent::Leaked { bytes } => Some(bytes),
            _ => None,
        }
    }
}

/// Receiver of [`StatEvent`]s
pub trait StatisticsSink: Send + Sync {
    fn record(&self, event: StatEvent);
}

/// Sink that discards everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopStats;

impl StatisticsSink for NoopStats {
    fn record(&self, _event: StatEvent) {}
}

// =============================================================================
// Atomic Counters
// =============================================================================

/// In-process counters for one region
#[derive(Debug, Default)]
pub struct RegionStats {
    allocations: AtomicU64,
    allocated_bytes: AtomicU64,
    frees: AtomicU64,
    freed_bytes: AtomicU64,
    evictions: AtomicU64,
    evicted_bytes: AtomicU64,
    eviction_failures: AtomicU64,
    recalls: AtomicU64,
    recalled_bytes: AtomicU64,
    recall_failures: AtomicU64,
    entries_created: AtomicU64,
    entries_destroyed: AtomicU64,
    invalid_handles: AtomicU64,
    leaks: AtomicU64,
}

impl RegionStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Point-in-time copy of every counter
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            allocations: self.allocations.load(Ordering::Relaxed),
            allocated_bytes: self.allocated_bytes.load(Ordering::Relaxed),
            frees: self.frees.load(Ordering::Relaxed),
            freed_bytes: self.freed_bytes.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            evicted_bytes: self.evicted_bytes.load(Ordering::Relaxed),
            eviction_failures: self.eviction_failures.load(Ordering::Relaxed),
            recalls: self.recalls.load(Ordering::Relaxed),
            recalled_bytes: self.recalled_bytes.load(Ordering::Relaxed),
            recall_failures: self.recall_failures.load(Ordering::Relaxed),
            entries_created: self.entries_created.load(Ordering::Relaxed),
            entries_destroyed: self.entries_destroyed.load(Ordering::Relaxed),
            invalid_handles: self.invalid_handles.load(Ordering::Relaxed),
            leaks: self.leaks.load(Ordering::Relaxed),
        }
    }

    /// Reset all counters
    pub fn reset(&self) {
        for counter in [
            &self.allocations,
            &self.allocated_bytes,
            &self.frees,
            &self.freed_bytes,
            &self.evictions,
            &self.evicted_bytes,
            &self.eviction_failures,
            &self.recalls,
            &self.recalled_bytes,
            &self.recall_failures,
            &self.entries_created,
            &self.entries_destroyed,
            &self.invalid_handles,
            &self.leaks,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

impl StatisticsSink for RegionStats {
    fn record(&self, event: StatEvent) {
        match event {
            StatEvent::Allocated { bytes } => {
                self.allocations.fetch_add(1, Ordering::Relaxed);
                self.allocated_bytes.fetch_add(bytes, Ordering::Relaxed);
            }
            StatEvent::Freed { bytes } => {
                self.frees.fetch_add(1, Ordering::Relaxed);
                self.freed_bytes.fetch_add(bytes, Ordering::Relaxed);
            }
            StatEvent::Evicted { bytes } => {
                self.evictions.fetch_add(1, Ordering::Relaxed);
                self.evicted_bytes.fetch_add(bytes, Ordering::Relaxed);
            }
            StatEvent::EvictionFailed => {
                self.eviction_failures.fetch_add(1, Ordering::Relaxed);
            }
            StatEvent::Recalled { bytes } => {
                self.recalls.fetch_add(1, Ordering::Relaxed);
                self.recalled_bytes.fetch_add(bytes, Ordering::Relaxed);
            }
            StatEvent::RecallFailed => {
                self.recall_failures.fetch_add(1, Ordering::Relaxed);
            }
            StatEvent::EntryCreated => {
                self.entries_created.fetch_add(1, Ordering::Relaxed);
            }
            StatEvent::EntryDestroyed => {
                self.entries_destroyed.fetch_add(1, Ordering::Relaxed);
            }
            StatEvent::InvalidHandle => {
                self.invalid_handles.fetch_add(1, Ordering::Relaxed);
            }
            StatEvent::Leaked { .. } => {
                self.leaks.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

/// Snapshot of [`RegionStats`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub allocations: u64,
    pub allocated_bytes: u64,
    pub frees: u64,
    pub freed_bytes: u64,
    pub evictions: u64,
    pub evicted_bytes: u64,
    pub eviction_failures: u64,
    pub recalls: u64,
    pub recalled_bytes: u64,
    pub recall_failures: u64,
    pub entries_created: u64,
    pub entries_destroyed: u64,
    pub invalid_handles: u64,
    pub leaks: u64,
}

impl StatsSnapshot {
    /// Off-heap bytes allocated and not yet freed
    pub fn outstanding_bytes(&self) -> u64 {
        self.allocated_bytes.saturating_sub(self.freed_bytes)
    }
}

// =============================================================================
// Prometheus
// =============================================================================

/// Sink exporting events as Prometheus counters
#[derive(Clone)]
pub struct PrometheusStats {
    events: IntCounterVec,
    bytes: IntCounterVec,
    off_heap_bytes: IntGauge,
    invalid_handles: IntCounter,
}

impl PrometheusStats {
    /// Register the region's collectors on `registry`.
    pub fn register(registry: &Registry, region: &str) -> Result<Self> {
        let events = IntCounterVec::new(
            Opts::new("regionstore_events_total", "Entry lifecycle events")
                .const_label("region", region),
            &["event"],
        )
        .map_err(metrics_error)?;
        let bytes = IntCounterVec::new(
            Opts::new("regionstore_event_bytes_total", "Bytes moved by lifecycle events")
                .const_label("region", region),
            &["event"],
        )
        .map_err(metrics_error)?;
        let off_heap_bytes = IntGauge::with_opts(
            Opts::new("regionstore_off_heap_bytes", "Off-heap bytes currently allocated")
                .const_label("region", region),
        )
        .map_err(metrics_error)?;
        let invalid_handles = IntCounter::with_opts(
            Opts::new(
                "regionstore_invalid_handle_faults_total",
                "Uses of reclaimed off-heap handles",
            )
            .const_label("region", region),
        )
        .map_err(metrics_error)?;

        registry
            .register(Box::new(events.clone()))
            .map_err(metrics_error)?;
        registry
            .register(Box::new(bytes.clone()))
            .map_err(metrics_error)?;
        registry
            .register(Box::new(off_heap_bytes.clone()))
            .map_err(metrics_error)?;
        registry
            .register(Box::new(invalid_handles.clone()))
            .map_err(metrics_error)?;

        Ok(Self {
            events,
            bytes,
            off_heap_bytes,
            invalid_handles,
        })
    }
}

impl StatisticsSink for PrometheusStats {
    fn record(&self, event: StatEvent) {
        let name = event.name();
        self.events.with_label_values(&[name]).inc();
        if let Some(bytes) = event.bytes() {
            self.bytes.with_label_values(&[name]).inc_by(bytes);
        }
        match event {
            StatEvent::Allocated { bytes } => self.off_heap_bytes.add(bytes as i64),
            // leaked blocks also report Freed
            StatEvent::Freed { bytes } => self.off_heap_bytes.sub(bytes as i64),
            StatEvent::InvalidHandle => self.invalid_handles.inc(),
            _ => {}
        }
    }
}

/// Fan-out to several sinks
pub struct MultiStats {
    sinks: Vec<std::sync::Arc<dyn StatisticsSink>>,
}

impl MultiStats {
    pub fn new(sinks: Vec<std::sync::Arc<dyn StatisticsSink>>) -> Self {
        Self { sinks }
    }
}

impl StatisticsSink for MultiStats {
    fn record(&self, event: StatEvent) {
        for sink in &self.sinks {
            sink.record(event);
        }
    }
}

fn metrics_error(e: prometheus::Error) -> Error {
    Error::Config(format!("metrics registration failed: {}", e))
}
