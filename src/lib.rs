//! RegionStore - Entry Storage Core for a Partitioned In-Memory Data Grid
//!
//! Stores individual key/value records with key-type-specific inline encoding,
//! heap or off-heap value placement, LRU eviction to a disk overflow store,
//! optional version stamps and transparent compression.
//!
//! # Architecture
//!
//! ```text
//!                  ┌──────────────────────────────┐
//!   put / get ───▶ │            Region            │
//!                  └──┬───────────┬────────────┬──┘
//!                     │           │            │
//!            ┌────────▼───┐ ┌─────▼──────┐ ┌───▼───────────┐
//!            │ EntryFactory│ │  EntryMap  │ │ LruController │
//!            └────────┬───┘ └─────┬──────┘ └───┬───────────┘
//!                     │     RegionEntry        │ evict / recall
//!                     ▼     (key, ValueRef)    ▼
//!   ┌─────────────┐  ┌──────────────┐  ┌──────────────────┐
//!   │ KeyEncoder  │  │ OffHeapArena │  │  OverflowStore   │
//!   │ (inline)    │  │ (ref counts) │  │ (file / memory)  │
//!   └─────────────┘  └──────────────┘  └──────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`key`] - Runtime key objects and inline key encoding
//! - [`entry`] - Entry record, value tag, variants and the entry factory
//! - [`offheap`] - Reference-counted off-heap arena
//! - [`eviction`] - Memory accounting, recency ordering and the LRU controller
//! - [`disk`] - Overflow stores for evicted values
//! - [`compression`] - Compressor capability and LZ4 support
//! - [`context`] - Region capabilities handed to entries
//! - [`region`] - Region orchestration over a sharded entry map
//! - [`stats`] - Statistics sinks, including Prometheus
//! - [`config`] - Region configuration
//! - [`error`] - Error types

pub mod compression;
pub mod config;
pub mod context;
pub mod disk;
pub mod entry;
pub mod error;
pub mod eviction;
pub mod key;
pub mod offheap;
pub mod region;
pub mod stats;

// Re-export commonly used types
pub use config::RegionConfig;
pub use context::{RegionAttributes, RegionContext};
pub use entry::{RegionEntry, RegionEntryFactory, ValueLocation};
pub use error::{Error, Result};
pub use key::RegionKey;
pub use offheap::{OffHeapArena, OffHeapToken};
pub use region::{PutOutcome, Region, Versioned};
pub use stats::{PrometheusStats, RegionStats, StatisticsSink};
