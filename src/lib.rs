//! # Cluster State Cache
//!
//! Client-side cache and chunk-reassembly layer for an attribute/event
//! streaming device-control protocol. Given asynchronous, possibly
//! fragmented delivery of a device's endpoint → cluster → attribute data
//! tree, it maintains a consistent queryable snapshot, reports what
//! changed, and plans data version filters so unchanged clusters are not
//! re-transmitted.
//!
//! ## Core pieces
//!
//! - [`ListChunkReassembler`]: turns multiple wire-level "append to list"
//!   events into one logical value before anything downstream can see it
//! - [`ClusterStateCache`]: hierarchical attribute/status store with
//!   per-cluster data versions and change notification
//! - [`EventCache`]: append-only event store deduplicated by event number
//! - [`DataVersionFilterPlanner`]: size-prioritized, budget-limited
//!   outbound filter lists from cached versions
//!
//! ## Example
//!
//! ```ignore
//! use clustercache::{ClusterStateCache, ListChunkReassembler, ReportSink};
//!
//! // The transport drives the reassembler; the cache sits behind it and
//! // the application observer behind that.
//! let mut client = ListChunkReassembler::new(ClusterStateCache::new(MyObserver::default()));
//!
//! client.on_report_begin();
//! client.on_attribute_data(&path, Some(&payload), Status::success());
//! client.on_report_end();
//!
//! let value = client.inner().get(&path.path)?;
//! ```
//!
//! Everything is single-threaded and callback-driven: no locks, no
//! channels, no suspension points. The caller keeps at most one report
//! open per cache instance and never drives one instance from two
//! threads.

pub mod cache;
pub mod element;
pub mod error;
pub mod reassembly;
pub mod report;
pub mod types;

// Re-exports
pub use cache::{
    AttributeRecord, CacheConfig, ClusterStateCache, DataRetention, DataVersionFilter,
    DataVersionFilterPlanner, DecodableEvent, DecodableValue, EventCache, EventRecord,
    FilterCandidate, FilterListBuilder,
};
pub use element::{ElementReader, ElementType, ElementWriter};
pub use error::{CacheError, Result};
pub use reassembly::ListChunkReassembler;
pub use report::{CacheObserver, ReportSink};
pub use types::*;
