//! Hierarchical attribute/event state cache.
//!
//! [`attributes::ClusterStateCache`] is the heart of the crate: it absorbs
//! reassembled report traffic into a queryable endpoint → cluster →
//! attribute snapshot, tracks per-cluster data versions, and notifies an
//! application observer of what changed once each report is complete.
//! [`events::EventCache`] holds delivered events keyed by event number;
//! [`filter`] plans outbound data version filter lists from the cached
//! versions.

pub mod attributes;
pub mod events;
pub mod filter;

pub use attributes::{
    AttributeRecord, CacheConfig, ClusterStateCache, DataRetention, DecodableValue,
};
pub use events::{DecodableEvent, EventCache, EventRecord};
pub use filter::{DataVersionFilter, DataVersionFilterPlanner, FilterCandidate, FilterListBuilder};
