//! Data version filter planning.
//!
//! A client that already holds a cluster's data at a committed version can
//! tell the publisher so, and the publisher will skip re-sending that
//! cluster unless it changed. This module turns the cache's committed
//! version table into an outbound filter list: candidates are prioritized
//! by how many bytes they would save, encoded into a bounded builder, and
//! rolled back to the last checkpoint when the destination fills up:
//! overflow yields a valid partial list, never a corrupt one.

use std::cmp::Reverse;

use tracing::{debug, trace};

use crate::element::ElementWriter;
use crate::error::{CacheError, Result};
use crate::types::{AttributePathParams, ConcreteClusterPath, DataVersion};

/// One (endpoint, cluster, version) filter entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DataVersionFilter {
    pub cluster: ConcreteClusterPath,
    pub version: DataVersion,
}

/// A cluster eligible for filtering, with the byte size its omission
/// would save on the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FilterCandidate {
    pub cluster: ConcreteClusterPath,
    pub version: DataVersion,
    pub size_estimate: usize,
}

/// Encodes filter entries into a bounded destination with checkpoint and
/// rollback support.
///
/// Writes past the byte budget fail with [`CacheError::BufferTooSmall`]
/// and may leave a partially encoded entry behind; callers bracket each
/// entry with [`checkpoint`]/[`rollback`] to keep the output a valid
/// prefix.
///
/// [`checkpoint`]: FilterListBuilder::checkpoint
/// [`rollback`]: FilterListBuilder::rollback
#[derive(Debug)]
pub struct FilterListBuilder {
    writer: ElementWriter,
    entries: Vec<DataVersionFilter>,
    checkpoint_len: usize,
    checkpoint_entries: usize,
    checkpoint_depth: usize,
}

impl FilterListBuilder {
    /// Builder with a byte budget for the encoded list.
    pub fn new(capacity: usize) -> Self {
        Self {
            writer: ElementWriter::bounded(capacity),
            entries: Vec::new(),
            checkpoint_len: 0,
            checkpoint_entries: 0,
            checkpoint_depth: 0,
        }
    }

    /// Builder without a byte budget.
    pub fn unbounded() -> Self {
        Self {
            writer: ElementWriter::new(),
            entries: Vec::new(),
            checkpoint_len: 0,
            checkpoint_entries: 0,
            checkpoint_depth: 0,
        }
    }

    /// Record the current output position as the rollback target.
    pub fn checkpoint(&mut self) {
        self.checkpoint_len = self.writer.len();
        self.checkpoint_entries = self.entries.len();
        self.checkpoint_depth = self.writer.depth();
    }

    /// Discard everything written since the last checkpoint, including a
    /// container an overflowing entry left open.
    pub fn rollback(&mut self) {
        self.writer
            .rewind_to(self.checkpoint_len, self.checkpoint_depth);
        self.entries.truncate(self.checkpoint_entries);
    }

    /// Encode one filter entry as a structure of three integers.
    pub fn push(&mut self, filter: DataVersionFilter) -> Result<()> {
        self.writer.start_structure()?;
        self.writer.put_u64(u64::from(filter.cluster.endpoint_id.0))?;
        self.writer.put_u64(u64::from(filter.cluster.cluster_id.0))?;
        self.writer.put_u64(u64::from(filter.version.0))?;
        self.writer.end_container()?;
        self.entries.push(filter);
        Ok(())
    }

    /// Entries successfully encoded so far.
    pub fn entries(&self) -> &[DataVersionFilter] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Encoded bytes written so far.
    pub fn encoded_len(&self) -> usize {
        self.writer.len()
    }

    /// Finish the list, right-sizing the output.
    pub fn finalize(self) -> Vec<u8> {
        self.writer.finalize()
    }
}

/// Plans outbound data version filter lists.
///
/// Holds the set of request paths trusted for whole-cluster version
/// coverage: wildcard-attribute paths from the *current* request that are
/// not overlapped by a sibling concrete-attribute path in the same cluster
/// scope. The set is rebuilt on every request rather than accumulated, so
/// a stale path from an earlier, unrelated request can never grant trust.
#[derive(Debug, Default)]
pub struct DataVersionFilterPlanner {
    request_paths: Vec<AttributePathParams>,
}

impl DataVersionFilterPlanner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild the trusted path set from the paths of the request being
    /// constructed.
    pub fn update_request_paths(&mut self, paths: &[AttributePathParams]) {
        self.request_paths.clear();
        for candidate in paths {
            if !candidate.has_wildcard_attribute_id() {
                continue;
            }
            // A concrete sibling in the same cluster scope means the
            // request is not actually asking for the whole cluster.
            let overlapped = paths.iter().any(|other| {
                !other.has_wildcard_attribute_id()
                    && cluster_scopes_overlap(candidate, other)
            });
            if !overlapped {
                self.request_paths.push(*candidate);
            }
        }
        trace!(trusted = self.request_paths.len(), "rebuilt request path set");
    }

    /// Forget all trusted paths (session teardown).
    pub fn clear_request_paths(&mut self) {
        self.request_paths.clear();
    }

    /// Whether the current trusted set claims every attribute of the
    /// given cluster instance.
    pub fn covers_cluster(&self, cluster: &ConcreteClusterPath) -> bool {
        self.request_paths
            .iter()
            .any(|p| p.includes_all_attributes_in_cluster(cluster))
    }

    pub fn request_paths(&self) -> &[AttributePathParams] {
        &self.request_paths
    }

    /// Encode as many candidate filters as fit, biggest savings first.
    ///
    /// Candidates no outbound request path intersects are skipped. On
    /// overflow the builder is rolled back to the last checkpoint and
    /// planning stops: the result is a valid prefix. Returns whether
    /// anything was encoded.
    pub fn plan(
        &self,
        mut candidates: Vec<FilterCandidate>,
        requested: &[AttributePathParams],
        builder: &mut FilterListBuilder,
    ) -> Result<bool> {
        // Descending size; cluster path as a deterministic tie-break.
        candidates.sort_by_key(|c| (Reverse(c.size_estimate), c.cluster));

        let mut encoded_any = false;
        for candidate in candidates {
            if !requested.iter().any(|p| p.intersects_cluster(&candidate.cluster)) {
                continue;
            }
            builder.checkpoint();
            match builder.push(DataVersionFilter {
                cluster: candidate.cluster,
                version: candidate.version,
            }) {
                Ok(()) => {
                    trace!(cluster = ?candidate.cluster, version = candidate.version.0, "encoded version filter");
                    encoded_any = true;
                }
                Err(CacheError::BufferTooSmall) => {
                    builder.rollback();
                    debug!(
                        encoded = builder.entries().len(),
                        "filter list destination full, stopping"
                    );
                    break;
                }
                Err(other) => return Err(other),
            }
        }
        Ok(encoded_any)
    }
}

/// Whether two wildcardable paths can name attributes of the same cluster
/// instance.
fn cluster_scopes_overlap(a: &AttributePathParams, b: &AttributePathParams) -> bool {
    let endpoints = match (a.endpoint_id, b.endpoint_id) {
        (Some(x), Some(y)) => x == y,
        _ => true,
    };
    let clusters = match (a.cluster_id, b.cluster_id) {
        (Some(x), Some(y)) => x == y,
        _ => true,
    };
    endpoints && clusters
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(endpoint: u16, cluster: u32, version: u32, size: usize) -> FilterCandidate {
        FilterCandidate {
            cluster: ConcreteClusterPath::new(endpoint, cluster),
            version: DataVersion(version),
            size_estimate: size,
        }
    }

    fn wildcard(endpoint: u16, cluster: u32) -> AttributePathParams {
        AttributePathParams::wildcard_attributes(endpoint, cluster)
    }

    #[test]
    fn test_trusted_set_excludes_overlapped_wildcards() {
        let mut planner = DataVersionFilterPlanner::new();
        planner.update_request_paths(&[
            wildcard(1, 0x0100),
            // Concrete sibling in the same cluster: distrust the wildcard.
            AttributePathParams::concrete(1, 0x0100, 4),
            wildcard(1, 0x0200),
        ]);

        assert!(!planner.covers_cluster(&ConcreteClusterPath::new(1, 0x0100)));
        assert!(planner.covers_cluster(&ConcreteClusterPath::new(1, 0x0200)));
    }

    #[test]
    fn test_trusted_set_is_rebuilt_per_request() {
        let mut planner = DataVersionFilterPlanner::new();
        planner.update_request_paths(&[wildcard(1, 0x0100)]);
        assert!(planner.covers_cluster(&ConcreteClusterPath::new(1, 0x0100)));

        planner.update_request_paths(&[wildcard(2, 0x0200)]);
        assert!(!planner.covers_cluster(&ConcreteClusterPath::new(1, 0x0100)));
    }

    #[test]
    fn test_plan_prefers_larger_clusters() {
        let planner = DataVersionFilterPlanner::new();
        let requested = [wildcard(1, 0x0100), wildcard(1, 0x0200)];
        let mut builder = FilterListBuilder::unbounded();

        let encoded = planner
            .plan(
                vec![
                    candidate(1, 0x0100, 7, 10),
                    candidate(1, 0x0200, 9, 500),
                ],
                &requested,
                &mut builder,
            )
            .unwrap();

        assert!(encoded);
        let entries = builder.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].cluster, ConcreteClusterPath::new(1, 0x0200));
        assert_eq!(entries[1].cluster, ConcreteClusterPath::new(1, 0x0100));
    }

    #[test]
    fn test_plan_skips_unrequested_clusters() {
        let planner = DataVersionFilterPlanner::new();
        let requested = [wildcard(1, 0x0100)];
        let mut builder = FilterListBuilder::unbounded();

        let encoded = planner
            .plan(
                vec![candidate(2, 0x0300, 1, 64)],
                &requested,
                &mut builder,
            )
            .unwrap();

        assert!(!encoded);
        assert!(builder.is_empty());
    }

    #[test]
    fn test_overflow_rolls_back_to_valid_prefix() {
        let planner = DataVersionFilterPlanner::new();
        let requested = [wildcard(1, 0x0100), wildcard(1, 0x0200), wildcard(1, 0x0300)];
        // Room for exactly one encoded entry (1 + 3*9 + 1 = 29 bytes).
        let mut builder = FilterListBuilder::new(40);

        let encoded = planner
            .plan(
                vec![
                    candidate(1, 0x0100, 1, 300),
                    candidate(1, 0x0200, 2, 200),
                    candidate(1, 0x0300, 3, 100),
                ],
                &requested,
                &mut builder,
            )
            .unwrap();

        assert!(encoded);
        assert_eq!(builder.entries().len(), 1);
        assert_eq!(builder.entries()[0].cluster, ConcreteClusterPath::new(1, 0x0100));
        // The encoded bytes are exactly the surviving entry, extractable
        // even though the second entry overflowed mid-structure.
        assert_eq!(builder.encoded_len(), 29);
        assert_eq!(builder.finalize().len(), 29);
    }

    #[test]
    fn test_overflow_with_no_room_encodes_nothing() {
        let planner = DataVersionFilterPlanner::new();
        let requested = [wildcard(1, 0x0100)];
        let mut builder = FilterListBuilder::new(8);

        let encoded = planner
            .plan(vec![candidate(1, 0x0100, 1, 10)], &requested, &mut builder)
            .unwrap();

        assert!(!encoded);
        assert!(builder.is_empty());
        assert_eq!(builder.encoded_len(), 0);
    }

    #[test]
    fn test_builder_rollback_restores_entries() {
        let mut builder = FilterListBuilder::new(29);
        builder.checkpoint();
        builder
            .push(DataVersionFilter {
                cluster: ConcreteClusterPath::new(1, 2),
                version: DataVersion(3),
            })
            .unwrap();
        assert_eq!(builder.entries().len(), 1);

        builder.checkpoint();
        let err = builder
            .push(DataVersionFilter {
                cluster: ConcreteClusterPath::new(4, 5),
                version: DataVersion(6),
            })
            .unwrap_err();
        assert_eq!(err, CacheError::BufferTooSmall);
        builder.rollback();

        assert_eq!(builder.entries().len(), 1);
        assert_eq!(builder.encoded_len(), 29);
        // The overflow opened a structure that rollback must close off.
        let bytes = builder.finalize();
        assert_eq!(bytes.len(), 29);
    }
}
