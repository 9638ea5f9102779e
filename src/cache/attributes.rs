//! Hierarchical attribute state cache with data-version bookkeeping.
//!
//! The cache absorbs report traffic (already reassembled: list chunks
//! never reach it) into an ordered endpoint → cluster → attribute map.
//! Each attribute slot holds exactly one of a serialized value, a value
//! size, or a status; the closed [`AttributeRecord`] variant makes the
//! "both data and status" bug unrepresentable.
//!
//! Data versions follow a two-phase scheme. While a report delivers a
//! cluster's attributes the incoming version is only *pending*; it is
//! committed when the report moves on to a different cluster, or at the
//! end of the report. Fresh data for a cluster always invalidates its
//! previously committed version first, so an interrupted delivery can
//! never leave a stale version looking current. Versions are trusted only
//! for clusters covered by a wildcard request path (see
//! [`super::filter::DataVersionFilterPlanner`]).
//!
//! The cache persists across reports; the changed/added sets are
//! per-report scratch, reset when the next report begins. Accessors
//! return borrowed views that are valid until the next mutation of that
//! slot. Accessor calls while a report is open see partially applied
//! state.

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, trace, warn};

use crate::cache::events::{DecodableEvent, EventCache, EventRecord};
use crate::cache::filter::{DataVersionFilterPlanner, FilterCandidate, FilterListBuilder};
use crate::element::ElementReader;
use crate::error::{CacheError, Result};
use crate::report::{CacheObserver, ReportSink};
use crate::types::{
    AttributeId, AttributePathParams, ClusterId, ConcreteAttributePath, ConcreteClusterPath,
    ConcreteDataAttributePath, ConcreteEventPath, DataVersion, EndpointId, EventHeader,
    EventNumber, EventPathParams, Status,
};

/// On-wire size attributed to a status entry when estimating how many
/// bytes a data version filter would save.
const STATUS_SIZE_ESTIMATE: usize = 3;

/// What one attribute slot holds. Exactly one variant at a time.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AttributeRecord {
    /// The serialized value, owned by the cache.
    Value(Vec<u8>),
    /// The value's encoded size, when the cache is in size-only mode.
    Size(usize),
    /// A status delivered instead of data.
    Status(Status),
}

impl AttributeRecord {
    pub fn is_data(&self) -> bool {
        matches!(self, AttributeRecord::Value(_) | AttributeRecord::Size(_))
    }

    pub fn is_status(&self) -> bool {
        matches!(self, AttributeRecord::Status(_))
    }

    /// Contribution to a cluster's estimated on-wire size.
    fn size_estimate(&self) -> usize {
        match self {
            AttributeRecord::Value(value) => value.len(),
            AttributeRecord::Size(size) => *size,
            AttributeRecord::Status(_) => STATUS_SIZE_ESTIMATE,
        }
    }
}

/// Whether attribute values are kept, or only their sizes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum DataRetention {
    /// Keep full serialized values; accessors can return them.
    #[default]
    Full,
    /// Keep sizes only. Version tracking and filter planning still work;
    /// `get` does not.
    SizeOnly,
}

/// Cache behavior toggles.
///
/// The default is the full "versioned" cache. `simple()` is the plain
/// attribute store: full values, no version bookkeeping, no event cache.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CacheConfig {
    pub retention: DataRetention,
    pub track_versions: bool,
    pub cache_events: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            retention: DataRetention::Full,
            track_versions: true,
            cache_events: true,
        }
    }
}

impl CacheConfig {
    pub fn simple() -> Self {
        Self {
            retention: DataRetention::Full,
            track_versions: false,
            cache_events: false,
        }
    }
}

/// Typed decode of a cached attribute value, checked against the
/// attribute's cluster identity.
pub trait DecodableValue: Sized {
    const CLUSTER_ID: ClusterId;
    /// Human-readable name used in `SchemaMismatch` errors.
    const NAME: &'static str;

    fn decode(reader: &ElementReader<'_>) -> Result<Self>;
}

#[derive(Debug, Default)]
struct ClusterRecord {
    attributes: BTreeMap<AttributeId, AttributeRecord>,
    pending_version: Option<DataVersion>,
    committed_version: Option<DataVersion>,
}

/// The client-side cluster state cache.
///
/// Implements [`ReportSink`] so the transport (through the list-chunk
/// reassembler) can drive it directly; forwards every hook to the owned
/// observer and fires change notifications from `on_report_end`.
pub struct ClusterStateCache<O: CacheObserver> {
    observer: O,
    endpoints: BTreeMap<EndpointId, BTreeMap<ClusterId, ClusterRecord>>,
    /// Paths written by the report currently (or last) applied.
    changed: BTreeSet<ConcreteAttributePath>,
    /// Endpoints first seen in the report currently (or last) applied.
    added_endpoints: BTreeSet<EndpointId>,
    /// Cluster the previous data element of the open report belonged to.
    last_cluster: Option<ConcreteClusterPath>,
    planner: DataVersionFilterPlanner,
    events: EventCache,
    config: CacheConfig,
}

impl<O: CacheObserver> ClusterStateCache<O> {
    /// Full versioned cache: value retention, data versions, events.
    pub fn new(observer: O) -> Self {
        Self::with_config(observer, CacheConfig::default())
    }

    /// Plain attribute store: values only, no versions, no events.
    pub fn simple(observer: O) -> Self {
        Self::with_config(observer, CacheConfig::simple())
    }

    pub fn with_config(observer: O, config: CacheConfig) -> Self {
        let events = match config.retention {
            DataRetention::Full => EventCache::new(),
            DataRetention::SizeOnly => EventCache::counting_only(),
        };
        Self {
            observer,
            endpoints: BTreeMap::new(),
            changed: BTreeSet::new(),
            added_endpoints: BTreeSet::new(),
            last_cluster: None,
            planner: DataVersionFilterPlanner::new(),
            events,
            config,
        }
    }

    pub fn observer(&self) -> &O {
        &self.observer
    }

    pub fn observer_mut(&mut self) -> &mut O {
        &mut self.observer
    }

    pub fn into_observer(self) -> O {
        self.observer
    }

    /// The event cache (empty unless events are enabled).
    pub fn events(&self) -> &EventCache {
        &self.events
    }

    // --- Accessors ---

    fn record(&self, path: &ConcreteAttributePath) -> Option<&AttributeRecord> {
        self.endpoints
            .get(&path.endpoint_id)?
            .get(&path.cluster_id)?
            .attributes
            .get(&path.attribute_id)
    }

    /// Borrowed view of the cached serialized value for `path`.
    ///
    /// The view is valid until the next mutation of that slot.
    pub fn get(&self, path: &ConcreteAttributePath) -> Result<&[u8]> {
        match self.record(path) {
            None => Err(CacheError::KeyNotFound),
            Some(AttributeRecord::Status(_)) => Err(CacheError::StatusReceived),
            Some(AttributeRecord::Size(_)) => {
                Err(CacheError::InvalidArgument("cache retains value sizes only"))
            }
            Some(AttributeRecord::Value(value)) => Ok(value),
        }
    }

    /// Cursor positioned on the cached value for `path`.
    pub fn get_reader(&self, path: &ConcreteAttributePath) -> Result<ElementReader<'_>> {
        ElementReader::single(self.get(path)?)
    }

    /// Decode the cached value for `path` as `T`, checking the cluster
    /// identity first.
    pub fn get_value<T: DecodableValue>(&self, path: &ConcreteAttributePath) -> Result<T> {
        if path.cluster_id != T::CLUSTER_ID {
            return Err(CacheError::SchemaMismatch { expected: T::NAME });
        }
        T::decode(&self.get_reader(path)?)
    }

    /// The cached status for `path`.
    pub fn get_status(&self, path: &ConcreteAttributePath) -> Result<Status> {
        match self.record(path) {
            None => Err(CacheError::KeyNotFound),
            Some(AttributeRecord::Status(status)) => Ok(*status),
            Some(_) => Err(CacheError::InvalidArgument("data is cached for this path")),
        }
    }

    /// Last committed data version of a cluster instance.
    ///
    /// `Ok(None)` means the cluster has been observed but its version is
    /// unknown or not currently valid.
    pub fn get_version(&self, cluster: &ConcreteClusterPath) -> Result<Option<DataVersion>> {
        self.endpoints
            .get(&cluster.endpoint_id)
            .and_then(|clusters| clusters.get(&cluster.cluster_id))
            .map(|record| record.committed_version)
            .ok_or(CacheError::KeyNotFound)
    }

    // --- Event accessors (delegated) ---

    pub fn get_event_data(&self, number: EventNumber) -> Result<&EventRecord> {
        self.events.get(number)
    }

    pub fn get_event<T: DecodableEvent>(&self, number: EventNumber) -> Result<T> {
        self.events.get_event(number)
    }

    pub fn get_event_status(&self, path: &ConcreteEventPath) -> Result<Status> {
        self.events.get_status(path)
    }

    pub fn highest_received_event_number(&self) -> Option<EventNumber> {
        self.events.highest_received_event_number()
    }

    pub fn for_each_event_data<F>(
        &self,
        filter: &EventPathParams,
        min_number: Option<EventNumber>,
        visitor: F,
    ) -> Result<()>
    where
        F: FnMut(&EventRecord) -> Result<()>,
    {
        self.events.for_each_event(filter, min_number, visitor)
    }

    /// Drop cached events and statuses; see [`EventCache::clear`].
    pub fn clear_event_cache(&mut self, reset_counters: bool) {
        self.events.clear(reset_counters);
    }

    // --- Clears ---

    /// Remove one attribute slot. Siblings and the cluster's versions are
    /// untouched. No-op if absent.
    pub fn clear_attribute(&mut self, path: &ConcreteAttributePath) {
        if let Some(record) = self
            .endpoints
            .get_mut(&path.endpoint_id)
            .and_then(|clusters| clusters.get_mut(&path.cluster_id))
        {
            record.attributes.remove(&path.attribute_id);
        }
    }

    /// Remove a whole cluster instance, versions included. No-op if absent.
    pub fn clear_cluster_attributes(&mut self, cluster: &ConcreteClusterPath) {
        if let Some(clusters) = self.endpoints.get_mut(&cluster.endpoint_id) {
            clusters.remove(&cluster.cluster_id);
        }
    }

    /// Remove everything cached for an endpoint. No-op if absent.
    pub fn clear_endpoint_attributes(&mut self, endpoint: EndpointId) {
        self.endpoints.remove(&endpoint);
    }

    // --- Iteration ---

    /// Visit each cached attribute path of one cluster instance, in
    /// attribute id order. `KeyNotFound` if the cluster was never cached.
    pub fn for_each_attribute<F>(&self, cluster: &ConcreteClusterPath, mut visitor: F) -> Result<()>
    where
        F: FnMut(&ConcreteAttributePath) -> Result<()>,
    {
        let record = self
            .endpoints
            .get(&cluster.endpoint_id)
            .and_then(|clusters| clusters.get(&cluster.cluster_id))
            .ok_or(CacheError::KeyNotFound)?;
        for attribute in record.attributes.keys() {
            visitor(&ConcreteAttributePath {
                endpoint_id: cluster.endpoint_id,
                cluster_id: cluster.cluster_id,
                attribute_id: *attribute,
            })?;
        }
        Ok(())
    }

    /// Visit each cached attribute path of a cluster type across all
    /// endpoints, in (endpoint, attribute) order. `KeyNotFound` if no
    /// endpoint carries the cluster.
    pub fn for_each_attribute_of_cluster<F>(
        &self,
        cluster_id: ClusterId,
        mut visitor: F,
    ) -> Result<()>
    where
        F: FnMut(&ConcreteAttributePath) -> Result<()>,
    {
        let mut found = false;
        for (endpoint, clusters) in &self.endpoints {
            if let Some(record) = clusters.get(&cluster_id) {
                found = true;
                for attribute in record.attributes.keys() {
                    visitor(&ConcreteAttributePath {
                        endpoint_id: *endpoint,
                        cluster_id,
                        attribute_id: *attribute,
                    })?;
                }
            }
        }
        if found {
            Ok(())
        } else {
            Err(CacheError::KeyNotFound)
        }
    }

    /// Visit each cached cluster instance of one endpoint, in cluster id
    /// order. `KeyNotFound` if the endpoint was never cached.
    pub fn for_each_cluster<F>(&self, endpoint: EndpointId, mut visitor: F) -> Result<()>
    where
        F: FnMut(&ConcreteClusterPath) -> Result<()>,
    {
        let clusters = self.endpoints.get(&endpoint).ok_or(CacheError::KeyNotFound)?;
        for cluster in clusters.keys() {
            visitor(&ConcreteClusterPath {
                endpoint_id: endpoint,
                cluster_id: *cluster,
            })?;
        }
        Ok(())
    }

    // --- Report application ---

    /// Two-phase version bookkeeping for an incoming data element.
    fn update_versions(&mut self, path: &ConcreteDataAttributePath) {
        let cluster_path = path.cluster_path();

        // The previous cluster's delivery run ended: its pending version
        // is now safe to commit.
        if let Some(last) = self.last_cluster {
            if last != cluster_path {
                self.commit_pending_version(last);
            }
        }

        let covered = self.planner.covers_cluster(&cluster_path);
        let record = self
            .endpoints
            .entry(cluster_path.endpoint_id)
            .or_default()
            .entry(cluster_path.cluster_id)
            .or_default();

        // Fresh data invalidates the committed version until this
        // cluster's run completes without interruption.
        record.committed_version = None;
        if covered {
            record.pending_version = path.data_version;
        }
        self.last_cluster = Some(cluster_path);
    }

    fn commit_pending_version(&mut self, cluster: ConcreteClusterPath) {
        if let Some(record) = self
            .endpoints
            .get_mut(&cluster.endpoint_id)
            .and_then(|clusters| clusters.get_mut(&cluster.cluster_id))
        {
            if let Some(version) = record.pending_version.take() {
                debug!(?cluster, version = version.0, "committing data version");
                record.committed_version = Some(version);
            }
        }
    }

    /// Clusters with a committed version, sized for filter planning.
    fn filter_candidates(&self) -> Vec<FilterCandidate> {
        let mut candidates = Vec::new();
        for (endpoint, clusters) in &self.endpoints {
            for (cluster, record) in clusters {
                let Some(version) = record.committed_version else {
                    continue;
                };
                let size_estimate: usize = record
                    .attributes
                    .values()
                    .map(AttributeRecord::size_estimate)
                    .sum();
                if size_estimate == 0 {
                    continue;
                }
                candidates.push(FilterCandidate {
                    cluster: ConcreteClusterPath {
                        endpoint_id: *endpoint,
                        cluster_id: *cluster,
                    },
                    version,
                    size_estimate,
                });
            }
        }
        candidates
    }
}

impl<O: CacheObserver> ReportSink for ClusterStateCache<O> {
    fn on_report_begin(&mut self) {
        self.changed.clear();
        self.added_endpoints.clear();
        self.last_cluster = None;
        self.observer.on_report_begin();
    }

    fn on_attribute_data(
        &mut self,
        path: &ConcreteDataAttributePath,
        data: Option<&[u8]>,
        status: Status,
    ) {
        assert!(
            !path.list_op.is_list_item_operation(),
            "list chunks must pass through the reassembler before reaching the cache"
        );
        let attr_path = path.path;
        let endpoint_is_new = !self.endpoints.contains_key(&attr_path.endpoint_id);

        let record = match data {
            Some(payload) => {
                if let Err(error) = ElementReader::single(payload) {
                    // Local failure: this attribute is dropped, the rest
                    // of the report stands.
                    warn!(path = ?attr_path, %error, "rejecting malformed attribute payload");
                    self.observer.on_error(&error);
                    return;
                }
                if self.config.track_versions {
                    self.update_versions(path);
                }
                match self.config.retention {
                    DataRetention::Full => AttributeRecord::Value(payload.to_vec()),
                    DataRetention::SizeOnly => AttributeRecord::Size(payload.len()),
                }
            }
            None => AttributeRecord::Status(status),
        };

        trace!(path = ?attr_path, data = record.is_data(), "storing attribute record");
        self.endpoints
            .entry(attr_path.endpoint_id)
            .or_default()
            .entry(attr_path.cluster_id)
            .or_default()
            .attributes
            .insert(attr_path.attribute_id, record);
        self.changed.insert(attr_path);
        if endpoint_is_new {
            self.added_endpoints.insert(attr_path.endpoint_id);
        }

        self.observer.on_attribute_data(path, data, status);
    }

    fn on_event_data(&mut self, header: &EventHeader, data: Option<&[u8]>, status: Option<Status>) {
        if self.config.cache_events {
            if let Err(error) = self.events.on_event_data(header, data, status) {
                warn!(path = ?header.path, %error, "rejecting malformed event payload");
                self.observer.on_error(&error);
                return;
            }
        }
        self.observer.on_event_data(header, data, status);
    }

    fn on_report_end(&mut self) {
        if self.config.track_versions {
            if let Some(last) = self.last_cluster.take() {
                self.commit_pending_version(last);
            }
        }

        for path in &self.changed {
            self.observer.on_attribute_changed(path);
        }
        let clusters: BTreeSet<ConcreteClusterPath> =
            self.changed.iter().map(|p| p.cluster_path()).collect();
        for cluster in &clusters {
            self.observer.on_cluster_changed(cluster);
        }
        for endpoint in &self.added_endpoints {
            self.observer.on_endpoint_added(*endpoint);
        }

        self.observer.on_report_end();
    }

    fn on_error(&mut self, error: &CacheError) {
        // The open report is void: drop whatever it staged, keep what
        // earlier reports committed.
        self.last_cluster = None;
        for clusters in self.endpoints.values_mut() {
            for record in clusters.values_mut() {
                record.pending_version = None;
            }
        }
        self.changed.clear();
        self.added_endpoints.clear();
        self.observer.on_error(error);
    }

    fn on_done(&mut self) {
        self.observer.on_done();
    }

    fn on_subscription_established(&mut self, subscription_id: u64) {
        self.observer.on_subscription_established(subscription_id);
    }

    fn on_resubscription_needed(&mut self) {
        self.observer.on_resubscription_needed();
    }

    fn on_deallocate_paths(&mut self) {
        // Session teardown: outstanding request paths no longer exist, so
        // nothing may be trusted for version coverage.
        self.planner.clear_request_paths();
        self.observer.on_deallocate_paths();
    }

    fn on_unsolicited_message(&mut self) {
        self.observer.on_unsolicited_message();
    }

    fn update_data_version_filters(
        &mut self,
        builder: &mut FilterListBuilder,
        requested_paths: &[AttributePathParams],
    ) -> Result<bool> {
        if !self.config.track_versions {
            return Ok(false);
        }
        self.planner.update_request_paths(requested_paths);
        let candidates = self.filter_candidates();
        self.planner.plan(candidates, requested_paths, builder)
    }
}
