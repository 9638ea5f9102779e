//! Core types for the cached data model.
//!
//! The remote device exposes a tree of endpoints, each carrying clusters,
//! each carrying attributes and events. Paths into that tree come in two
//! flavors: concrete paths that name exactly one node (used for cached
//! entries and report delivery) and wildcardable request paths (used when
//! asking the device for data).

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a logical sub-role within one physical device.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EndpointId(pub u16);

impl fmt::Debug for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Endpoint({})", self.0)
    }
}

/// Identifier of a cluster (a named group of attributes and events).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ClusterId(pub u32);

impl fmt::Debug for ClusterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Cluster(0x{:04x})", self.0)
    }
}

/// Identifier of a single attribute within a cluster.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AttributeId(pub u32);

impl fmt::Debug for AttributeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Attribute(0x{:04x})", self.0)
    }
}

/// Identifier of an event definition within a cluster.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EventId(pub u32);

impl fmt::Debug for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Event(0x{:04x})", self.0)
    }
}

/// Per-cluster counter bumped by the device on any server-side change.
///
/// A client that knows the current version of a cluster can ask the device
/// to skip re-sending that cluster's data.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DataVersion(pub u32);

impl fmt::Debug for DataVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DataVersion({})", self.0)
    }
}

/// Monotone sequence number assigned by the device to each emitted event.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub struct EventNumber(pub u64);

impl fmt::Debug for EventNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EventNumber({})", self.0)
    }
}

impl EventNumber {
    pub fn next(self) -> Self {
        EventNumber(self.0 + 1)
    }
}

/// How an attribute data element relates to a list-typed attribute.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ListOperation {
    /// The attribute is not a list, or the element is a whole value.
    NotList,
    /// The element replaces the entire list.
    ReplaceAll,
    /// The element is one item appended to the list (a chunk).
    AppendItem,
}

impl ListOperation {
    /// True for any list-flavored delivery (`ReplaceAll` or `AppendItem`).
    pub fn is_list_operation(self) -> bool {
        !matches!(self, ListOperation::NotList)
    }

    /// True only for per-item chunk delivery.
    pub fn is_list_item_operation(self) -> bool {
        matches!(self, ListOperation::AppendItem)
    }
}

/// Concrete path naming exactly one attribute.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ConcreteAttributePath {
    pub endpoint_id: EndpointId,
    pub cluster_id: ClusterId,
    pub attribute_id: AttributeId,
}

impl ConcreteAttributePath {
    pub fn new(endpoint: u16, cluster: u32, attribute: u32) -> Self {
        Self {
            endpoint_id: EndpointId(endpoint),
            cluster_id: ClusterId(cluster),
            attribute_id: AttributeId(attribute),
        }
    }

    /// The cluster instance this attribute lives on.
    pub fn cluster_path(&self) -> ConcreteClusterPath {
        ConcreteClusterPath {
            endpoint_id: self.endpoint_id,
            cluster_id: self.cluster_id,
        }
    }
}

impl fmt::Debug for ConcreteAttributePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/0x{:04x}/0x{:04x}",
            self.endpoint_id.0, self.cluster_id.0, self.attribute_id.0
        )
    }
}

/// Concrete attribute path as delivered inside a report: carries the list
/// operation and, when the publisher included one, the cluster data version
/// current at send time.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConcreteDataAttributePath {
    pub path: ConcreteAttributePath,
    pub list_op: ListOperation,
    pub data_version: Option<DataVersion>,
}

impl ConcreteDataAttributePath {
    pub fn new(endpoint: u16, cluster: u32, attribute: u32) -> Self {
        Self {
            path: ConcreteAttributePath::new(endpoint, cluster, attribute),
            list_op: ListOperation::NotList,
            data_version: None,
        }
    }

    pub fn with_list_op(mut self, op: ListOperation) -> Self {
        self.list_op = op;
        self
    }

    pub fn with_data_version(mut self, version: DataVersion) -> Self {
        self.data_version = Some(version);
        self
    }

    pub fn cluster_path(&self) -> ConcreteClusterPath {
        self.path.cluster_path()
    }
}

/// Concrete path naming one cluster instance.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ConcreteClusterPath {
    pub endpoint_id: EndpointId,
    pub cluster_id: ClusterId,
}

impl ConcreteClusterPath {
    pub fn new(endpoint: u16, cluster: u32) -> Self {
        Self {
            endpoint_id: EndpointId(endpoint),
            cluster_id: ClusterId(cluster),
        }
    }
}

impl fmt::Debug for ConcreteClusterPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/0x{:04x}", self.endpoint_id.0, self.cluster_id.0)
    }
}

/// Concrete path naming one event definition.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ConcreteEventPath {
    pub endpoint_id: EndpointId,
    pub cluster_id: ClusterId,
    pub event_id: EventId,
}

impl ConcreteEventPath {
    pub fn new(endpoint: u16, cluster: u32, event: u32) -> Self {
        Self {
            endpoint_id: EndpointId(endpoint),
            cluster_id: ClusterId(cluster),
            event_id: EventId(event),
        }
    }
}

impl fmt::Debug for ConcreteEventPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/0x{:04x}/ev 0x{:02x}",
            self.endpoint_id.0, self.cluster_id.0, self.event_id.0
        )
    }
}

/// Wildcardable attribute request path. `None` means "all".
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributePathParams {
    pub endpoint_id: Option<EndpointId>,
    pub cluster_id: Option<ClusterId>,
    pub attribute_id: Option<AttributeId>,
}

impl AttributePathParams {
    /// Request every attribute of one cluster instance.
    pub fn wildcard_attributes(endpoint: u16, cluster: u32) -> Self {
        Self {
            endpoint_id: Some(EndpointId(endpoint)),
            cluster_id: Some(ClusterId(cluster)),
            attribute_id: None,
        }
    }

    /// Request a single concrete attribute.
    pub fn concrete(endpoint: u16, cluster: u32, attribute: u32) -> Self {
        Self {
            endpoint_id: Some(EndpointId(endpoint)),
            cluster_id: Some(ClusterId(cluster)),
            attribute_id: Some(AttributeId(attribute)),
        }
    }

    pub fn has_wildcard_endpoint_id(&self) -> bool {
        self.endpoint_id.is_none()
    }

    pub fn has_wildcard_cluster_id(&self) -> bool {
        self.cluster_id.is_none()
    }

    pub fn has_wildcard_attribute_id(&self) -> bool {
        self.attribute_id.is_none()
    }

    /// Whether this request path covers the given cluster instance at all.
    pub fn intersects_cluster(&self, cluster: &ConcreteClusterPath) -> bool {
        self.endpoint_id.map_or(true, |e| e == cluster.endpoint_id)
            && self.cluster_id.map_or(true, |c| c == cluster.cluster_id)
    }

    /// Whether this path claims *every* attribute of the given cluster
    /// instance. Only such paths may be trusted for whole-cluster data
    /// version tracking.
    pub fn includes_all_attributes_in_cluster(&self, cluster: &ConcreteClusterPath) -> bool {
        self.has_wildcard_attribute_id() && self.intersects_cluster(cluster)
    }

    /// Whether this path matches the given concrete attribute.
    pub fn includes_attribute(&self, path: &ConcreteAttributePath) -> bool {
        self.intersects_cluster(&path.cluster_path())
            && self.attribute_id.map_or(true, |a| a == path.attribute_id)
    }
}

/// Wildcardable event request path. `None` means "all".
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventPathParams {
    pub endpoint_id: Option<EndpointId>,
    pub cluster_id: Option<ClusterId>,
    pub event_id: Option<EventId>,
}

impl EventPathParams {
    /// Match every event on the device.
    pub fn wildcard() -> Self {
        Self {
            endpoint_id: None,
            cluster_id: None,
            event_id: None,
        }
    }

    /// Match a single concrete event definition.
    pub fn concrete(endpoint: u16, cluster: u32, event: u32) -> Self {
        Self {
            endpoint_id: Some(EndpointId(endpoint)),
            cluster_id: Some(ClusterId(cluster)),
            event_id: Some(EventId(event)),
        }
    }

    pub fn includes_event(&self, path: &ConcreteEventPath) -> bool {
        self.endpoint_id.map_or(true, |e| e == path.endpoint_id)
            && self.cluster_id.map_or(true, |c| c == path.cluster_id)
            && self.event_id.map_or(true, |ev| ev == path.event_id)
    }
}

/// Protocol-level status codes a publisher may report for a path.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum StatusCode {
    Success = 0x00,
    Failure = 0x01,
    InvalidSubscription = 0x7d,
    UnsupportedAccess = 0x7e,
    UnsupportedEndpoint = 0x7f,
    InvalidAction = 0x80,
    UnsupportedAttribute = 0x86,
    ConstraintError = 0x87,
    ResourceExhausted = 0x89,
    Busy = 0x9c,
    UnsupportedCluster = 0xc3,
    UnsupportedEvent = 0x8d,
    DataVersionMismatch = 0xc5,
}

impl StatusCode {
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

/// A small structured status standing in for data on a given path.
///
/// `cluster_status` carries a cluster-specific refinement when the generic
/// code alone is not expressive enough.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    pub code: StatusCode,
    pub cluster_status: Option<u16>,
}

impl Status {
    pub fn success() -> Self {
        Self {
            code: StatusCode::Success,
            cluster_status: None,
        }
    }

    pub fn new(code: StatusCode) -> Self {
        Self {
            code,
            cluster_status: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.code == StatusCode::Success
    }
}

impl Default for Status {
    fn default() -> Self {
        Self::success()
    }
}

/// Event delivery priority, as assigned by the publisher.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventPriority {
    /// Low priority, may be dropped by the publisher under pressure.
    Debug,
    /// Normal priority.
    Info,
    /// High priority, should never be dropped.
    Critical,
}

/// Timestamp attached to an event by the publisher.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventTimestamp {
    /// Milliseconds since the publisher booted.
    System(u64),
    /// Microseconds since the Unix epoch.
    Epoch(u64),
}

/// Metadata delivered alongside each event payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventHeader {
    pub path: ConcreteEventPath,
    pub event_number: EventNumber,
    pub priority: EventPriority,
    pub timestamp: EventTimestamp,
}

impl EventHeader {
    pub fn new(path: ConcreteEventPath, event_number: u64) -> Self {
        Self {
            path,
            event_number: EventNumber(event_number),
            priority: EventPriority::Info,
            timestamp: EventTimestamp::System(0),
        }
    }

    pub fn with_priority(mut self, priority: EventPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_timestamp(mut self, timestamp: EventTimestamp) -> Self {
        self.timestamp = timestamp;
        self
    }
}
