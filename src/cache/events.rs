//! Event cache: append-only, deduplicated by event number.
//!
//! Events arrive with publisher-assigned, monotonically increasing
//! numbers. The cache keeps one record per number, ordered, and uses a
//! high-water mark to drop re-deliveries (a subscription re-establishment
//! typically replays recent history). Event *statuses* live in a separate
//! table keyed by event path with an independent lifecycle: a status for
//! an event definition says nothing about payloads already cached.

use std::collections::BTreeMap;

use tracing::{debug, trace};

use crate::element::ElementReader;
use crate::error::{CacheError, Result};
use crate::types::{
    ClusterId, ConcreteEventPath, EventHeader, EventId, EventNumber, EventPathParams, Status,
};

/// One cached event: delivery metadata plus the serialized payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventRecord {
    pub header: EventHeader,
    pub payload: Vec<u8>,
}

/// Typed decode of a cached event payload, checked against the event's
/// cluster/event identity.
pub trait DecodableEvent: Sized {
    const CLUSTER_ID: ClusterId;
    const EVENT_ID: EventId;
    /// Human-readable name used in `SchemaMismatch` errors.
    const NAME: &'static str;

    fn decode(reader: &ElementReader<'_>) -> Result<Self>;
}

/// Append-only cache of delivered events and event statuses.
#[derive(Debug, Default)]
pub struct EventCache {
    events: BTreeMap<EventNumber, EventRecord>,
    statuses: BTreeMap<ConcreteEventPath, Status>,
    highest_received: Option<EventNumber>,
    retain_data: bool,
}

impl EventCache {
    /// Cache that retains event payloads.
    pub fn new() -> Self {
        Self {
            retain_data: true,
            ..Default::default()
        }
    }

    /// Cache that tracks the high-water mark and statuses but drops
    /// payloads (size-only operation of the surrounding store).
    pub fn counting_only() -> Self {
        Self {
            retain_data: false,
            ..Default::default()
        }
    }

    /// Absorb one delivered event.
    ///
    /// A payload whose number is at or below the high-water mark is a
    /// re-delivery and is ignored entirely. A status replaces any prior
    /// status for that event's path, independent of the data cache.
    pub fn on_event_data(
        &mut self,
        header: &EventHeader,
        data: Option<&[u8]>,
        status: Option<Status>,
    ) -> Result<()> {
        if let Some(payload) = data {
            if self
                .highest_received
                .is_some_and(|highest| header.event_number <= highest)
            {
                trace!(number = header.event_number.0, "dropping re-delivered event");
                return Ok(());
            }
            if self.retain_data {
                // Reject malformed payloads before they can be cached.
                ElementReader::single(payload)?;
                self.events.insert(
                    header.event_number,
                    EventRecord {
                        header: *header,
                        payload: payload.to_vec(),
                    },
                );
            }
            self.highest_received = Some(header.event_number);
        }
        if let Some(status) = status {
            debug!(path = ?header.path, code = ?status.code, "caching event status");
            self.statuses.insert(header.path, status);
        }
        Ok(())
    }

    /// The cached event with this number.
    pub fn get(&self, number: EventNumber) -> Result<&EventRecord> {
        self.events.get(&number).ok_or(CacheError::KeyNotFound)
    }

    /// Decode the payload of the event with this number as `T`, checking
    /// that the event actually belongs to `T`'s cluster and event id.
    pub fn get_event<T: DecodableEvent>(&self, number: EventNumber) -> Result<T> {
        let record = self.get(number)?;
        if record.header.path.cluster_id != T::CLUSTER_ID
            || record.header.path.event_id != T::EVENT_ID
        {
            return Err(CacheError::SchemaMismatch { expected: T::NAME });
        }
        T::decode(&ElementReader::single(&record.payload)?)
    }

    /// The last cached status for this event path.
    pub fn get_status(&self, path: &ConcreteEventPath) -> Result<Status> {
        self.statuses
            .get(path)
            .copied()
            .ok_or(CacheError::KeyNotFound)
    }

    /// Highest event number ever observed with a payload.
    pub fn highest_received_event_number(&self) -> Option<EventNumber> {
        self.highest_received
    }

    /// Number of cached event payloads.
    pub fn event_count(&self) -> usize {
        self.events.len()
    }

    /// Visit cached events in ascending event number order, restricted to
    /// those matching `filter` and numbered at or above `min_number`.
    /// A visitor error aborts iteration and propagates.
    pub fn for_each_event<F>(
        &self,
        filter: &EventPathParams,
        min_number: Option<EventNumber>,
        mut visitor: F,
    ) -> Result<()>
    where
        F: FnMut(&EventRecord) -> Result<()>,
    {
        let start = min_number.unwrap_or(EventNumber(0));
        for record in self.events.range(start..).map(|(_, r)| r) {
            if filter.includes_event(&record.header.path) {
                visitor(record)?;
            }
        }
        Ok(())
    }

    /// Drop cached events and statuses. The high-water mark survives
    /// unless `reset_counters` is set, so freeing memory does not reopen
    /// the door to re-deliveries.
    pub fn clear(&mut self, reset_counters: bool) {
        self.events.clear();
        self.statuses.clear();
        if reset_counters {
            self.highest_received = None;
        }
    }
}
