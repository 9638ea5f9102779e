//! Callback seams between the transport, the cache layers, and the
//! application.
//!
//! The transport drives a [`ReportSink`] with already-demultiplexed report
//! events. Layers (the list-chunk reassembler, the cluster state cache)
//! also *implement* `ReportSink`, hold the next sink by value, and override
//! only the hooks they care about; everything else falls through to the
//! default no-op. The application sits at the end of the chain as a
//! [`CacheObserver`], which additionally receives change notifications
//! once a report has been fully applied.

use crate::cache::filter::FilterListBuilder;
use crate::error::{CacheError, Result};
use crate::types::{
    AttributePathParams, ConcreteAttributePath, ConcreteClusterPath, ConcreteDataAttributePath,
    EndpointId, EventHeader, Status,
};

/// Receiver for demultiplexed report traffic.
///
/// `data` arguments are single serialized elements (see [`crate::element`]);
/// implementations must copy anything they want to keep.
#[allow(unused_variables)]
pub trait ReportSink {
    /// A report is starting. Exactly one report may be open at a time.
    fn on_report_begin(&mut self) {}

    /// One attribute path was resolved to either data or a status.
    fn on_attribute_data(
        &mut self,
        path: &ConcreteDataAttributePath,
        data: Option<&[u8]>,
        status: Status,
    ) {
    }

    /// One event was delivered, as either a payload or a status.
    fn on_event_data(&mut self, header: &EventHeader, data: Option<&[u8]>, status: Option<Status>) {
    }

    /// The open report is complete and its contents are final.
    fn on_report_end(&mut self) {}

    /// The interaction failed. Any partially received report is void.
    fn on_error(&mut self, error: &CacheError) {}

    /// The interaction finished and no further callbacks will fire.
    fn on_done(&mut self) {}

    /// A subscription was accepted by the publisher.
    fn on_subscription_established(&mut self, subscription_id: u64) {}

    /// The subscription lapsed and the transport is about to re-subscribe.
    fn on_resubscription_needed(&mut self) {}

    /// The transport no longer needs the request paths it handed out.
    fn on_deallocate_paths(&mut self) {}

    /// The publisher sent a report outside any active interaction.
    fn on_unsolicited_message(&mut self) {}

    /// The transport is constructing an outbound request and offers the
    /// sink a chance to encode data version filters into `builder`.
    ///
    /// `requested_paths` is the full set of attribute paths the request
    /// will carry. Returns whether at least one filter was encoded.
    fn update_data_version_filters(
        &mut self,
        builder: &mut FilterListBuilder,
        requested_paths: &[AttributePathParams],
    ) -> Result<bool> {
        Ok(false)
    }
}

/// Application-facing observer: transparent forwarding of every transport
/// hook, plus change notifications fired from `on_report_end` after the
/// cache has finished mutating.
#[allow(unused_variables)]
pub trait CacheObserver: ReportSink {
    /// `path`'s cached value or status changed in the report just applied.
    fn on_attribute_changed(&mut self, path: &ConcreteAttributePath) {}

    /// At least one attribute of this cluster instance changed.
    fn on_cluster_changed(&mut self, cluster: &ConcreteClusterPath) {}

    /// The report introduced an endpoint the cache had never seen.
    fn on_endpoint_added(&mut self, endpoint: EndpointId) {}
}

/// Terminal sink that ignores everything.
impl ReportSink for () {}
impl CacheObserver for () {}
