//! Reassembly of chunked list attributes.
//!
//! A publisher may split one logical list value across several wire
//! events: a `ReplaceAll` carrying the first members, then any number of
//! `AppendItem` chunks carrying one member each. This layer buffers those
//! chunks for the attribute path currently being delivered and hands the
//! next sink a single reconstructed `ReplaceAll` array, so downstream
//! consumers never observe a half-delivered list.
//!
//! The buffer is scratch: it lives between the first chunk and the
//! dispatch (triggered by a different path arriving, or by the end of the
//! report) and is discarded wholesale on an error status for the buffered
//! path or an aborted report.

use tracing::{debug, trace, warn};

use crate::cache::filter::FilterListBuilder;
use crate::element::{ElementReader, ElementType, ElementWriter, ARRAY_OVERHEAD};
use crate::error::{CacheError, Result};
use crate::report::ReportSink;
use crate::types::{
    AttributePathParams, ConcreteDataAttributePath, EventHeader, ListOperation, Status,
};

/// Default bound on one reconstructed list value.
pub const DEFAULT_MAX_LIST_SIZE: usize = 1 << 20;

/// Buffers list-append events for one attribute path at a time and
/// dispatches one reconstructed value to the wrapped sink.
pub struct ListChunkReassembler<S: ReportSink> {
    inner: S,
    /// Path whose chunks are currently buffered. Carries the most recent
    /// chunk's data version.
    buffered_path: Option<ConcreteDataAttributePath>,
    /// Encoded member elements, in delivery order.
    buffered_elements: Vec<Vec<u8>>,
    /// Running encoded size of the buffered members.
    buffered_size: usize,
    max_list_size: usize,
}

impl<S: ReportSink> ListChunkReassembler<S> {
    pub fn new(inner: S) -> Self {
        Self::with_max_list_size(inner, DEFAULT_MAX_LIST_SIZE)
    }

    /// Reassembler that refuses to buffer a list growing past
    /// `max_list_size` encoded bytes; oversized lists abort their own
    /// dispatch with [`CacheError::NoMemory`] and nothing else.
    pub fn with_max_list_size(inner: S, max_list_size: usize) -> Self {
        Self {
            inner,
            buffered_path: None,
            buffered_elements: Vec::new(),
            buffered_size: 0,
            max_list_size,
        }
    }

    /// The wrapped sink.
    pub fn inner(&self) -> &S {
        &self.inner
    }

    pub fn inner_mut(&mut self) -> &mut S {
        &mut self.inner
    }

    pub fn into_inner(self) -> S {
        self.inner
    }

    /// Whether a list is currently being buffered.
    pub fn is_buffering(&self) -> bool {
        self.buffered_path.is_some()
    }

    fn clear_buffer(&mut self) {
        self.buffered_path = None;
        self.buffered_elements.clear();
        self.buffered_size = 0;
    }

    /// Append the members of an incoming chunk to the buffer.
    ///
    /// `ReplaceAll` payloads are arrays whose members are buffered one by
    /// one; `AppendItem` payloads are a single member.
    fn buffer_chunk(&mut self, path: &ConcreteDataAttributePath, data: &[u8]) -> Result<()> {
        let reader = ElementReader::single(data)?;
        match path.list_op {
            ListOperation::ReplaceAll => {
                if reader.element_type()? != ElementType::Array {
                    return Err(CacheError::Malformed(
                        "list replacement payload is not an array".into(),
                    ));
                }
                self.clear_buffer();
                let mut members = reader.enter_container()?;
                while members.next()? {
                    self.buffer_member(members.element_bytes()?)?;
                }
            }
            ListOperation::AppendItem => {
                self.buffer_member(reader.element_bytes()?)?;
            }
            ListOperation::NotList => unreachable!("only list chunks are buffered"),
        }
        self.buffered_path = Some(*path);
        Ok(())
    }

    fn buffer_member(&mut self, encoded: &[u8]) -> Result<()> {
        if self.buffered_size + encoded.len() + ARRAY_OVERHEAD > self.max_list_size {
            return Err(CacheError::NoMemory);
        }
        self.buffered_size += encoded.len();
        self.buffered_elements.push(encoded.to_vec());
        Ok(())
    }

    /// Write the buffered members into one array and hand it downstream
    /// as a `ReplaceAll` for the buffered path.
    ///
    /// The buffer is consumed whether or not encoding succeeds; a failure
    /// here aborts only this dispatch.
    fn dispatch(&mut self) -> Result<()> {
        let Some(mut path) = self.buffered_path.take() else {
            return Ok(());
        };
        let members = std::mem::take(&mut self.buffered_elements);
        let total = self.buffered_size + ARRAY_OVERHEAD;
        self.buffered_size = 0;

        let mut writer = ElementWriter::bounded(total);
        writer.reserve(total);
        writer.start_array()?;
        for member in &members {
            writer.put_raw(member)?;
        }
        writer.end_container()?;
        let value = writer.finalize();

        debug!(?path, members = members.len(), bytes = value.len(), "dispatching reassembled list");
        path.list_op = ListOperation::ReplaceAll;
        self.inner
            .on_attribute_data(&path, Some(&value), Status::success());
        Ok(())
    }

    fn dispatch_or_report(&mut self) {
        if let Err(error) = self.dispatch() {
            warn!(%error, "list reassembly dispatch failed");
            self.inner.on_error(&error);
        }
    }

    /// Flush the buffer before handling a new path `incoming`.
    fn pre_dispatch(&mut self, incoming: &ConcreteDataAttributePath, status: Status) {
        let Some(buffered) = self.buffered_path else {
            return;
        };
        if buffered.path == incoming.path {
            if !status.is_success() {
                // A later chunk failed: drop the partial list and let the
                // status flow through on its own.
                debug!(path = ?incoming.path, code = ?status.code, "discarding buffered list on error status");
                self.clear_buffer();
            }
            // Same path continuing (or a fresh ReplaceAll, which resets the
            // buffer itself): nothing to dispatch yet.
            return;
        }
        self.dispatch_or_report();
    }
}

impl<S: ReportSink> ReportSink for ListChunkReassembler<S> {
    fn on_report_begin(&mut self) {
        debug_assert!(!self.is_buffering(), "report opened with stale list buffer");
        self.clear_buffer();
        self.inner.on_report_begin();
    }

    fn on_attribute_data(
        &mut self,
        path: &ConcreteDataAttributePath,
        data: Option<&[u8]>,
        status: Status,
    ) {
        self.pre_dispatch(path, status);

        match data {
            Some(payload) if path.list_op.is_list_operation() => {
                trace!(?path, bytes = payload.len(), "buffering list chunk");
                if let Err(error) = self.buffer_chunk(path, payload) {
                    warn!(%error, path = ?path.path, "failed to buffer list chunk");
                    self.clear_buffer();
                    self.inner.on_error(&error);
                }
            }
            _ => {
                // Non-list data and bare statuses pass straight through.
                // Downstream never sees per-item labeling: a status for a
                // list chunk stands for the whole list.
                if path.list_op.is_list_item_operation() {
                    let whole = path.with_list_op(ListOperation::ReplaceAll);
                    self.inner.on_attribute_data(&whole, data, status);
                } else {
                    self.inner.on_attribute_data(path, data, status);
                }
            }
        }
    }

    fn on_event_data(&mut self, header: &EventHeader, data: Option<&[u8]>, status: Option<Status>) {
        self.inner.on_event_data(header, data, status);
    }

    fn on_report_end(&mut self) {
        self.dispatch_or_report();
        self.inner.on_report_end();
    }

    fn on_error(&mut self, error: &CacheError) {
        // Aborted interaction: whatever was buffered will never complete.
        self.clear_buffer();
        self.inner.on_error(error);
    }

    fn on_done(&mut self) {
        self.clear_buffer();
        self.inner.on_done();
    }

    fn on_subscription_established(&mut self, subscription_id: u64) {
        self.inner.on_subscription_established(subscription_id);
    }

    fn on_resubscription_needed(&mut self) {
        self.inner.on_resubscription_needed();
    }

    fn on_deallocate_paths(&mut self) {
        self.inner.on_deallocate_paths();
    }

    fn on_unsolicited_message(&mut self) {
        self.inner.on_unsolicited_message();
    }

    fn update_data_version_filters(
        &mut self,
        builder: &mut FilterListBuilder,
        requested_paths: &[AttributePathParams],
    ) -> Result<bool> {
        self.inner
            .update_data_version_filters(builder, requested_paths)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::{encode_u64, encode_u64_array, ElementReader, ElementType};

    /// Records every downstream delivery for inspection.
    #[derive(Default)]
    struct Recorder {
        attributes: Vec<(ConcreteDataAttributePath, Option<Vec<u8>>, Status)>,
        errors: Vec<CacheError>,
        report_ends: usize,
    }

    impl ReportSink for Recorder {
        fn on_attribute_data(
            &mut self,
            path: &ConcreteDataAttributePath,
            data: Option<&[u8]>,
            status: Status,
        ) {
            self.attributes
                .push((*path, data.map(<[u8]>::to_vec), status));
        }

        fn on_report_end(&mut self) {
            self.report_ends += 1;
        }

        fn on_error(&mut self, error: &CacheError) {
            self.errors.push(error.clone());
        }
    }

    fn list_members(encoded: &[u8]) -> Vec<u64> {
        let reader = ElementReader::single(encoded).unwrap();
        assert_eq!(reader.element_type().unwrap(), ElementType::Array);
        let mut inner = reader.enter_container().unwrap();
        let mut out = Vec::new();
        while inner.next().unwrap() {
            out.push(inner.u64_value().unwrap());
        }
        out
    }

    fn replace_path(attribute: u32) -> ConcreteDataAttributePath {
        ConcreteDataAttributePath::new(1, 0x0300, attribute)
            .with_list_op(ListOperation::ReplaceAll)
    }

    fn append_path(attribute: u32) -> ConcreteDataAttributePath {
        ConcreteDataAttributePath::new(1, 0x0300, attribute)
            .with_list_op(ListOperation::AppendItem)
    }

    #[test]
    fn test_replace_then_appends_dispatch_once() {
        let mut layer = ListChunkReassembler::new(Recorder::default());
        layer.on_report_begin();
        layer.on_attribute_data(&replace_path(5), Some(&encode_u64_array(&[0, 1])), Status::success());
        layer.on_attribute_data(&append_path(5), Some(&encode_u64(2)), Status::success());
        layer.on_attribute_data(&append_path(5), Some(&encode_u64(3)), Status::success());
        layer.on_report_end();

        let inner = layer.inner();
        assert_eq!(inner.attributes.len(), 1);
        let (path, data, status) = &inner.attributes[0];
        assert_eq!(path.list_op, ListOperation::ReplaceAll);
        assert!(status.is_success());
        assert_eq!(list_members(data.as_deref().unwrap()), vec![0, 1, 2, 3]);
        assert_eq!(inner.report_ends, 1);
    }

    #[test]
    fn test_path_change_forces_dispatch() {
        let mut layer = ListChunkReassembler::new(Recorder::default());
        layer.on_report_begin();
        layer.on_attribute_data(&replace_path(5), Some(&encode_u64_array(&[7])), Status::success());
        // A different attribute interrupts the list.
        let other = ConcreteDataAttributePath::new(1, 0x0300, 6);
        layer.on_attribute_data(&other, Some(&encode_u64(99)), Status::success());
        layer.on_report_end();

        let inner = layer.inner();
        assert_eq!(inner.attributes.len(), 2);
        assert_eq!(inner.attributes[0].0.path.attribute_id.0, 5);
        assert_eq!(list_members(inner.attributes[0].1.as_deref().unwrap()), vec![7]);
        assert_eq!(inner.attributes[1].0.path.attribute_id.0, 6);
    }

    #[test]
    fn test_fresh_replace_discards_buffered_chunks() {
        let mut layer = ListChunkReassembler::new(Recorder::default());
        layer.on_report_begin();
        layer.on_attribute_data(&replace_path(5), Some(&encode_u64_array(&[1, 2])), Status::success());
        // The publisher starts the same list over with an empty array.
        layer.on_attribute_data(&replace_path(5), Some(&encode_u64_array(&[])), Status::success());
        layer.on_report_end();

        let inner = layer.inner();
        assert_eq!(inner.attributes.len(), 1);
        assert!(list_members(inner.attributes[0].1.as_deref().unwrap()).is_empty());
    }

    #[test]
    fn test_error_status_discards_without_dispatch() {
        let mut layer = ListChunkReassembler::new(Recorder::default());
        layer.on_report_begin();
        layer.on_attribute_data(&replace_path(5), Some(&encode_u64_array(&[1, 2])), Status::success());
        let failed = append_path(5);
        layer.on_attribute_data(&failed, None, Status::new(crate::types::StatusCode::Failure));
        layer.on_report_end();

        let inner = layer.inner();
        // Only the status arrived downstream; no stale list data.
        assert_eq!(inner.attributes.len(), 1);
        let (path, data, status) = &inner.attributes[0];
        assert!(data.is_none());
        assert!(!status.is_success());
        // Per-item labeling never escapes this layer.
        assert!(!path.list_op.is_list_item_operation());
    }

    #[test]
    fn test_appends_without_replace_form_a_list() {
        let mut layer = ListChunkReassembler::new(Recorder::default());
        layer.on_report_begin();
        layer.on_attribute_data(&append_path(5), Some(&encode_u64(10)), Status::success());
        layer.on_attribute_data(&append_path(5), Some(&encode_u64(11)), Status::success());
        layer.on_report_end();

        let inner = layer.inner();
        assert_eq!(inner.attributes.len(), 1);
        assert_eq!(list_members(inner.attributes[0].1.as_deref().unwrap()), vec![10, 11]);
    }

    #[test]
    fn test_oversized_list_surfaces_no_memory() {
        let mut layer = ListChunkReassembler::with_max_list_size(Recorder::default(), 16);
        layer.on_report_begin();
        layer.on_attribute_data(&replace_path(5), Some(&encode_u64_array(&[1, 2, 3])), Status::success());
        layer.on_report_end();

        let inner = layer.inner();
        assert!(inner.attributes.is_empty());
        assert_eq!(inner.errors, vec![CacheError::NoMemory]);
        // The report end itself still reaches downstream.
        assert_eq!(inner.report_ends, 1);
    }

    #[test]
    fn test_malformed_replace_payload_is_local() {
        let mut layer = ListChunkReassembler::new(Recorder::default());
        layer.on_report_begin();
        // ReplaceAll must carry an array.
        layer.on_attribute_data(&replace_path(5), Some(&encode_u64(1)), Status::success());
        let other = ConcreteDataAttributePath::new(1, 0x0300, 6);
        layer.on_attribute_data(&other, Some(&encode_u64(2)), Status::success());
        layer.on_report_end();

        let inner = layer.inner();
        assert_eq!(inner.errors.len(), 1);
        assert!(matches!(inner.errors[0], CacheError::Malformed(_)));
        // The following attribute is unaffected.
        assert_eq!(inner.attributes.len(), 1);
        assert_eq!(inner.attributes[0].0.path.attribute_id.0, 6);
    }

    #[test]
    fn test_abort_discards_buffer() {
        let mut layer = ListChunkReassembler::new(Recorder::default());
        layer.on_report_begin();
        layer.on_attribute_data(&replace_path(5), Some(&encode_u64_array(&[1])), Status::success());
        assert!(layer.is_buffering());
        layer.on_error(&CacheError::UnexpectedEnd);
        assert!(!layer.is_buffering());
        assert_eq!(layer.inner().attributes.len(), 0);
    }

    #[test]
    fn test_non_list_passthrough_keeps_order() {
        let mut layer = ListChunkReassembler::new(Recorder::default());
        layer.on_report_begin();
        let a = ConcreteDataAttributePath::new(1, 2, 3);
        let b = ConcreteDataAttributePath::new(1, 2, 4);
        layer.on_attribute_data(&a, Some(&encode_u64(1)), Status::success());
        layer.on_attribute_data(&b, Some(&encode_u64(2)), Status::success());
        layer.on_report_end();

        let inner = layer.inner();
        assert_eq!(inner.attributes.len(), 2);
        assert_eq!(inner.attributes[0].0, a);
        assert_eq!(inner.attributes[1].0, b);
    }
}
