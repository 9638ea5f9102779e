//! Filter planning against a cache populated through real reports.

use clustercache::element::encode_bytes;
use clustercache::{
    AttributePathParams, ClusterStateCache, ConcreteClusterPath, ConcreteDataAttributePath,
    DataVersion, FilterCandidate, FilterListBuilder, DataVersionFilterPlanner, ListOperation,
    ReportSink, Status,
};

use proptest::prelude::*;

const ENTRY_LEN: usize = 29;

fn populated_cache(clusters: &[(u32, u32, usize)]) -> (ClusterStateCache<()>, Vec<AttributePathParams>) {
    // One endpoint, one blob attribute per cluster, sized per the table.
    let request: Vec<AttributePathParams> = clusters
        .iter()
        .map(|(cluster, _, _)| AttributePathParams::wildcard_attributes(1, *cluster))
        .collect();

    let mut cache = ClusterStateCache::new(());
    let mut builder = FilterListBuilder::unbounded();
    cache
        .update_data_version_filters(&mut builder, &request)
        .unwrap();

    cache.on_report_begin();
    for (cluster, version, payload_len) in clusters {
        cache.on_attribute_data(
            &ConcreteDataAttributePath::new(1, *cluster, 0)
                .with_data_version(DataVersion(*version)),
            Some(&encode_bytes(&vec![0u8; *payload_len])),
            Status::success(),
        );
    }
    cache.on_report_end();
    (cache, request)
}

#[test]
fn filters_come_out_largest_cluster_first() {
    let (mut cache, request) =
        populated_cache(&[(0x0100, 1, 8), (0x0200, 2, 400), (0x0300, 3, 64)]);

    let mut builder = FilterListBuilder::unbounded();
    let encoded = cache
        .update_data_version_filters(&mut builder, &request)
        .unwrap();

    assert!(encoded);
    let clusters: Vec<u32> = builder.entries().iter().map(|e| e.cluster.cluster_id.0).collect();
    assert_eq!(clusters, vec![0x0200, 0x0300, 0x0100]);
    assert_eq!(builder.encoded_len(), 3 * ENTRY_LEN);
}

#[test]
fn overflow_yields_a_valid_prefix() {
    let (mut cache, request) =
        populated_cache(&[(0x0100, 1, 8), (0x0200, 2, 400), (0x0300, 3, 64)]);

    // Room for two entries, not three.
    let mut builder = FilterListBuilder::new(2 * ENTRY_LEN + 10);
    let encoded = cache
        .update_data_version_filters(&mut builder, &request)
        .unwrap();

    assert!(encoded);
    let clusters: Vec<u32> = builder.entries().iter().map(|e| e.cluster.cluster_id.0).collect();
    assert_eq!(clusters, vec![0x0200, 0x0300]);
    assert_eq!(builder.encoded_len(), 2 * ENTRY_LEN);
}

#[test]
fn narrower_request_restricts_the_filter_list() {
    let (mut cache, _) = populated_cache(&[(0x0100, 1, 8), (0x0200, 2, 400)]);

    // The next request only touches cluster 0x0100.
    let narrow = [AttributePathParams::wildcard_attributes(1, 0x0100)];
    let mut builder = FilterListBuilder::unbounded();
    let encoded = cache.update_data_version_filters(&mut builder, &narrow).unwrap();

    assert!(encoded);
    assert_eq!(builder.entries().len(), 1);
    assert_eq!(builder.entries()[0].cluster, ConcreteClusterPath::new(1, 0x0100));
}

#[test]
fn untrusted_clusters_produce_no_filters() {
    // Concrete request paths only: no wildcard coverage, so versions are
    // never committed and there is nothing to filter on.
    let request = [AttributePathParams::concrete(1, 0x0100, 0)];
    let mut cache = ClusterStateCache::new(());
    let mut builder = FilterListBuilder::unbounded();
    cache.update_data_version_filters(&mut builder, &request).unwrap();

    cache.on_report_begin();
    cache.on_attribute_data(
        &ConcreteDataAttributePath::new(1, 0x0100, 0)
            .with_list_op(ListOperation::NotList)
            .with_data_version(DataVersion(7)),
        Some(&encode_bytes(&[1, 2, 3])),
        Status::success(),
    );
    cache.on_report_end();

    let mut builder = FilterListBuilder::unbounded();
    let encoded = cache.update_data_version_filters(&mut builder, &request).unwrap();
    assert!(!encoded);
    assert!(builder.is_empty());
}

#[test]
fn path_deallocation_forgets_trust() {
    let (mut cache, request) = populated_cache(&[(0x0100, 1, 8)]);

    // Session teardown, then a report without any registered request.
    cache.on_deallocate_paths();
    cache.on_report_begin();
    cache.on_attribute_data(
        &ConcreteDataAttributePath::new(1, 0x0100, 0).with_data_version(DataVersion(2)),
        Some(&encode_bytes(&[0; 8])),
        Status::success(),
    );
    cache.on_report_end();

    // The fresh data invalidated version 1 and nothing could replace it.
    let mut builder = FilterListBuilder::unbounded();
    let encoded = cache.update_data_version_filters(&mut builder, &request).unwrap();
    assert!(!encoded);
}

proptest! {
    /// Whatever the candidates and the budget, the planned list is a
    /// prefix of the size-descending order, fits the budget, and the
    /// return flag agrees with the builder.
    #[test]
    fn prop_plan_is_a_budgeted_prefix(
        sizes in proptest::collection::vec(1usize..2000, 0..12),
        budget in 0usize..400,
    ) {
        let candidates: Vec<FilterCandidate> = sizes
            .iter()
            .enumerate()
            .map(|(i, size)| FilterCandidate {
                cluster: ConcreteClusterPath::new(1, i as u32),
                version: DataVersion(i as u32),
                size_estimate: *size,
            })
            .collect();
        let requested: Vec<AttributePathParams> = candidates
            .iter()
            .map(|c| AttributePathParams::wildcard_attributes(1, c.cluster.cluster_id.0))
            .collect();

        let planner = DataVersionFilterPlanner::new();
        let mut builder = FilterListBuilder::new(budget);
        let encoded = planner
            .plan(candidates.clone(), &requested, &mut builder)
            .unwrap();

        prop_assert_eq!(encoded, !builder.is_empty());
        prop_assert!(builder.encoded_len() <= budget);
        prop_assert_eq!(builder.encoded_len(), builder.entries().len() * ENTRY_LEN);

        // Expected: full size-descending order, truncated by the budget.
        let mut expected = candidates;
        expected.sort_by_key(|c| (std::cmp::Reverse(c.size_estimate), c.cluster));
        expected.truncate(budget / ENTRY_LEN);
        let planned: Vec<ConcreteClusterPath> =
            builder.entries().iter().map(|e| e.cluster).collect();
        let expected: Vec<ConcreteClusterPath> =
            expected.iter().map(|c| c.cluster).collect();
        let entry_count = planned.len();
        prop_assert_eq!(planned, expected);

        // The destination stays extractable no matter where encoding
        // stopped.
        prop_assert_eq!(builder.finalize().len(), entry_count * ENTRY_LEN);
    }
}
