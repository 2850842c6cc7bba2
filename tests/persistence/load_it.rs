use super::fixtures::{
    cluster7_rows, harness, peer_row, CountingLink, StaticResolver, LOCAL_NODE,
};
use clusterer::config::ClustererConfig;
use clusterer::membership::{ClusterRegistry, PeerLink, Transport};
use clusterer::persistence::{
    Column, DbValue, LoadOutcome, MemoryNodeStore, NodeRow, PersistenceSynchronizer,
};
use clusterer::util::{BadDataError, ClustererError, ErrorKind, RetryPolicy, StoreError};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

fn row_with_null_url() -> clusterer::persistence::StoreRow {
    let mut raw = peer_row(2, 7, 2).to_store_row();
    raw.values[Column::Url.position()] = DbValue::Null;
    raw
}

#[test]
fn null_url_on_first_load_leaves_registry_empty() {
    let h = harness([peer_row(1, 7, LOCAL_NODE)]);
    h.store.insert_raw(row_with_null_url());
    let err = h.sync.load().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BadData);
    assert!(matches!(
        err,
        ClustererError::BadData(BadDataError::ColumnNull { column: "url" })
    ));
    assert!(h.registry.is_empty());
    assert_eq!(h.registry.generation(), 0);
}

#[test]
fn failed_reload_keeps_previous_registry() {
    let h = harness(cluster7_rows());
    h.sync.load().unwrap();
    let generation = h.registry.generation();

    let mut bad = peer_row(3, 7, 3);
    bad.url = "udp:10.0.0.3:5059".into();
    h.store.insert(&bad);
    let err = h.sync.load().unwrap_err();
    assert!(matches!(
        err,
        ClustererError::BadData(BadDataError::TransportMismatch { node_id: 3, .. })
    ));

    assert_eq!(h.registry.generation(), generation);
    let view = h.registry.read();
    let cluster = view.lookup_cluster(7).unwrap();
    assert_eq!(cluster.peer_count(), 1);
    assert!(cluster.peer(3).is_none());
}

#[test]
fn rows_are_validated_before_anything_is_linked() {
    let cases: Vec<(NodeRow, fn(&BadDataError) -> bool)> = vec![
        (
            NodeRow::new(2, 7, 2, "smtp:10.0.0.2:25"),
            |err| matches!(err, BadDataError::UnsupportedTransport { .. }),
        ),
        (
            NodeRow::new(2, 7, 2, "bin:10.0.0.2"),
            |err| matches!(err, BadDataError::BadUrl { .. }),
        ),
        (
            NodeRow::new(2, 7, 2, "bin:10.0.0.2:0"),
            |err| matches!(err, BadDataError::BadUrl { .. }),
        ),
        (
            peer_row(9, 7, LOCAL_NODE),
            |err| matches!(err, BadDataError::DuplicateNode { node_id: 1, .. }),
        ),
    ];
    for (row, expected) in cases {
        let h = harness(cluster7_rows());
        h.store.insert(&row);
        match h.sync.load() {
            Err(ClustererError::BadData(err)) => assert!(expected(&err), "{row:?} gave {err:?}"),
            other => panic!("{row:?} gave {other:?}"),
        }
        assert!(h.registry.is_empty());
    }
}

#[test]
fn clusters_without_local_membership_are_not_fetched() {
    let h = harness([peer_row(1, 7, LOCAL_NODE), peer_row(2, 8, 2)]);
    assert!(matches!(
        h.sync.load().unwrap(),
        LoadOutcome::Loaded { clusters: 1, nodes: 1 }
    ));
    assert!(h.registry.read().lookup_cluster(8).is_none());
}

#[test]
fn host_names_go_through_the_resolver() {
    let registry = Arc::new(ClusterRegistry::new(LOCAL_NODE, Transport::Bin));
    let store = MemoryNodeStore::with_rows([
        peer_row(1, 7, LOCAL_NODE),
        NodeRow::new(2, 7, 2, "bin://peer-a.cluster.test:5059"),
    ]);
    let resolver = StaticResolver::default().with("peer-a.cluster.test", "192.0.2.10:1");
    let sync = PersistenceSynchronizer::new(
        registry.clone(),
        store.clone(),
        &ClustererConfig::for_node(LOCAL_NODE),
    )
    .with_resolver(Arc::new(resolver));
    sync.load().unwrap();
    let view = registry.read();
    assert_eq!(
        view.lookup_node(7, 2).unwrap().resolved_address(),
        Some("192.0.2.10:5059".parse().unwrap())
    );
    drop(view);

    store.insert(&NodeRow::new(3, 7, 3, "bin:peer-b.cluster.test:5059"));
    assert!(matches!(
        sync.load(),
        Err(ClustererError::BadData(BadDataError::Unresolvable { .. }))
    ));
}

#[test]
fn unavailable_store_exhausts_retries_and_keeps_registry() {
    let h = harness(cluster7_rows());
    h.sync.load().unwrap();
    h.store.set_unavailable(10);
    let err = h.sync.load().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::StoreUnavailable);
    assert!(matches!(err, ClustererError::Store(StoreError::Unavailable(_))));
    assert_eq!(h.store.reconnect_count(), 1);
    assert_eq!(h.registry.read().lookup_cluster(7).unwrap().peer_count(), 1);
}

#[test]
fn out_of_memory_during_reload_tears_the_registry_down() {
    let h = harness(cluster7_rows());
    h.sync.load().unwrap();
    let link = Arc::new(CountingLink::default());
    {
        let view = h.registry.read();
        view.lookup_node(7, 2).unwrap().link().install(link.clone() as Arc<dyn PeerLink>);
    }
    let generation = h.registry.generation();

    h.store.set_out_of_memory(1);
    let err = h.sync.load().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::OutOfMemory);
    assert!(matches!(err, ClustererError::Store(StoreError::OutOfMemory(_))));
    assert!(h.registry.is_empty());
    assert_eq!(h.registry.generation(), generation + 1);
    assert_eq!(link.closed.load(Ordering::SeqCst), 1);

    assert!(matches!(
        h.sync.load().unwrap(),
        LoadOutcome::Loaded { clusters: 1, nodes: 2 }
    ));
}

#[test]
fn wrong_table_name_is_not_retried() {
    let registry = Arc::new(ClusterRegistry::new(LOCAL_NODE, Transport::Bin));
    let mut config = ClustererConfig::for_node(LOCAL_NODE);
    config.db_table = "clusterer_v2".into();
    let store = MemoryNodeStore::with_rows(cluster7_rows());
    let sync = PersistenceSynchronizer::new(registry, store.clone(), &config)
        .with_retry(RetryPolicy::linear(5, Duration::ZERO));
    assert!(matches!(
        sync.load(),
        Err(ClustererError::Store(StoreError::UnknownTable(_)))
    ));
    assert_eq!(store.reconnect_count(), 0);
}

#[test]
fn registry_can_be_built_from_config() {
    let config =
        ClustererConfig::from_json_str(r#"{"current_id": 1, "transport": "bin"}"#).unwrap();
    let registry = Arc::new(ClusterRegistry::from_config(&config).unwrap());
    let sync = PersistenceSynchronizer::new(
        registry.clone(),
        MemoryNodeStore::with_rows(cluster7_rows()),
        &config,
    );
    assert!(sync.load().is_ok());
    assert_eq!(registry.my_node_id(), 1);
    assert!(matches!(
        ClusterRegistry::from_config(&ClustererConfig::default()),
        Err(ClustererError::Config(_))
    ));
}
