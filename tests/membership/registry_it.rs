use super::fixtures::{cluster7_rows, harness, harness_with, peer_row, recording_subscriber};
use clusterer::membership::{JoinState, LinkState, NodeFlags, SubscriberRegistry};
use clusterer::persistence::LoadOutcome;
use std::net::SocketAddr;
use std::sync::Arc;

#[test]
fn two_row_cluster_loads_local_node_and_one_peer() {
    let h = harness(cluster7_rows());
    assert_eq!(
        h.sync.load().unwrap(),
        LoadOutcome::Loaded {
            clusters: 1,
            nodes: 2
        }
    );

    let view = h.registry.read();
    assert_eq!(view.len(), 1);
    let cluster = view.lookup_cluster(7).expect("cluster 7");
    assert_eq!(cluster.peer_count(), 1);
    assert_eq!(cluster.join_state(), JoinState::Init);

    let current = cluster.current_node().expect("local node");
    assert_eq!(current.node_id(), 1);
    assert!(current.is_local());
    assert!(current.resolved_address().is_none());

    let peer = view.lookup_node(7, 2).expect("peer 2");
    let expected: SocketAddr = "10.0.0.2:5059".parse().unwrap();
    assert_eq!(peer.resolved_address(), Some(expected));
    let guard = peer.lock();
    assert!(guard.flags().contains(NodeFlags::STATE_ENABLED));
    assert_eq!(guard.link_state(), LinkState::RestartPinging);
    assert!(guard.last_ping().is_none() && guard.last_pong().is_none());
}

#[test]
fn local_node_never_appears_among_peers() {
    let mut rows = cluster7_rows();
    rows.push(peer_row(3, 8, 1));
    rows.push(peer_row(4, 8, 3));
    rows.push(peer_row(5, 8, 4));
    let h = harness(rows);
    h.sync.load().unwrap();

    let view = h.registry.read();
    for cluster in view.clusters() {
        assert!(cluster.peers().iter().all(|peer| peer.node_id() != 1));
        assert_eq!(cluster.current_node().map(|node| node.node_id()), Some(1));
    }
    assert_eq!(view.lookup_cluster(8).unwrap().peer_count(), 2);
    assert_eq!(view.node_count(), 5);
}

#[test]
fn clusters_pick_up_subscribers_at_creation_only() {
    let subscribers = Arc::new(SubscriberRegistry::new());
    let (dialog, _) = recording_subscriber("dialog", [7]);
    subscribers.register(dialog);
    let h = harness_with(cluster7_rows(), subscribers.clone());
    h.sync.load().unwrap();
    assert_eq!(h.registry.read().lookup_cluster(7).unwrap().subscribers().len(), 1);

    let (usrloc, _) = recording_subscriber("usrloc", [7, 9]);
    subscribers.register(usrloc);
    assert_eq!(h.registry.read().lookup_cluster(7).unwrap().subscribers().len(), 1);

    h.sync.load().unwrap();
    let view = h.registry.read();
    let names: Vec<&str> = view
        .lookup_cluster(7)
        .unwrap()
        .subscribers()
        .iter()
        .map(|subscriber| subscriber.name())
        .collect();
    assert_eq!(names, ["dialog", "usrloc"]);
}

#[test]
fn join_state_transitions_are_reported() {
    let h = harness(cluster7_rows());
    h.sync.load().unwrap();
    let view = h.registry.read();
    let cluster = view.lookup_cluster(7).unwrap();
    assert_eq!(cluster.set_join_state(JoinState::RequestSent), JoinState::Init);
    assert_eq!(cluster.set_join_state(JoinState::Complete), JoinState::RequestSent);
    assert_eq!(cluster.join_state(), JoinState::Complete);
}

#[test]
fn enabled_flag_and_link_state_are_independent() {
    let h = harness(cluster7_rows());
    h.sync.load().unwrap();
    let view = h.registry.read();
    let peer = view.lookup_node(7, 2).unwrap();
    let mut guard = peer.lock();
    guard.set_link_state(LinkState::Up);
    guard.set_enabled(false);
    assert_eq!(guard.link_state(), LinkState::Up);
    assert!(!guard.flags().is_enabled());
    guard.set_link_state(LinkState::Down);
    guard.set_enabled(true);
    assert!(guard.flags().is_enabled());
}

#[test]
fn teardown_empties_registry_and_bumps_generation() {
    let h = harness(cluster7_rows());
    h.sync.load().unwrap();
    let generation = h.registry.generation();
    assert_eq!(h.sync.teardown().unwrap(), 1);
    assert!(h.registry.is_empty());
    assert_eq!(h.registry.generation(), generation + 1);
    assert!(h.registry.read().lookup_cluster(7).is_none());
}
