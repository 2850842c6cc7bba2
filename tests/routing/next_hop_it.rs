use super::fixtures::{cluster7_rows, harness, peer_row, Harness, LOCAL_NODE};
use clusterer::membership::{LinkState, NodeId};
use clusterer::routing::{Route, RoutingResolver};

fn mesh() -> Harness {
    let mut rows = cluster7_rows();
    for node_id in 3..=5 {
        rows.push(peer_row(node_id, 7, node_id));
    }
    let h = harness(rows);
    h.sync.load().unwrap();
    h
}

fn set_link(h: &Harness, node_id: NodeId, state: LinkState, neighbours: &[NodeId]) {
    let view = h.registry.read();
    let mut guard = view.lookup_node(7, node_id).unwrap().lock();
    guard.set_link_state(state);
    guard.set_neighbours(neighbours.to_vec());
}

#[test]
fn unknown_cluster_or_node_is_absent() {
    let h = mesh();
    let resolver = RoutingResolver::new(h.registry.clone());
    assert_eq!(resolver.my_node_id(), LOCAL_NODE);
    assert!(resolver.next_hop_for(99, 2).is_none());
    assert!(resolver.next_hop_for(7, 99).is_none());
    assert!(resolver.next_hop_for(7, LOCAL_NODE).is_none());
    assert!(resolver.snapshot_reachable_peers(99).is_empty());
}

#[test]
fn freshly_loaded_peers_are_unreachable() {
    let h = mesh();
    let resolver = RoutingResolver::new(h.registry.clone());
    assert_eq!(resolver.resolve(7, 2), Route::NoPath);
    assert!(resolver.snapshot_reachable_peers(7).is_empty());
}

#[test]
fn snapshot_lists_only_routable_peers() {
    let h = mesh();
    set_link(&h, 2, LinkState::Up, &[3]);
    set_link(&h, 4, LinkState::Up, &[]);
    let resolver = RoutingResolver::new(h.registry.clone());

    let mut reachable: Vec<NodeId> = resolver
        .snapshot_reachable_peers(7)
        .into_iter()
        .map(|peer| peer.node_id)
        .collect();
    reachable.sort_unstable();
    assert_eq!(reachable, [2, 3, 4]);

    let peer_count = h.registry.read().lookup_cluster(7).unwrap().peer_count();
    assert!(reachable.len() <= peer_count);
    assert!(resolver.next_hop_for(7, 5).is_none());
}

#[test]
fn relayed_destination_reports_the_relay() {
    let h = mesh();
    set_link(&h, 2, LinkState::Up, &[5]);
    set_link(&h, 5, LinkState::RetrySendFail, &[2]);
    let resolver = RoutingResolver::new(h.registry.clone());
    match resolver.resolve(7, 5) {
        Route::Relay { via, destination } => {
            assert_eq!(via.node_id, 2);
            assert_eq!(destination, 5);
            assert_eq!(via.resolved_address, Some("10.0.0.2:5059".parse().unwrap()));
        }
        other => panic!("expected relay, got {other:?}"),
    }
}

#[test]
fn equal_depth_relays_are_ordered_by_priority_then_id() {
    let h = mesh();
    set_link(&h, 2, LinkState::Up, &[5]);
    set_link(&h, 3, LinkState::Up, &[5]);
    let resolver = RoutingResolver::new(h.registry.clone());
    assert_eq!(resolver.next_hop_for(7, 5).unwrap().node_id, 2);

    {
        let view = h.registry.read();
        view.lookup_node(7, 2).unwrap().lock().set_priority(90);
    }
    assert_eq!(resolver.next_hop_for(7, 5).unwrap().node_id, 3);
}

#[test]
fn peer_handles_outlive_the_registry() {
    let h = mesh();
    set_link(&h, 2, LinkState::Up, &[]);
    let resolver = RoutingResolver::new(h.registry.clone());
    let handle = resolver.next_hop_for(7, 2).unwrap();
    h.registry.teardown().unwrap();
    assert_eq!(handle.node_id, 2);
    assert_eq!(handle.cluster_id, 7);
    assert!(resolver.next_hop_for(7, 2).is_none());
}

#[test]
fn reload_drops_cached_routes() {
    let h = mesh();
    set_link(&h, 2, LinkState::Up, &[]);
    let resolver = RoutingResolver::new(h.registry.clone());
    assert!(resolver.next_hop_for(7, 2).is_some());
    h.sync.load().unwrap();
    assert!(resolver.next_hop_for(7, 2).is_none());
}

#[test]
fn relay_going_down_hides_the_cached_hop() {
    let h = mesh();
    set_link(&h, 2, LinkState::Up, &[3]);
    let resolver = RoutingResolver::new(h.registry.clone());
    assert_eq!(resolver.next_hop_for(7, 3).unwrap().node_id, 2);

    set_link(&h, 2, LinkState::Down, &[3]);
    {
        let view = h.registry.read();
        assert_eq!(view.lookup_node(7, 3).unwrap().lock().next_hop(), None);
        assert_eq!(view.lookup_node(7, 2).unwrap().lock().next_hop(), None);
    }
    assert!(resolver.next_hop_for(7, 3).is_none());
}
