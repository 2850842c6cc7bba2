//! Next-hop computation over one cluster's peer graph.
//!
//! Breadth-first search rooted at the local node. Peers whose link is `Up`
//! seed the search and are their own first hop; every other peer is reached
//! through the neighbour lists of already reached peers and inherits the
//! first hop of the peer that relayed it. Candidates at each expansion are
//! taken in `(priority, node_id)` order, lower values first.

use crate::membership::{ClusterEvent, ClusterInfo, NodeId, SearchScratch};
use std::collections::VecDeque;

struct PeerSnapshot {
    node_id: NodeId,
    priority: i32,
    direct: bool,
    neighbours: Vec<NodeId>,
}

/// Recomputes the cached next hop if the cluster topology changed since the
/// last computation. Takes the cluster lock, then each node lock in turn.
pub(crate) fn ensure_routes(cluster: &ClusterInfo) -> Vec<ClusterEvent> {
    let mut state = cluster.lock_state();
    let epoch = cluster.topology_epoch();
    if state.routed_epoch == Some(epoch) {
        return Vec::new();
    }
    let events = recompute(cluster, epoch);
    state.routed_epoch = Some(epoch);
    log::debug!(
        "event=clusterer_route cluster_id={} epoch={} transitions={}",
        cluster.cluster_id(),
        epoch,
        events.len()
    );
    events
}

/// Runs the search and stores each peer's next hop and scratch state,
/// stamped with `epoch`. Returns one event per peer whose reachability
/// flipped.
pub(crate) fn recompute(cluster: &ClusterInfo, epoch: u64) -> Vec<ClusterEvent> {
    let local_id = cluster.current_node().map(|node| node.node_id());
    let peers = cluster.peers();
    let snapshots: Vec<PeerSnapshot> = peers
        .iter()
        .map(|peer| {
            let guard = peer.lock();
            PeerSnapshot {
                node_id: peer.node_id(),
                priority: guard.priority(),
                direct: guard.link_state().is_direct(),
                neighbours: guard.neighbours().to_vec(),
            }
        })
        .collect();
    let order = |idx: &usize| (snapshots[*idx].priority, snapshots[*idx].node_id);

    let mut scratch: Vec<SearchScratch> = snapshots
        .iter()
        .map(|peer| SearchScratch {
            owner: peer.node_id,
            ..SearchScratch::default()
        })
        .collect();
    let mut first_hop: Vec<Option<NodeId>> = vec![None; peers.len()];
    let mut queue = VecDeque::with_capacity(peers.len());

    let mut seeds: Vec<usize> = (0..peers.len()).filter(|idx| snapshots[*idx].direct).collect();
    seeds.sort_by_key(order);
    for idx in seeds {
        scratch[idx].visited = true;
        scratch[idx].depth = 1;
        first_hop[idx] = Some(snapshots[idx].node_id);
        queue.push_back(idx);
    }

    while let Some(idx) = queue.pop_front() {
        let mut candidates: Vec<usize> = snapshots[idx]
            .neighbours
            .iter()
            .filter(|id| Some(**id) != local_id)
            .filter_map(|id| cluster.peer_position(*id))
            .filter(|pos| !scratch[*pos].visited)
            .collect();
        candidates.sort_by_key(order);
        for pos in candidates {
            if scratch[pos].visited {
                continue;
            }
            scratch[pos].visited = true;
            scratch[pos].depth = scratch[idx].depth + 1;
            scratch[pos].parent = Some(snapshots[idx].node_id);
            first_hop[pos] = first_hop[idx];
            queue.push_back(pos);
        }
    }

    let mut events = Vec::new();
    for (idx, peer) in peers.iter().enumerate() {
        let mut guard = peer.lock();
        let was_reachable = guard.cached_next_hop().is_some();
        guard.set_route(first_hop[idx], scratch[idx], epoch);
        drop(guard);
        let event = match (was_reachable, first_hop[idx].is_some()) {
            (false, true) => ClusterEvent::NodeReachable {
                cluster_id: cluster.cluster_id(),
                node_id: peer.node_id(),
            },
            (true, false) => ClusterEvent::NodeUnreachable {
                cluster_id: cluster.cluster_id(),
                node_id: peer.node_id(),
            },
            _ => continue,
        };
        log::info!(
            "event=clusterer_reachability cluster_id={} node_id={} reachable={}",
            cluster.cluster_id(),
            peer.node_id(),
            first_hop[idx].is_some()
        );
        events.push(event);
    }
    events
}
