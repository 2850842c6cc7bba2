//! Next-hop resolution and the read-only peer query surface.

mod search;

use crate::membership::subscriber::dispatch;
use crate::membership::{ClusterId, ClusterRegistry, NodeId, NodeInfo};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;

/// Detached copy of a peer's contact details; never aliases the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PeerHandle {
    pub cluster_id: ClusterId,
    pub node_id: NodeId,
    pub description: String,
    pub sip_addr: String,
    pub resolved_address: Option<SocketAddr>,
}

impl PeerHandle {
    fn from_node(node: &NodeInfo) -> Self {
        Self {
            cluster_id: node.cluster_id(),
            node_id: node.node_id(),
            description: node.description().to_string(),
            sip_addr: node.sip_addr().to_string(),
            resolved_address: node.resolved_address(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    NoSuchCluster,
    /// Unknown peer. The local node is not a routing destination either.
    NoSuchNode,
    NoPath,
    Direct(PeerHandle),
    Relay {
        via: PeerHandle,
        destination: NodeId,
    },
}

impl Route {
    pub fn next_hop(&self) -> Option<&PeerHandle> {
        match self {
            Route::Direct(peer) | Route::Relay { via: peer, .. } => Some(peer),
            _ => None,
        }
    }

    pub fn into_next_hop(self) -> Option<PeerHandle> {
        match self {
            Route::Direct(peer) | Route::Relay { via: peer, .. } => Some(peer),
            _ => None,
        }
    }
}

/// Answers path queries against a shared registry. Routes are recomputed
/// lazily, once per topology change, and reachability transitions are
/// delivered to the cluster's subscribers after the registry view is gone.
#[derive(Debug, Clone)]
pub struct RoutingResolver {
    registry: Arc<ClusterRegistry>,
}

impl RoutingResolver {
    pub fn new(registry: Arc<ClusterRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<ClusterRegistry> {
        &self.registry
    }

    pub fn my_node_id(&self) -> NodeId {
        self.registry.my_node_id()
    }

    pub fn resolve(&self, cluster_id: ClusterId, node_id: NodeId) -> Route {
        let (route, subscribers, events) = {
            let view = self.registry.read();
            let Some(cluster) = view.lookup_cluster(cluster_id) else {
                log::debug!("event=clusterer_lookup cluster_id={cluster_id} result=no_cluster");
                return Route::NoSuchCluster;
            };
            let Some(node) = cluster.peer(node_id) else {
                log::debug!(
                    "event=clusterer_lookup cluster_id={cluster_id} node_id={node_id} result=no_node"
                );
                return Route::NoSuchNode;
            };
            let events = search::ensure_routes(cluster);
            let hop = node.lock().next_hop();
            let route = match hop {
                None => Route::NoPath,
                Some(hop) if hop == node_id => Route::Direct(PeerHandle::from_node(node)),
                Some(hop) => match cluster.peer(hop) {
                    Some(relay) => Route::Relay {
                        via: PeerHandle::from_node(relay),
                        destination: node_id,
                    },
                    None => Route::NoPath,
                },
            };
            let subscribers = if events.is_empty() {
                Vec::new()
            } else {
                cluster.subscribers().to_vec()
            };
            (route, subscribers, events)
        };
        dispatch(&subscribers, &events);
        route
    }

    pub fn next_hop_for(&self, cluster_id: ClusterId, node_id: NodeId) -> Option<PeerHandle> {
        self.resolve(cluster_id, node_id).into_next_hop()
    }

    /// Every peer of `cluster_id` with a known next hop, copied under a
    /// single registry view.
    pub fn snapshot_reachable_peers(&self, cluster_id: ClusterId) -> Vec<PeerHandle> {
        let (reachable, subscribers, events) = {
            let view = self.registry.read();
            let Some(cluster) = view.lookup_cluster(cluster_id) else {
                log::debug!("event=clusterer_snapshot cluster_id={cluster_id} result=no_cluster");
                return Vec::new();
            };
            let events = search::ensure_routes(cluster);
            let reachable: Vec<PeerHandle> = cluster
                .peers()
                .iter()
                .filter(|peer| peer.lock().next_hop().is_some())
                .map(PeerHandle::from_node)
                .collect();
            let subscribers = if events.is_empty() {
                Vec::new()
            } else {
                cluster.subscribers().to_vec()
            };
            (reachable, subscribers, events)
        };
        dispatch(&subscribers, &events);
        reachable
    }
}
