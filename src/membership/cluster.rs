use super::node::{ClusterId, NodeId, NodeInfo, TopologyEpoch};
use super::subscriber::ClusterSubscriber;
use crate::util::{BadDataError, ClustererError};
use parking_lot::{Mutex, MutexGuard};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinState {
    Init,
    RequestSent,
    Complete,
}

/// Cluster-level fields guarded by the cluster lock.
#[derive(Debug)]
pub(crate) struct ClusterState {
    pub join_state: JoinState,
    /// Topology epoch the cached next hops were computed against.
    pub routed_epoch: Option<u64>,
}

/// A cluster the local node participates in.
pub struct ClusterInfo {
    cluster_id: ClusterId,
    peers: Vec<NodeInfo>,
    peer_index: HashMap<NodeId, usize>,
    current_node: Option<NodeInfo>,
    subscribers: Vec<Arc<dyn ClusterSubscriber>>,
    topology: Arc<TopologyEpoch>,
    state: Mutex<ClusterState>,
}

impl ClusterInfo {
    pub(crate) fn new(cluster_id: ClusterId, subscribers: Vec<Arc<dyn ClusterSubscriber>>) -> Self {
        Self {
            cluster_id,
            peers: Vec::new(),
            peer_index: HashMap::new(),
            current_node: None,
            subscribers,
            topology: Arc::new(TopologyEpoch::default()),
            state: Mutex::new(ClusterState {
                join_state: JoinState::Init,
                routed_epoch: None,
            }),
        }
    }

    pub fn cluster_id(&self) -> ClusterId {
        self.cluster_id
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    pub fn peers(&self) -> &[NodeInfo] {
        &self.peers
    }

    pub fn peer(&self, node_id: NodeId) -> Option<&NodeInfo> {
        self.peer_index.get(&node_id).map(|idx| &self.peers[*idx])
    }

    pub(crate) fn peer_position(&self, node_id: NodeId) -> Option<usize> {
        self.peer_index.get(&node_id).copied()
    }

    pub fn current_node(&self) -> Option<&NodeInfo> {
        self.current_node.as_ref()
    }

    /// Looks up a peer or the local node.
    pub fn node(&self, node_id: NodeId) -> Option<&NodeInfo> {
        match &self.current_node {
            Some(current) if current.node_id() == node_id => Some(current),
            _ => self.peer(node_id),
        }
    }

    pub fn subscribers(&self) -> &[Arc<dyn ClusterSubscriber>] {
        &self.subscribers
    }

    pub fn join_state(&self) -> JoinState {
        self.state.lock().join_state
    }

    pub fn set_join_state(&self, join_state: JoinState) -> JoinState {
        let mut state = self.state.lock();
        std::mem::replace(&mut state.join_state, join_state)
    }

    pub fn topology_epoch(&self) -> u64 {
        self.topology.current()
    }

    pub(crate) fn topology(&self) -> &Arc<TopologyEpoch> {
        &self.topology
    }

    pub(crate) fn lock_state(&self) -> MutexGuard<'_, ClusterState> {
        self.state.lock()
    }

    pub(crate) fn insert_peer(&mut self, node: NodeInfo) -> Result<&NodeInfo, ClustererError> {
        let node_id = node.node_id();
        self.ensure_unique(node_id)?;
        self.peers
            .try_reserve(1)
            .map_err(|_| ClustererError::oom("growing the peer list"))?;
        self.peer_index
            .try_reserve(1)
            .map_err(|_| ClustererError::oom("growing the peer index"))?;
        let idx = self.peers.len();
        self.peers.push(node);
        self.peer_index.insert(node_id, idx);
        self.topology.bump();
        Ok(&self.peers[idx])
    }

    pub(crate) fn install_current(&mut self, node: NodeInfo) -> Result<&NodeInfo, ClustererError> {
        self.ensure_unique(node.node_id())?;
        Ok(self.current_node.insert(node))
    }

    fn ensure_unique(&self, node_id: NodeId) -> Result<(), BadDataError> {
        if self.node(node_id).is_some() {
            return Err(BadDataError::DuplicateNode {
                cluster_id: self.cluster_id,
                node_id,
            });
        }
        Ok(())
    }

    /// Destroys every link resource held by this cluster's nodes.
    pub(crate) fn retire_links(&self) -> usize {
        self.current_node
            .iter()
            .chain(self.peers.iter())
            .filter(|node| node.link().destroy())
            .count()
    }
}

impl fmt::Debug for ClusterInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClusterInfo")
            .field("cluster_id", &self.cluster_id)
            .field("peer_count", &self.peers.len())
            .field("current_node", &self.current_node.as_ref().map(|n| n.node_id()))
            .field("subscribers", &self.subscribers.len())
            .finish()
    }
}
