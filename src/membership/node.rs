use super::liveness::{PeerLink, ResourceSlot};
use bitflags::bitflags;
use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::ops::Deref;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

pub type ClusterId = i32;
pub type NodeId = i32;
pub type RowId = i32;

/// Immutable identity of a node record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeIdentity {
    pub row_id: RowId,
    pub node_id: NodeId,
    pub cluster_id: ClusterId,
}

bitflags! {
    /// `PROVISIONED | LOCALLY_UPDATED` means the backing store already holds
    /// the node's current local state.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct NodeFlags: u8 {
        const PROVISIONED = 1;
        const LOCALLY_UPDATED = 1 << 1;
        const STATE_ENABLED = 1 << 2;
    }
}

impl NodeFlags {
    pub fn is_synced(self) -> bool {
        self.contains(NodeFlags::PROVISIONED | NodeFlags::LOCALLY_UPDATED)
    }

    pub fn is_enabled(self) -> bool {
        self.contains(NodeFlags::STATE_ENABLED)
    }
}

/// Reachability of a peer as driven by the ping/pong protocol. Only `Up`
/// denotes a usable direct link.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkState {
    Up,
    Down,
    RestartPinging,
    Restarted,
    RetrySendFail,
    Retrying,
    Temp,
}

impl LinkState {
    pub fn is_direct(self) -> bool {
        matches!(self, LinkState::Up)
    }
}

/// Working state left behind by the last path search over this node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SearchScratch {
    pub owner: NodeId,
    pub visited: bool,
    pub depth: u32,
    pub parent: Option<NodeId>,
}

/// Monotonic counter shared by a cluster and its nodes; bumped on any
/// change that can alter routing.
#[derive(Debug, Default)]
pub(crate) struct TopologyEpoch(AtomicU64);

impl TopologyEpoch {
    pub(crate) fn current(&self) -> u64 {
        self.0.load(Ordering::Acquire)
    }

    pub(crate) fn bump(&self) -> u64 {
        self.0.fetch_add(1, Ordering::AcqRel) + 1
    }
}

/// Mutable per-node fields, guarded by the node lock.
#[derive(Debug)]
pub struct NodeState {
    flags: NodeFlags,
    link_state: LinkState,
    last_ping: Option<Instant>,
    last_pong: Option<Instant>,
    priority: i32,
    ls_seq_no: i32,
    top_seq_no: i32,
    neighbours: Vec<NodeId>,
    next_hop: Option<NodeId>,
    route_epoch: Option<u64>,
    scratch: SearchScratch,
    revision: u64,
}

impl NodeState {
    pub fn flags(&self) -> NodeFlags {
        self.flags
    }

    pub fn link_state(&self) -> LinkState {
        self.link_state
    }

    pub fn last_ping(&self) -> Option<Instant> {
        self.last_ping
    }

    pub fn last_pong(&self) -> Option<Instant> {
        self.last_pong
    }

    pub fn priority(&self) -> i32 {
        self.priority
    }

    pub fn ls_seq_no(&self) -> i32 {
        self.ls_seq_no
    }

    pub fn top_seq_no(&self) -> i32 {
        self.top_seq_no
    }

    pub fn neighbours(&self) -> &[NodeId] {
        &self.neighbours
    }

    /// Last computed hop, whether or not the topology moved since.
    pub(crate) fn cached_next_hop(&self) -> Option<NodeId> {
        self.next_hop
    }

    pub fn search_scratch(&self) -> SearchScratch {
        self.scratch
    }

    /// Bumped by every mutation that the store has not seen yet.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    fn mark_dirty(&mut self) {
        self.flags.remove(NodeFlags::LOCALLY_UPDATED);
        self.revision += 1;
    }
}

/// Exclusive access to a node's mutable fields. Routing-relevant setters
/// advance the owning cluster's topology epoch.
pub struct NodeGuard<'a> {
    state: MutexGuard<'a, NodeState>,
    topology: &'a TopologyEpoch,
}

impl NodeGuard<'_> {
    /// Next hop towards this node. `None` once the cluster topology has
    /// changed since the hop was computed, until the routes are rebuilt.
    pub fn next_hop(&self) -> Option<NodeId> {
        match self.state.route_epoch {
            Some(epoch) if epoch == self.topology.current() => self.state.next_hop,
            _ => None,
        }
    }

    pub fn set_link_state(&mut self, link_state: LinkState) -> LinkState {
        let previous = self.state.link_state;
        if previous != link_state {
            self.state.link_state = link_state;
            self.topology.bump();
        }
        previous
    }

    pub fn set_neighbours(&mut self, mut neighbours: Vec<NodeId>) {
        neighbours.sort_unstable();
        neighbours.dedup();
        if self.state.neighbours != neighbours {
            self.state.neighbours = neighbours;
            self.topology.bump();
        }
    }

    pub fn set_priority(&mut self, priority: i32) {
        if self.state.priority != priority {
            self.state.priority = priority;
            self.topology.bump();
        }
    }

    pub fn record_ping(&mut self, at: Instant) {
        self.state.last_ping = Some(at);
    }

    pub fn record_pong(&mut self, at: Instant) {
        self.state.last_pong = Some(at);
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        if self.state.flags.is_enabled() != enabled {
            self.state.flags.set(NodeFlags::STATE_ENABLED, enabled);
            self.state.mark_dirty();
        }
    }

    pub fn bump_ls_seq_no(&mut self) -> i32 {
        self.state.ls_seq_no = self.state.ls_seq_no.wrapping_add(1);
        self.state.mark_dirty();
        self.state.ls_seq_no
    }

    pub fn set_ls_seq_no(&mut self, seq_no: i32) {
        if self.state.ls_seq_no != seq_no {
            self.state.ls_seq_no = seq_no;
            self.state.mark_dirty();
        }
    }

    pub fn set_top_seq_no(&mut self, seq_no: i32) {
        if self.state.top_seq_no != seq_no {
            self.state.top_seq_no = seq_no;
            self.state.mark_dirty();
        }
    }

    /// Sets `LOCALLY_UPDATED` unless the node changed after `revision` was
    /// snapshotted.
    pub(crate) fn mark_synced(&mut self, revision: u64) -> bool {
        if self.state.revision != revision {
            return false;
        }
        self.state.flags.insert(NodeFlags::LOCALLY_UPDATED);
        true
    }

    pub(crate) fn set_route(
        &mut self,
        next_hop: Option<NodeId>,
        scratch: SearchScratch,
        epoch: u64,
    ) {
        self.state.next_hop = next_hop;
        self.state.scratch = scratch;
        self.state.route_epoch = Some(epoch);
    }
}

impl Deref for NodeGuard<'_> {
    type Target = NodeState;

    fn deref(&self) -> &NodeState {
        &self.state
    }
}

/// Field values for a node record that passed row validation.
#[derive(Debug, Clone)]
pub(crate) struct NodeSeed {
    pub identity: NodeIdentity,
    pub local: bool,
    pub url: String,
    pub description: String,
    pub sip_addr: String,
    pub resolved_address: Option<SocketAddr>,
    pub enabled: bool,
    pub priority: i32,
    pub no_ping_retries: i32,
    pub ls_seq_no: i32,
    pub top_seq_no: i32,
}

/// A cluster peer or the local node.
pub struct NodeInfo {
    identity: NodeIdentity,
    local: bool,
    url: String,
    description: String,
    sip_addr: String,
    resolved_address: Option<SocketAddr>,
    no_ping_retries: i32,
    topology: Arc<TopologyEpoch>,
    state: Mutex<NodeState>,
    link: ResourceSlot<Arc<dyn PeerLink>>,
}

impl NodeInfo {
    pub(crate) fn new(seed: NodeSeed, topology: Arc<TopologyEpoch>) -> Self {
        let mut flags = NodeFlags::PROVISIONED | NodeFlags::LOCALLY_UPDATED;
        flags.set(NodeFlags::STATE_ENABLED, seed.enabled);
        let link_state = if seed.local {
            LinkState::Up
        } else {
            LinkState::RestartPinging
        };
        Self {
            identity: seed.identity,
            local: seed.local,
            url: seed.url,
            description: seed.description,
            sip_addr: seed.sip_addr,
            resolved_address: seed.resolved_address,
            no_ping_retries: seed.no_ping_retries,
            topology,
            state: Mutex::new(NodeState {
                flags,
                link_state,
                last_ping: None,
                last_pong: None,
                priority: seed.priority,
                ls_seq_no: seed.ls_seq_no,
                top_seq_no: seed.top_seq_no,
                neighbours: Vec::new(),
                next_hop: None,
                route_epoch: None,
                scratch: SearchScratch {
                    owner: seed.identity.node_id,
                    ..SearchScratch::default()
                },
                revision: 0,
            }),
            link: ResourceSlot::empty(),
        }
    }

    pub fn identity(&self) -> NodeIdentity {
        self.identity
    }

    pub fn node_id(&self) -> NodeId {
        self.identity.node_id
    }

    pub fn cluster_id(&self) -> ClusterId {
        self.identity.cluster_id
    }

    pub fn row_id(&self) -> RowId {
        self.identity.row_id
    }

    pub fn is_local(&self) -> bool {
        self.local
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn sip_addr(&self) -> &str {
        &self.sip_addr
    }

    /// `None` for the local node, which is never resolved.
    pub fn resolved_address(&self) -> Option<SocketAddr> {
        self.resolved_address
    }

    pub fn no_ping_retries(&self) -> i32 {
        self.no_ping_retries
    }

    pub fn lock(&self) -> NodeGuard<'_> {
        NodeGuard {
            state: self.state.lock(),
            topology: &self.topology,
        }
    }

    pub fn link(&self) -> &ResourceSlot<Arc<dyn PeerLink>> {
        &self.link
    }
}

impl std::fmt::Debug for NodeInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeInfo")
            .field("identity", &self.identity)
            .field("local", &self.local)
            .field("url", &self.url)
            .field("resolved_address", &self.resolved_address)
            .finish_non_exhaustive()
    }
}
