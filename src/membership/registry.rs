use super::address::{HostResolver, NodeUrl, Transport};
use super::cluster::ClusterInfo;
use super::node::{ClusterId, NodeId, NodeIdentity, NodeInfo, NodeSeed};
use super::subscriber::SubscriberRegistry;
use crate::config::ClustererConfig;
use crate::persistence::NodeRow;
use crate::util::{BadDataError, ClustererError};
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::cell::RefCell;
use std::net::SocketAddr;
use std::ops::Deref;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_REGISTRY_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    /// Ids of the registries this thread holds views on, one entry per view.
    static VIEWS_HELD: RefCell<Vec<u64>> = const { RefCell::new(Vec::new()) };
}

fn holds_view(registry_id: u64) -> bool {
    VIEWS_HELD.with(|held| held.borrow().contains(&registry_id))
}

/// Inputs `add_node` needs beyond the row itself.
#[derive(Clone, Copy)]
pub struct NodeContext<'a> {
    pub local_node_id: NodeId,
    pub transport: Transport,
    pub resolver: &'a dyn HostResolver,
    pub subscribers: &'a SubscriberRegistry,
}

/// Cluster records in discovery order. Cluster counts are small, so lookups
/// scan linearly.
#[derive(Debug, Default)]
pub struct ClusterTable {
    clusters: Vec<ClusterInfo>,
}

impl ClusterTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.clusters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clusters.is_empty()
    }

    pub fn clusters(&self) -> &[ClusterInfo] {
        &self.clusters
    }

    pub fn lookup_cluster(&self, cluster_id: ClusterId) -> Option<&ClusterInfo> {
        self.clusters
            .iter()
            .find(|cluster| cluster.cluster_id() == cluster_id)
    }

    /// Peer lookup; the local node is reachable through
    /// [`ClusterInfo::current_node`] instead.
    pub fn lookup_node(&self, cluster_id: ClusterId, node_id: NodeId) -> Option<&NodeInfo> {
        self.lookup_cluster(cluster_id)?.peer(node_id)
    }

    /// Peers plus local nodes across every cluster.
    pub fn node_count(&self) -> usize {
        self.clusters
            .iter()
            .map(|cluster| cluster.peer_count() + usize::from(cluster.current_node().is_some()))
            .sum()
    }

    /// Returns the existing record for `cluster_id` or appends a new one
    /// carrying every subscriber interested in it.
    pub fn upsert_cluster(
        &mut self,
        cluster_id: ClusterId,
        subscribers: &SubscriberRegistry,
    ) -> Result<&mut ClusterInfo, ClustererError> {
        if let Some(pos) = self
            .clusters
            .iter()
            .position(|cluster| cluster.cluster_id() == cluster_id)
        {
            return Ok(&mut self.clusters[pos]);
        }
        self.clusters
            .try_reserve(1)
            .map_err(|_| ClustererError::oom("allocating a cluster record"))?;
        let idx = self.clusters.len();
        self.clusters.push(new_cluster(cluster_id, subscribers));
        Ok(&mut self.clusters[idx])
    }

    /// Validates `row` and links a node built from it into its cluster,
    /// either as a peer or as the cluster's local node. Nothing is linked
    /// and no cluster is created when an error is returned.
    pub fn add_node(
        &mut self,
        row: &NodeRow,
        ctx: &NodeContext<'_>,
    ) -> Result<NodeIdentity, ClustererError> {
        let local = row.node_id == ctx.local_node_id;
        if row.url.is_empty() {
            return Err(BadDataError::MissingUrl {
                node_id: row.node_id,
            }
            .into());
        }
        let resolved_address = if local {
            None
        } else {
            Some(resolve_peer(row, ctx)?)
        };
        let seed = NodeSeed {
            identity: NodeIdentity {
                row_id: row.id,
                node_id: row.node_id,
                cluster_id: row.cluster_id,
            },
            local,
            url: copy_text(&row.url)?,
            description: copy_text(row.description.as_deref().unwrap_or_default())?,
            sip_addr: copy_text(row.sip_addr.as_deref().unwrap_or_default())?,
            resolved_address,
            enabled: row.is_enabled(),
            priority: row.priority,
            no_ping_retries: row.no_ping_retries,
            ls_seq_no: row.ls_seq_no,
            top_seq_no: row.top_seq_no,
        };
        let identity = seed.identity;
        let address = seed.resolved_address;
        self.link_into_cluster(seed, ctx.subscribers, link_node)?;
        log::debug!(
            "event=clusterer_add_node cluster_id={} node_id={} row_id={} local={} address={:?}",
            identity.cluster_id,
            identity.node_id,
            identity.row_id,
            local,
            address
        );
        Ok(identity)
    }

    /// Links a node into its cluster. A cluster that does not exist yet is
    /// built aside and appended only once the node is in it, so a failed
    /// link never leaves an empty record behind.
    fn link_into_cluster<F>(
        &mut self,
        seed: NodeSeed,
        subscribers: &SubscriberRegistry,
        link: F,
    ) -> Result<(), ClustererError>
    where
        F: FnOnce(&mut ClusterInfo, NodeInfo, bool) -> Result<(), ClustererError>,
    {
        let cluster_id = seed.identity.cluster_id;
        let local = seed.local;
        if let Some(cluster) = self
            .clusters
            .iter_mut()
            .find(|cluster| cluster.cluster_id() == cluster_id)
        {
            let node = NodeInfo::new(seed, cluster.topology().clone());
            return link(cluster, node, local);
        }
        self.clusters
            .try_reserve(1)
            .map_err(|_| ClustererError::oom("allocating a cluster record"))?;
        let mut cluster = new_cluster(cluster_id, subscribers);
        let node = NodeInfo::new(seed, cluster.topology().clone());
        link(&mut cluster, node, local)?;
        self.clusters.push(cluster);
        Ok(())
    }

    /// Every cluster must contain the local node's own row.
    pub fn verify_local_nodes(&self, local_node_id: NodeId) -> Result<(), BadDataError> {
        match self
            .clusters
            .iter()
            .find(|cluster| cluster.current_node().is_none())
        {
            Some(cluster) => Err(BadDataError::MissingLocalNode {
                cluster_id: cluster.cluster_id(),
                node_id: local_node_id,
            }),
            None => Ok(()),
        }
    }

    pub(crate) fn retire_links(&self) -> usize {
        self.clusters.iter().map(ClusterInfo::retire_links).sum()
    }
}

fn new_cluster(cluster_id: ClusterId, subscribers: &SubscriberRegistry) -> ClusterInfo {
    let interested = subscribers.interested_in(cluster_id);
    log::debug!(
        "event=clusterer_add_cluster cluster_id={} subscribers={}",
        cluster_id,
        interested.len()
    );
    ClusterInfo::new(cluster_id, interested)
}

fn link_node(
    cluster: &mut ClusterInfo,
    node: NodeInfo,
    local: bool,
) -> Result<(), ClustererError> {
    if local {
        cluster.install_current(node)?;
    } else {
        cluster.insert_peer(node)?;
    }
    Ok(())
}

fn resolve_peer(row: &NodeRow, ctx: &NodeContext<'_>) -> Result<SocketAddr, BadDataError> {
    let url = NodeUrl::parse(&row.url)?;
    let transport = url.transport.unwrap_or(ctx.transport);
    if transport != ctx.transport {
        return Err(BadDataError::TransportMismatch {
            node_id: row.node_id,
            expected: ctx.transport.to_string(),
            found: transport.to_string(),
        });
    }
    ctx.resolver
        .resolve(&url.host, url.port)
        .map_err(|err| BadDataError::Unresolvable {
            host: url.host.clone(),
            reason: err.to_string(),
        })
}

fn copy_text(value: &str) -> Result<String, ClustererError> {
    let mut copy = String::new();
    copy.try_reserve_exact(value.len())
        .map_err(|_| ClustererError::oom("copying node strings"))?;
    copy.push_str(value);
    Ok(copy)
}

/// Process-wide cluster registry behind one structural reader/writer lock.
///
/// Readers take a [`RegistryView`] and may then lock individual clusters and
/// nodes. Structural changes go through a [`StructuralGuard`], which cannot
/// be obtained by a thread that still holds a view, so the global lock is
/// always taken before any per-record lock.
pub struct ClusterRegistry {
    id: u64,
    local_node_id: NodeId,
    transport: Transport,
    subscribers: Arc<SubscriberRegistry>,
    table: RwLock<ClusterTable>,
    generation: AtomicU64,
}

impl ClusterRegistry {
    pub fn new(local_node_id: NodeId, transport: Transport) -> Self {
        Self::with_subscribers(local_node_id, transport, Arc::new(SubscriberRegistry::new()))
    }

    pub fn with_subscribers(
        local_node_id: NodeId,
        transport: Transport,
        subscribers: Arc<SubscriberRegistry>,
    ) -> Self {
        Self {
            id: NEXT_REGISTRY_ID.fetch_add(1, Ordering::Relaxed),
            local_node_id,
            transport,
            subscribers,
            table: RwLock::new(ClusterTable::new()),
            generation: AtomicU64::new(0),
        }
    }

    pub fn from_config(config: &ClustererConfig) -> Result<Self, ClustererError> {
        config.validate()?;
        Ok(Self::new(config.current_id, config.transport))
    }

    pub fn my_node_id(&self) -> NodeId {
        self.local_node_id
    }

    pub fn transport(&self) -> Transport {
        self.transport
    }

    pub fn subscribers(&self) -> &Arc<SubscriberRegistry> {
        &self.subscribers
    }

    /// Incremented by every structural change: table replacement, cluster
    /// creation and node insertion.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    fn bump_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn read(&self) -> RegistryView<'_> {
        // A nested view on the same thread must not queue behind a writer
        // that is itself waiting for the outer view.
        let table = if holds_view(self.id) {
            self.table.read_recursive()
        } else {
            self.table.read()
        };
        VIEWS_HELD.with(|held| held.borrow_mut().push(self.id));
        RegistryView {
            table,
            registry_id: self.id,
            local_node_id: self.local_node_id,
        }
    }

    /// Blocks until every in-flight reader has released its view.
    pub fn write(&self) -> Result<StructuralGuard<'_>, ClustererError> {
        if holds_view(self.id) {
            return Err(ClustererError::LockOrder(
                "structural lock requested while holding a registry view",
            ));
        }
        Ok(StructuralGuard {
            registry: self,
            table: self.table.write(),
        })
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Drops every cluster and retires the nodes' link resources.
    pub fn teardown(&self) -> Result<usize, ClustererError> {
        Ok(self.write()?.teardown())
    }

    pub fn node_context<'a>(&'a self, resolver: &'a dyn HostResolver) -> NodeContext<'a> {
        NodeContext {
            local_node_id: self.local_node_id,
            transport: self.transport,
            resolver,
            subscribers: &self.subscribers,
        }
    }
}

impl std::fmt::Debug for ClusterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterRegistry")
            .field("local_node_id", &self.local_node_id)
            .field("transport", &self.transport)
            .field("generation", &self.generation())
            .finish_non_exhaustive()
    }
}

/// Shared access to the cluster table for the lifetime of the view.
pub struct RegistryView<'a> {
    table: RwLockReadGuard<'a, ClusterTable>,
    registry_id: u64,
    local_node_id: NodeId,
}

impl RegistryView<'_> {
    pub fn my_node_id(&self) -> NodeId {
        self.local_node_id
    }
}

impl Deref for RegistryView<'_> {
    type Target = ClusterTable;

    fn deref(&self) -> &ClusterTable {
        &self.table
    }
}

impl Drop for RegistryView<'_> {
    fn drop(&mut self) {
        VIEWS_HELD.with(|held| {
            let mut held = held.borrow_mut();
            if let Some(pos) = held.iter().rposition(|id| *id == self.registry_id) {
                held.swap_remove(pos);
            }
        });
    }
}

/// Exclusive access for structural changes: cluster insertion, node loading,
/// table replacement and teardown.
pub struct StructuralGuard<'a> {
    registry: &'a ClusterRegistry,
    table: RwLockWriteGuard<'a, ClusterTable>,
}

impl StructuralGuard<'_> {
    pub fn table(&self) -> &ClusterTable {
        &self.table
    }

    pub fn upsert_cluster(
        &mut self,
        cluster_id: ClusterId,
    ) -> Result<&mut ClusterInfo, ClustererError> {
        let registry = self.registry;
        let created = self.table.lookup_cluster(cluster_id).is_none();
        let cluster = self.table.upsert_cluster(cluster_id, &registry.subscribers)?;
        if created {
            registry.bump_generation();
        }
        Ok(cluster)
    }

    /// Links one node into the live table. A peer is only accepted into a
    /// cluster that already holds the local node, so the live table never
    /// fails [`ClusterTable::verify_local_nodes`] because of this call.
    pub fn add_node(
        &mut self,
        row: &NodeRow,
        resolver: &dyn HostResolver,
    ) -> Result<NodeIdentity, ClustererError> {
        let registry = self.registry;
        let has_local = self
            .table
            .lookup_cluster(row.cluster_id)
            .is_some_and(|cluster| cluster.current_node().is_some());
        if row.node_id != registry.local_node_id && !has_local {
            return Err(BadDataError::MissingLocalNode {
                cluster_id: row.cluster_id,
                node_id: registry.local_node_id,
            }
            .into());
        }
        let ctx = registry.node_context(resolver);
        let identity = self.table.add_node(row, &ctx)?;
        registry.bump_generation();
        Ok(identity)
    }

    /// Installs `table` and returns the previous one with its links retired.
    pub fn replace(&mut self, table: ClusterTable) -> ClusterTable {
        let previous = std::mem::replace(&mut *self.table, table);
        let retired = previous.retire_links();
        let generation = self.registry.bump_generation();
        log::debug!(
            "event=clusterer_swap generation={} clusters={} retired_links={}",
            generation,
            self.table.len(),
            retired
        );
        previous
    }

    /// Empties the registry and returns how many clusters were dropped.
    pub fn teardown(&mut self) -> usize {
        let previous = self.replace(ClusterTable::new());
        log::info!(
            "event=clusterer_teardown clusters={} nodes={}",
            previous.len(),
            previous.node_count()
        );
        previous.len()
    }
}
