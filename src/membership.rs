//! Cluster membership: node and cluster records, the process-wide registry
//! and the subscriber set notified about cluster events.

pub mod address;
pub mod cluster;
pub mod liveness;
pub mod node;
pub mod registry;
pub mod subscriber;

pub use address::{HostResolver, NodeUrl, SystemResolver, Transport};
pub use cluster::{ClusterInfo, JoinState};
pub use liveness::{Liveness, PeerLink, ResourceSlot, Retire};
pub use node::{
    ClusterId, LinkState, NodeFlags, NodeGuard, NodeId, NodeIdentity, NodeInfo, NodeState, RowId,
    SearchScratch,
};
pub use registry::{ClusterRegistry, ClusterTable, NodeContext, RegistryView, StructuralGuard};
pub use subscriber::{
    AcceptListSubscriber, ClusterEvent, ClusterSubscriber, SubscriberRegistry,
};
