//! Cluster membership and routing core.
//!
//! Tracks which peers belong to which clusters in a registry shared by many
//! threads, keeps the local node's state synchronized with a backing store,
//! and resolves a next hop (direct or relayed) toward any cluster peer.

pub mod config;
pub mod membership;
pub mod persistence;
pub mod routing;
pub mod util;

pub use config::ClustererConfig;
pub use membership::{
    AcceptListSubscriber, ClusterEvent, ClusterId, ClusterInfo, ClusterRegistry,
    ClusterSubscriber, HostResolver, JoinState, LinkState, NodeFlags, NodeId, NodeInfo,
    PeerLink, RegistryView, SubscriberRegistry, SystemResolver, Transport,
};
pub use persistence::{
    FlushReport, FlushTimer, JsonFileNodeStore, LoadOutcome, MemoryNodeStore, NodeRow,
    NodeStore, PersistenceSynchronizer,
};
pub use routing::{PeerHandle, Route, RoutingResolver};
pub use util::{ClustererError, ErrorKind};
