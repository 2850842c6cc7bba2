use super::node::{ClusterId, NodeId};
use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClusterEvent {
    NodeReachable {
        cluster_id: ClusterId,
        node_id: NodeId,
    },
    NodeUnreachable {
        cluster_id: ClusterId,
        node_id: NodeId,
    },
}

impl ClusterEvent {
    pub fn cluster_id(&self) -> ClusterId {
        match self {
            ClusterEvent::NodeReachable { cluster_id, .. }
            | ClusterEvent::NodeUnreachable { cluster_id, .. } => *cluster_id,
        }
    }

    pub fn node_id(&self) -> NodeId {
        match self {
            ClusterEvent::NodeReachable { node_id, .. }
            | ClusterEvent::NodeUnreachable { node_id, .. } => *node_id,
        }
    }
}

/// A module interested in one or more clusters.
///
/// Events are delivered with no registry lock held, so handlers may query
/// the registry again.
pub trait ClusterSubscriber: Send + Sync {
    fn name(&self) -> &str;
    fn accepts_cluster(&self, cluster_id: ClusterId) -> bool;
    fn on_event(&self, event: &ClusterEvent);
}

type EventHandler = Box<dyn Fn(&ClusterEvent) + Send + Sync>;

/// Subscriber declaring a fixed list of accepted cluster ids.
pub struct AcceptListSubscriber {
    name: String,
    clusters: Vec<ClusterId>,
    handler: EventHandler,
}

impl AcceptListSubscriber {
    pub fn new(
        name: impl Into<String>,
        clusters: impl IntoIterator<Item = ClusterId>,
        handler: impl Fn(&ClusterEvent) + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            clusters: clusters.into_iter().collect(),
            handler: Box::new(handler),
        }
    }
}

impl ClusterSubscriber for AcceptListSubscriber {
    fn name(&self) -> &str {
        &self.name
    }

    fn accepts_cluster(&self, cluster_id: ClusterId) -> bool {
        self.clusters.contains(&cluster_id)
    }

    fn on_event(&self, event: &ClusterEvent) {
        (self.handler)(event)
    }
}

/// Process-wide set of subscribers. Clusters copy in the matching
/// subscribers when they are created, so registrations made afterwards only
/// take effect on the next load.
#[derive(Default)]
pub struct SubscriberRegistry {
    subscribers: RwLock<Vec<Arc<dyn ClusterSubscriber>>>,
}

impl SubscriberRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, subscriber: Arc<dyn ClusterSubscriber>) {
        self.subscribers.write().push(subscriber);
    }

    pub fn len(&self) -> usize {
        self.subscribers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn interested_in(&self, cluster_id: ClusterId) -> Vec<Arc<dyn ClusterSubscriber>> {
        self.subscribers
            .read()
            .iter()
            .filter(|subscriber| subscriber.accepts_cluster(cluster_id))
            .cloned()
            .collect()
    }
}

impl fmt::Debug for SubscriberRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<String> = self
            .subscribers
            .read()
            .iter()
            .map(|subscriber| subscriber.name().to_string())
            .collect();
        f.debug_struct("SubscriberRegistry")
            .field("subscribers", &names)
            .finish()
    }
}

/// Delivers `events` to `subscribers`; callers must not hold registry locks.
pub(crate) fn dispatch(subscribers: &[Arc<dyn ClusterSubscriber>], events: &[ClusterEvent]) {
    for event in events {
        for subscriber in subscribers {
            log::debug!(
                "event=clusterer_dispatch subscriber={} cluster_id={} node_id={} kind={:?}",
                subscriber.name(),
                event.cluster_id(),
                event.node_id(),
                event
            );
            subscriber.on_event(event);
        }
    }
}
