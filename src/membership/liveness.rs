//! Retirement of per-node external resources (transport links) that may be
//! destroyed while other threads are still looking them up.
//!
//! A slot moves `Live -> Draining -> Destroyed`. Holders `retain`/`release`
//! the resource; once the last holder releases it the slot is `Draining` but
//! the resource is still present. The next reader that observes `Draining`
//! drops its shared lock, takes the exclusive lock, re-checks that nobody
//! retained the resource in between, and only then destroys it.

use parking_lot::RwLock;
use std::fmt;
use std::io;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    Live,
    Draining,
    Destroyed,
}

/// Hook run exactly once when a slot destroys its resource.
pub trait Retire {
    fn retire(self);
}

/// A link to a cluster peer owned by the (external) transport layer.
pub trait PeerLink: Send + Sync {
    fn send(&self, payload: &[u8]) -> io::Result<usize>;
    fn close(&self);
}

impl Retire for Arc<dyn PeerLink> {
    fn retire(self) {
        self.close();
    }
}

struct SlotInner<T> {
    phase: Liveness,
    refs: usize,
    resource: Option<T>,
}

pub struct ResourceSlot<T: Retire> {
    inner: RwLock<SlotInner<T>>,
}

impl<T: Retire> ResourceSlot<T> {
    pub fn empty() -> Self {
        Self {
            inner: RwLock::new(SlotInner {
                phase: Liveness::Destroyed,
                refs: 0,
                resource: None,
            }),
        }
    }

    pub fn new(resource: T) -> Self {
        let slot = Self::empty();
        slot.install(resource);
        slot
    }

    /// Installs `resource` with a single holder, retiring whatever the slot
    /// held before.
    pub fn install(&self, resource: T) {
        let previous = {
            let mut inner = self.inner.write();
            inner.phase = Liveness::Live;
            inner.refs = 1;
            inner.resource.replace(resource)
        };
        if let Some(previous) = previous {
            previous.retire();
        }
    }

    /// Adds a holder. A draining resource that has not been reaped yet is
    /// revived; a destroyed one cannot be.
    pub fn retain(&self) -> bool {
        let mut inner = self.inner.write();
        if inner.resource.is_none() {
            return false;
        }
        inner.refs += 1;
        inner.phase = Liveness::Live;
        true
    }

    /// Drops a holder and reports the resulting phase.
    pub fn release(&self) -> Liveness {
        let mut inner = self.inner.write();
        inner.refs = inner.refs.saturating_sub(1);
        if inner.refs == 0 && inner.phase == Liveness::Live {
            inner.phase = Liveness::Draining;
        }
        inner.phase
    }

    /// Runs `f` against a live resource. Observing a draining slot triggers
    /// the reap path instead and yields `None`.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> Option<R> {
        let inner = self.inner.read();
        match inner.phase {
            Liveness::Live => return inner.resource.as_ref().map(f),
            Liveness::Destroyed => return None,
            Liveness::Draining => {}
        }
        drop(inner);
        self.reap();
        None
    }

    /// Destroys the resource if it is still draining with no holders once
    /// the exclusive lock is held. Returns whether this call destroyed it.
    pub fn reap(&self) -> bool {
        let retired = {
            let mut inner = self.inner.write();
            if inner.phase != Liveness::Draining || inner.refs != 0 {
                return false;
            }
            inner.phase = Liveness::Destroyed;
            inner.resource.take()
        };
        match retired {
            Some(resource) => {
                resource.retire();
                true
            }
            None => false,
        }
    }

    /// Unconditionally destroys the resource; used by registry teardown.
    pub fn destroy(&self) -> bool {
        let retired = {
            let mut inner = self.inner.write();
            inner.phase = Liveness::Destroyed;
            inner.refs = 0;
            inner.resource.take()
        };
        match retired {
            Some(resource) => {
                resource.retire();
                true
            }
            None => false,
        }
    }

    pub fn phase(&self) -> Liveness {
        self.inner.read().phase
    }

    pub fn holders(&self) -> usize {
        self.inner.read().refs
    }
}

impl<T: Retire> Default for ResourceSlot<T> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<T: Retire> fmt::Debug for ResourceSlot<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.read();
        f.debug_struct("ResourceSlot")
            .field("phase", &inner.phase)
            .field("refs", &inner.refs)
            .finish()
    }
}
