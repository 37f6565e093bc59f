use crate::payload::Payload;
use parking_lot::RwLock;
use parlay_core::Viewer;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

pub type ViewerId = String;

/// A connected viewer as seen by fan-out.
#[derive(Debug, Clone)]
pub struct Target {
    pub id: ViewerId,
    pub viewer: Viewer,
    pub tx: mpsc::Sender<Payload>,
    /// Set when a payload was dropped; cleared once `resync-required` is
    /// delivered.
    pub needs_resync: Arc<AtomicBool>,
    pub(crate) token: u64,
}

impl Target {
    pub fn flag_resync(&self) {
        self.needs_resync.store(true, Ordering::Release);
    }

    #[must_use]
    pub fn take_resync(&self) -> bool {
        self.needs_resync.swap(false, Ordering::AcqRel)
    }
}

/// Connected viewers. Fan-out works on a snapshot so connects and
/// disconnects never interleave with a send in progress.
#[derive(Debug, Default)]
pub struct ViewerRegistry {
    viewers: RwLock<HashMap<ViewerId, Target>>,
}

impl ViewerRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a viewer, replacing any earlier registration under the same
    /// id. Returns true if one was replaced.
    pub fn insert(&self, target: Target) -> bool {
        let replaced = self.viewers.write().insert(target.id.clone(), target);
        replaced.is_some()
    }

    pub fn remove(&self, id: &str) -> bool {
        self.viewers.write().remove(id).is_some()
    }

    /// Removes `id` only if it is still the registration identified by
    /// `token`, so a stale guard cannot evict a newer connection.
    pub(crate) fn remove_if(&self, id: &str, token: u64) -> bool {
        let mut viewers = self.viewers.write();
        match viewers.get(id) {
            Some(target) if target.token == token => viewers.remove(id).is_some(),
            _ => false,
        }
    }

    #[must_use]
    pub fn snapshot(&self) -> Vec<Target> {
        self.viewers.read().values().cloned().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.viewers.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.viewers.read().is_empty()
    }

    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.viewers.read().contains_key(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(id: &str, token: u64) -> (Target, mpsc::Receiver<Payload>) {
        let (tx, rx) = mpsc::channel(1);
        let target = Target {
            id: id.to_string(),
            viewer: Viewer::Anonymous,
            tx,
            needs_resync: Arc::new(AtomicBool::new(false)),
            token,
        };
        (target, rx)
    }

    #[test]
    fn stale_token_does_not_evict_newer_connection() {
        let registry = ViewerRegistry::new();
        let (first, _rx1) = target("v1", 1);
        let (second, _rx2) = target("v1", 2);
        assert!(!registry.insert(first));
        assert!(registry.insert(second));

        assert!(!registry.remove_if("v1", 1));
        assert!(registry.contains("v1"));
        assert!(registry.remove_if("v1", 2));
        assert!(registry.is_empty());
    }

    #[test]
    fn resync_flag_is_taken_once() {
        let (t, _rx) = target("v1", 1);
        t.flag_resync();
        assert!(t.take_resync());
        assert!(!t.take_resync());
    }
}
