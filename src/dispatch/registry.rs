//! registry.rs
//! Arbitration ID -> in-flight batch. At most one live entry per key.
//!
//! Owned by a `BatchSendWorker` instance. Every check-and-modify sequence runs
//! under the DashMap shard lock for that key, so a lookup that races with a
//! removal simply finds nothing.

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::dispatch::handle::SendHandle;

#[derive(Default)]
pub struct SendRegistry {
    entries: DashMap<u32, SendHandle>,
    next_token: AtomicU64,
}

impl SendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn next_token(&self) -> u64 {
        self.next_token.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Install `handle` for `key`, returning whatever it displaced.
    pub fn replace(&self, key: u32, handle: SendHandle) -> Option<SendHandle> {
        self.entries.insert(key, handle)
    }

    /// Remove the entry for `key` only if it is still the submission `token`.
    pub fn remove_if_current(&self, key: u32, token: u64) -> bool {
        self.entries
            .remove_if(&key, |_, handle| handle.token() == token)
            .is_some()
    }

    pub fn get(&self, key: u32) -> Option<SendHandle> {
        self.entries.get(&key).map(|entry| entry.value().clone())
    }

    pub fn contains(&self, key: u32) -> bool {
        self.entries.contains_key(&key)
    }

    pub fn keys(&self) -> Vec<u32> {
        let mut keys: Vec<u32> = self.entries.iter().map(|e| *e.key()).collect();
        keys.sort_unstable();
        keys
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Empty the registry, handing back every handle that was in it.
    pub fn drain(&self) -> Vec<SendHandle> {
        self.keys()
            .into_iter()
            .filter_map(|key| self.entries.remove(&key).map(|(_, handle)| handle))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::DispatchControl;
    use std::sync::{Arc, Weak};

    fn handle(registry: &SendRegistry, key: u32) -> SendHandle {
        SendHandle::new(registry.next_token(), key, Arc::new(DispatchControl::new()), Weak::new())
    }

    #[test]
    fn replace_returns_displaced_entry() {
        let registry = SendRegistry::new();
        let first = handle(&registry, 0x10);
        let second = handle(&registry, 0x10);
        assert!(registry.replace(0x10, first.clone()).is_none());
        let displaced = registry.replace(0x10, second.clone()).unwrap();
        assert_eq!(displaced.token(), first.token());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn stale_removal_keeps_newer_entry() {
        let registry = SendRegistry::new();
        let old = handle(&registry, 0x20);
        let new = handle(&registry, 0x20);
        registry.replace(0x20, old.clone());
        registry.replace(0x20, new.clone());
        assert!(!registry.remove_if_current(0x20, old.token()));
        assert_eq!(registry.get(0x20).map(|h| h.token()), Some(new.token()));
        assert!(registry.remove_if_current(0x20, new.token()));
        assert!(!registry.remove_if_current(0x20, new.token()));
        assert!(registry.get(0x20).is_none());
    }

    #[test]
    fn drain_empties_registry() {
        let registry = SendRegistry::new();
        for key in [3, 1, 2] {
            registry.replace(key, handle(&registry, key));
        }
        assert_eq!(registry.keys(), vec![1, 2, 3]);
        let drained: Vec<u32> = registry.drain().iter().map(|h| h.key()).collect();
        assert_eq!(drained, vec![1, 2, 3]);
        assert!(registry.is_empty());
    }
}
