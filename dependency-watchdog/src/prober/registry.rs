//! The Prober registry (spec §3, §4.4): a process-wide, mutex-protected map
//! from `ClusterKey` to a running Prober's cancellation token. Grounded on
//! the teacher's `podmanager/mod.rs` `POD_MANAGER_CACHE` (a
//! `RwLock<HashMap<String, Arc<Mutex<PodManager>>>>`), but with reject-on-
//! duplicate semantics instead of the teacher's replace semantics — spec §3
//! is explicit that at most one Prober may exist per cluster and a second
//! `Register` for the same key is simply refused (contrast with the Weeder
//! registry, which does replace; see `crate::weeder::registry`).

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;

use crate::types::ClusterKey;

struct Entry {
    token: CancellationToken,
}

#[derive(Default)]
pub struct ProberRegistry {
    entries: Mutex<HashMap<ClusterKey, Entry>>,
}

impl ProberRegistry {
    pub fn new() -> Arc<ProberRegistry> {
        Arc::new(ProberRegistry::default())
    }

    /// Returns `true` iff `key` was free and is now registered against
    /// `token`. A duplicate registration is a no-op that returns `false` —
    /// the caller should drop (cancel) whatever it was about to register.
    pub fn register(&self, key: ClusterKey, token: CancellationToken) -> bool {
        let mut entries = self.entries.lock().expect("prober registry mutex poisoned");
        if entries.contains_key(&key) {
            return false;
        }
        entries.insert(key, Entry { token });
        true
    }

    /// Cancels and removes the entry for `key`, if any. Returns `true` iff
    /// an entry was present.
    pub fn unregister(&self, key: &str) -> bool {
        let mut entries = self.entries.lock().expect("prober registry mutex poisoned");
        match entries.remove(key) {
            Some(entry) => {
                entry.token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries
            .lock()
            .expect("prober registry mutex poisoned")
            .contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("prober registry mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_register_for_same_key_is_rejected() {
        let registry = ProberRegistry::new();
        assert!(registry.register("shoot--a".to_string(), CancellationToken::new()));
        let second_token = CancellationToken::new();
        assert!(!registry.register("shoot--a".to_string(), second_token.clone()));
        assert!(!second_token.is_cancelled());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn unregister_cancels_the_token_and_frees_the_key() {
        let registry = ProberRegistry::new();
        let token = CancellationToken::new();
        registry.register("shoot--a".to_string(), token.clone());
        assert!(registry.unregister("shoot--a"));
        assert!(token.is_cancelled());
        assert!(!registry.contains("shoot--a"));
    }

    #[test]
    fn unregister_of_unknown_key_returns_false() {
        let registry = ProberRegistry::new();
        assert!(!registry.unregister("shoot--missing"));
    }

    #[test]
    fn after_unregister_the_key_can_be_registered_again() {
        let registry = ProberRegistry::new();
        registry.register("shoot--a".to_string(), CancellationToken::new());
        registry.unregister("shoot--a");
        assert!(registry.register("shoot--a".to_string(), CancellationToken::new()));
    }
}
