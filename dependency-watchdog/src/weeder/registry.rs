//! The Weeder registry (spec §3, §4.5 "Registry semantics"): unlike the
//! Prober registry, a duplicate `Register` **replaces** the existing entry
//! (cancelling it first) rather than being rejected — a repeated readiness
//! signal for the same endpoint restarts the watch window from "now".

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;

/// `(namespace, service name)`.
pub type WeederKey = (String, String);

struct Entry {
    token: CancellationToken,
}

#[derive(Default)]
pub struct WeederRegistry {
    entries: Mutex<HashMap<WeederKey, Entry>>,
}

impl WeederRegistry {
    pub fn new() -> Arc<WeederRegistry> {
        Arc::new(WeederRegistry::default())
    }

    /// Registers `token` under `key`, cancelling and replacing any existing
    /// registration. Always succeeds.
    pub fn register(&self, key: WeederKey, token: CancellationToken) {
        let mut entries = self.entries.lock().expect("weeder registry mutex poisoned");
        if let Some(old) = entries.insert(key, Entry { token }) {
            old.token.cancel();
        }
    }

    pub fn unregister(&self, key: &WeederKey) -> bool {
        let mut entries = self.entries.lock().expect("weeder registry mutex poisoned");
        match entries.remove(key) {
            Some(entry) => {
                entry.token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("weeder registry mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(service: &str) -> WeederKey {
        ("shoot--a".to_string(), service.to_string())
    }

    #[test]
    fn duplicate_register_cancels_the_old_token() {
        let registry = WeederRegistry::new();
        let first = CancellationToken::new();
        registry.register(key("etcd"), first.clone());
        let second = CancellationToken::new();
        registry.register(key("etcd"), second.clone());

        assert!(first.is_cancelled());
        assert!(!second.is_cancelled());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn unregister_cancels_and_removes() {
        let registry = WeederRegistry::new();
        let token = CancellationToken::new();
        registry.register(key("etcd"), token.clone());
        assert!(registry.unregister(&key("etcd")));
        assert!(token.is_cancelled());
        assert!(registry.is_empty());
    }

    #[test]
    fn distinct_services_do_not_collide() {
        let registry = WeederRegistry::new();
        registry.register(key("etcd"), CancellationToken::new());
        registry.register(key("kube-apiserver"), CancellationToken::new());
        assert_eq!(registry.len(), 2);
    }
}
