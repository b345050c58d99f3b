//! Per-plugin bearer token cache.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

/// At most one token per plugin. Entries are replaced, never expired; a
/// stale token is only discovered when the plugin answers 401.
#[derive(Default)]
pub struct TokenCache {
    tokens: Mutex<HashMap<String, String>>,
    login_gates: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl TokenCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, plugin_id: &str) -> Option<String> {
        self.tokens
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(plugin_id)
            .cloned()
    }

    pub fn set(&self, plugin_id: &str, token: String) {
        self.tokens
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(plugin_id.to_string(), token);
    }

    /// Async lock serializing logins to one plugin. Held across the login
    /// call; the token map lock never is.
    pub fn login_gate(&self, plugin_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut gates = self
            .login_gates
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        Arc::clone(gates.entry(plugin_id.to_string()).or_default())
    }
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn set_replaces_previous_token() {
        let cache = TokenCache::new();
        assert_eq!(cache.get("GRF"), None);
        cache.set("GRF", "t1".into());
        cache.set("GRF", "t2".into());
        assert_eq!(cache.get("GRF").as_deref(), Some("t2"));
        assert_eq!(cache.get("ILO"), None);
    }

    #[test]
    fn login_gate_is_shared_per_plugin() {
        let cache = TokenCache::new();
        let a = cache.login_gate("GRF");
        let b = cache.login_gate("GRF");
        let c = cache.login_gate("ILO");
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
    }
}
