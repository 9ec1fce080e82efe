//! Application state shared across connection handlers.
//!
//! Every component is owned and injectable — there are no process-wide
//! registries. Tests build a state around their own store, gate or verifier.

use std::sync::Arc;

use crate::auth::{ClaimsVerifier, Gate, TokenVerifier};
use crate::cache::LiveQueryCache;
use crate::config::Config;
use crate::registry::ConnectionRegistry;
use crate::store::StoreAdapter;

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<ConnectionRegistry>,
    pub cache: Arc<LiveQueryCache>,
    pub gate: Arc<Gate>,
    pub verifier: Arc<dyn TokenVerifier>,
    pub require_token: bool,
}

impl AppState {
    pub fn new(store: Arc<dyn StoreAdapter>, config: &Config) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        let cache = Arc::new(LiveQueryCache::new(
            store,
            registry.clone(),
            config.serve_cached,
        ));
        AppState {
            registry,
            cache,
            gate: Arc::new(Gate::new()),
            verifier: Arc::new(ClaimsVerifier),
            require_token: config.require_token,
        }
    }

    pub fn with_gate(mut self, gate: Gate) -> Self {
        self.gate = Arc::new(gate);
        self
    }

    pub fn with_verifier(mut self, verifier: Arc<dyn TokenVerifier>) -> Self {
        self.verifier = verifier;
        self
    }
}
