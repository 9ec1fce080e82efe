//! Live-query cache and broadcast engine.
//!
//! One entry per QueryId holds the spec, the last computed result and the set
//! of subscribed connections. Duplicate subscribes are coalesced: the cached
//! result is served and the store is not touched again until a write on the
//! same (database, collection) invalidates the entry. Invalidation recomputes
//! the full result set — no diffing — and pushes it to every subscriber.
//!
//! The entry map lock is never held across store I/O; each entry carries its
//! own mutex, held only for that entry's recompute, so unrelated queries
//! proceed in parallel.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{Mutex, RwLock};

use querysync_shared::{QueryId, QuerySpec, ServerReply};

use crate::registry::{ConnectionId, ConnectionRegistry};
use crate::store::StoreAdapter;

struct LiveState {
    last_result: Option<Value>,
    subscribers: HashSet<ConnectionId>,
}

struct LiveQuery {
    id: QueryId,
    spec: QuerySpec,
    state: Mutex<LiveState>,
}

pub struct LiveQueryCache {
    store: Arc<dyn StoreAdapter>,
    registry: Arc<ConnectionRegistry>,
    entries: RwLock<HashMap<QueryId, Arc<LiveQuery>>>,
    serve_cached: bool,
}

impl LiveQueryCache {
    pub fn new(
        store: Arc<dyn StoreAdapter>,
        registry: Arc<ConnectionRegistry>,
        serve_cached: bool,
    ) -> Self {
        LiveQueryCache {
            store,
            registry,
            entries: RwLock::new(HashMap::new()),
            serve_cached,
        }
    }

    /// Admit a gated request. Read kinds register the connection as a
    /// subscriber and answer from the cache when possible; write kinds
    /// execute exactly once, acknowledge the requester and invalidate the
    /// collection's live queries.
    pub async fn admit(&self, spec: QuerySpec, connection: ConnectionId, wire_id: &str) {
        if spec.kind.is_write() {
            self.admit_write(spec, connection, wire_id).await;
        } else {
            self.admit_read(spec, connection, wire_id).await;
        }
    }

    async fn admit_read(&self, spec: QuerySpec, connection: ConnectionId, wire_id: &str) {
        let id = match spec.compute_id() {
            Ok(id) => id,
            Err(err) => {
                let reply = ServerReply::error(wire_id, Some(spec.kind), &spec.collection, &err);
                self.registry.push(connection, reply).await;
                return;
            }
        };

        let entry = self.entry_for(&id, &spec).await;
        let mut state = entry.state.lock().await;

        if self.serve_cached {
            if let Some(cached) = state.last_result.clone() {
                state.subscribers.insert(connection);
                let reply =
                    ServerReply::result(id.as_str(), spec.kind, &spec.collection, cached, true);
                self.registry.push(connection, reply).await;
                return;
            }
        }

        match self.store.execute(&entry.spec).await {
            Ok(result) => {
                let value = result.into_value();
                state.last_result = Some(value.clone());
                state.subscribers.insert(connection);
                let reply =
                    ServerReply::result(id.as_str(), spec.kind, &spec.collection, value, false);
                self.registry.push(connection, reply).await;
            }
            Err(err) => {
                // The entry keeps whatever result it had; the subscription
                // stands and the next invalidation retries.
                state.subscribers.insert(connection);
                let reply = ServerReply::error(id.as_str(), Some(spec.kind), &spec.collection, &err);
                self.registry.push(connection, reply).await;
            }
        }
    }

    async fn admit_write(&self, spec: QuerySpec, connection: ConnectionId, wire_id: &str) {
        if let Err(err) = spec.validate() {
            let reply = ServerReply::error(wire_id, Some(spec.kind), &spec.collection, &err);
            self.registry.push(connection, reply).await;
            return;
        }

        match self.store.execute(&spec).await {
            Ok(result) => {
                let reply = ServerReply::result(
                    wire_id,
                    spec.kind,
                    &spec.collection,
                    result.into_value(),
                    false,
                );
                self.registry.push(connection, reply).await;
                if !spec.options.no_broadcast {
                    self.invalidate(&spec.database, &spec.collection).await;
                }
            }
            Err(err) => {
                let reply = ServerReply::error(wire_id, Some(spec.kind), &spec.collection, &err);
                self.registry.push(connection, reply).await;
            }
        }
    }

    async fn entry_for(&self, id: &QueryId, spec: &QuerySpec) -> Arc<LiveQuery> {
        {
            let entries = self.entries.read().await;
            if let Some(entry) = entries.get(id) {
                return entry.clone();
            }
        }

        let mut entries = self.entries.write().await;
        if let Some(entry) = entries.get(id) {
            return entry.clone();
        }

        let entry = Arc::new(LiveQuery {
            id: id.clone(),
            spec: spec.clone(),
            state: Mutex::new(LiveState {
                last_result: None,
                subscribers: HashSet::new(),
            }),
        });
        entries.insert(id.clone(), entry.clone());
        entry
    }

    /// Recompute every live query on (database, collection) and push fresh
    /// results to all current subscribers. Entries recompute concurrently and
    /// independently; no ordering is guaranteed between them.
    pub async fn invalidate(&self, database: &str, collection: &str) {
        let affected: Vec<Arc<LiveQuery>> = {
            let entries = self.entries.read().await;
            entries
                .values()
                .filter(|entry| {
                    entry.spec.database == database && entry.spec.collection == collection
                })
                .cloned()
                .collect()
        };

        tracing::debug!(database, collection, entries = affected.len(), "invalidate");

        for entry in affected {
            let store = self.store.clone();
            let registry = self.registry.clone();
            tokio::spawn(async move {
                recompute(store, registry, entry).await;
            });
        }
    }

    /// Remove a connection from every subscriber set. Entries themselves stay
    /// cached. Invoked on connection close, before the registry forgets the
    /// transport handle.
    pub async fn detach(&self, connection: ConnectionId) {
        let entries: Vec<Arc<LiveQuery>> = {
            let entries = self.entries.read().await;
            entries.values().cloned().collect()
        };
        for entry in entries {
            entry.state.lock().await.subscribers.remove(&connection);
        }
    }

    /// Administrative reset: drop every live query, or only those on one
    /// collection, regardless of subscriber state.
    pub async fn clear(&self, collection: Option<&str>) {
        let mut entries = self.entries.write().await;
        match collection {
            Some(collection) => entries.retain(|_, entry| entry.spec.collection != collection),
            None => entries.clear(),
        }
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn subscriber_count(&self, id: &QueryId) -> usize {
        let entry = {
            let entries = self.entries.read().await;
            entries.get(id).cloned()
        };
        match entry {
            Some(entry) => entry.state.lock().await.subscribers.len(),
            None => 0,
        }
    }

    pub async fn last_result(&self, id: &QueryId) -> Option<Value> {
        let entry = {
            let entries = self.entries.read().await;
            entries.get(id).cloned()
        };
        match entry {
            Some(entry) => entry.state.lock().await.last_result.clone(),
            None => None,
        }
    }
}

async fn recompute(
    store: Arc<dyn StoreAdapter>,
    registry: Arc<ConnectionRegistry>,
    entry: Arc<LiveQuery>,
) {
    let mut state = entry.state.lock().await;
    match store.execute(&entry.spec).await {
        Ok(result) => {
            let value = result.into_value();
            state.last_result = Some(value.clone());
            for connection in &state.subscribers {
                let reply = ServerReply::result(
                    entry.id.as_str(),
                    entry.spec.kind,
                    &entry.spec.collection,
                    value.clone(),
                    false,
                );
                registry.push(*connection, reply).await;
            }
        }
        Err(err) => {
            // Keep the stale-but-valid result; subscribers learn about the
            // failure but the entry is not corrupted.
            tracing::warn!(id = %entry.id, error = %err, "live query recompute failed");
            for connection in &state.subscribers {
                let reply = ServerReply::error(
                    entry.id.as_str(),
                    Some(entry.spec.kind),
                    &entry.spec.collection,
                    &err,
                );
                registry.push(*connection, reply).await;
            }
        }
    }
}
