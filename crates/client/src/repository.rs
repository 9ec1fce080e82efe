//! Client-side query cache and subscriber registry.
//!
//! Every reply coming off the socket goes through [`Repository::dispatch`]:
//! the cache entry for the reply's id is refreshed, then the reply fans out
//! to subscribers targeting that id and — for read kinds — to channel-level
//! listeners on the collection. One-shot subscribers are claimed before their
//! callback runs, so they fire exactly once no matter how many pushes arrive.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde_json::Value;
use uuid::Uuid;

use querysync_shared::{ClientRequest, QueryId, QueryKind, QuerySpec, ServerReply};

use crate::lock;

/// Callback invoked with every reply delivered to a subscriber.
pub type Callback = Arc<dyn Fn(&ServerReply) + Send + Sync>;

/// Handed back on registration; used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    fn new() -> Self {
        SubscriptionId(Uuid::new_v4())
    }
}

/// What a subscriber is attached to.
#[derive(Debug, Clone, PartialEq)]
pub enum Subscriber {
    /// Delivered once for a single reply id, then removed.
    OneShot(QueryId),
    /// Delivered on every push for a query id.
    Persistent(QueryId),
    /// Delivered on every read-kind reply for a collection.
    Channel(String),
}

struct Entry {
    id: SubscriptionId,
    target: Subscriber,
    collection: String,
    /// Kept for persistent query subscribers so the connection manager can
    /// re-register them after a reconnect.
    spec: Option<QuerySpec>,
    callback: Callback,
}

#[derive(Default)]
pub struct Repository {
    subscribers: Mutex<Vec<Entry>>,
    cache: Mutex<HashMap<QueryId, Value>>,
}

impl Repository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &self,
        target: Subscriber,
        collection: &str,
        spec: Option<QuerySpec>,
        callback: Callback,
    ) -> SubscriptionId {
        let id = SubscriptionId::new();
        lock(&self.subscribers).push(Entry {
            id,
            target,
            collection: collection.to_string(),
            spec,
            callback,
        });
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = lock(&self.subscribers);
        let before = subscribers.len();
        subscribers.retain(|entry| entry.id != id);
        subscribers.len() != before
    }

    /// Remove every subscriber attached to a collection, channel-level
    /// listeners included.
    pub fn unsubscribe_all(&self, collection: &str) -> usize {
        let mut subscribers = lock(&self.subscribers);
        let before = subscribers.len();
        subscribers.retain(|entry| entry.collection != collection);
        before - subscribers.len()
    }

    pub fn subscriber_count(&self) -> usize {
        lock(&self.subscribers).len()
    }

    /// Last known result for a query, as delivered by the server.
    pub fn last_result(&self, id: &QueryId) -> Option<Value> {
        lock(&self.cache).get(id).cloned()
    }

    /// Requests to replay after a reconnect: one per persistent query
    /// subscriber, re-registering its live query on the new connection.
    pub fn resubscribe_requests(&self) -> Vec<ClientRequest> {
        let subscribers = lock(&self.subscribers);
        subscribers
            .iter()
            .filter_map(|entry| match (&entry.target, &entry.spec) {
                (Subscriber::Persistent(id), Some(spec)) => Some(ClientRequest {
                    id: id.to_string(),
                    spec: spec.clone(),
                }),
                _ => None,
            })
            .collect()
    }

    /// Single dispatch point for every reply coming off the socket.
    pub fn dispatch(&self, reply: &ServerReply) {
        let read_kind = reply.kind.map(QueryKind::is_read).unwrap_or(false);

        if !reply.is_error() && read_kind {
            if let Some(result) = &reply.result {
                lock(&self.cache).insert(QueryId::from(reply.id.as_str()), result.clone());
            }
        }

        // Claim matching subscribers under the lock; one-shots are removed
        // here so a second push can never reach them. Callbacks run after the
        // lock is released.
        let mut claimed: Vec<Callback> = Vec::new();
        {
            let mut subscribers = lock(&self.subscribers);
            let mut index = 0;
            while index < subscribers.len() {
                let entry = &subscribers[index];
                let matched = match &entry.target {
                    Subscriber::OneShot(id) | Subscriber::Persistent(id) => {
                        id.as_str() == reply.id
                    }
                    Subscriber::Channel(name) => {
                        !reply.is_error() && read_kind && *name == reply.collection
                    }
                };
                if matched {
                    claimed.push(entry.callback.clone());
                    if matches!(entry.target, Subscriber::OneShot(_)) {
                        subscribers.remove(index);
                        continue;
                    }
                }
                index += 1;
            }
        }

        for callback in claimed {
            callback(reply);
        }
    }
}
