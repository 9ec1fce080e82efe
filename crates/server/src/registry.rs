//! Connection registry: transport handles and auth claims for every open
//! connection. The live-query cache resolves "push to subscriber X" through
//! this component; a push to a connection that is already gone is a silent
//! no-op, never an error.

use std::collections::HashMap;

use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

use querysync_shared::{Claims, ServerReply};

pub type ConnectionId = Uuid;

struct Connection {
    sender: mpsc::UnboundedSender<ServerReply>,
    claims: Option<Claims>,
}

#[derive(Default)]
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<ConnectionId, Connection>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(
        &self,
        id: ConnectionId,
        sender: mpsc::UnboundedSender<ServerReply>,
        claims: Option<Claims>,
    ) {
        let mut connections = self.connections.write().await;
        connections.insert(id, Connection { sender, claims });
    }

    /// The transport handle for a connection, if it is still open.
    pub async fn lookup(&self, id: ConnectionId) -> Option<mpsc::UnboundedSender<ServerReply>> {
        let connections = self.connections.read().await;
        connections.get(&id).map(|conn| conn.sender.clone())
    }

    pub async fn claims(&self, id: ConnectionId) -> Option<Claims> {
        let connections = self.connections.read().await;
        connections.get(&id).and_then(|conn| conn.claims.clone())
    }

    /// Best-effort push. Swallows both unknown connections and writer tasks
    /// that already hung up.
    pub async fn push(&self, id: ConnectionId, reply: ServerReply) {
        let connections = self.connections.read().await;
        if let Some(conn) = connections.get(&id) {
            if conn.sender.send(reply).is_err() {
                tracing::trace!(connection = %id, "push to closed connection dropped");
            }
        }
    }

    /// Push a reply to every open connection.
    pub async fn broadcast(&self, reply: ServerReply) {
        let connections = self.connections.read().await;
        for conn in connections.values() {
            let _ = conn.sender.send(reply.clone());
        }
    }

    /// Callers must detach the connection from the live-query cache first, so
    /// no recompute push races a removed handle.
    pub async fn unregister(&self, id: ConnectionId) {
        let mut connections = self.connections.write().await;
        connections.remove(&id);
    }

    pub async fn len(&self) -> usize {
        self.connections.read().await.len()
    }
}
