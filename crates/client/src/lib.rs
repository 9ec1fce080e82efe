//! querysync client.
//!
//! Owns the transport lifecycle (connect, auto-reconnect with a fixed retry
//! interval, outbox flush) and the client-side half of the live-query model:
//! a result cache keyed by QueryId and a subscriber registry dispatching
//! pushed replies to one-shot, persistent and channel-level callbacks.
//!
//! ```text
//!   Client ── enqueueOrSend ──► Outbox ──(flush on open)──► WebSocket
//!     │                                                        │
//!     └── Repository ◄────────── dispatch ◄────────── replies ─┘
//! ```

mod connection;
mod outbox;
mod repository;

pub use connection::{Client, ClientConfig, ConnectionState};
pub use outbox::Outbox;
pub use repository::{Callback, Repository, Subscriber, SubscriptionId};

pub use querysync_shared::{
    Error, QueryId, QueryKind, QueryOptions, QuerySpec, ServerReply,
};

/// Poison-recovering lock: a panicked holder must not take the whole client
/// down with it.
pub(crate) fn lock<T>(mutex: &std::sync::Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}
