//! Store adapter boundary.
//!
//! The broker treats the document store as an opaque CRUD+query executor: a
//! [`StoreAdapter`] takes a fully-validated spec and returns a kind-specific
//! result or a recoverable `Error::Store`. Adapters must never panic across
//! this boundary; callers turn failures into error replies for the affected
//! connections only.

mod memory;

pub use memory::MemoryStore;

use async_trait::async_trait;

use querysync_shared::{Error, QueryResult, QuerySpec};

#[async_trait]
pub trait StoreAdapter: Send + Sync + 'static {
    async fn execute(&self, spec: &QuerySpec) -> Result<QueryResult, Error>;
}
