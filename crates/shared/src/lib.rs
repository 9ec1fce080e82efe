//! Shared types for the querysync protocol: query specs and their identities,
//! wire messages, kind-specific results, bearer-token claims and the error
//! taxonomy. Pure data — no I/O lives in this crate.

pub mod error;
pub mod protocol;
pub mod result;
pub mod spec;
pub mod token;

pub use error::{Error, ErrorCode};
pub use protocol::{ClientRequest, ErrorReply, ServerReply};
pub use result::{QueryResult, WriteAck};
pub use spec::{canonical_json, QueryId, QueryKind, QueryOptions, QuerySpec};
pub use token::{AccessToken, Claims};
