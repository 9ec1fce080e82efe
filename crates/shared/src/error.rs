//! Error taxonomy for the broker.
//!
//! Every per-message failure is recovered at the message-handling boundary and
//! turned into an error reply; only transport failures are allowed to change
//! connection state.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// Malformed request. The connection stays open.
    #[error("invalid query spec: {0}")]
    InvalidSpec(String),

    /// Backing-store failure during execute or recompute. Affected live
    /// queries keep their last valid result.
    #[error("store error: {0}")]
    Store(String),

    /// Token missing, unparseable or expired.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Token valid but lacks a required scope.
    #[error("insufficient scope: {0}")]
    Scope(String),

    /// Payload failed schema validation.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Connection-level failure.
    #[error("transport error: {0}")]
    Transport(String),
}

/// Wire error codes carried in [`crate::protocol::ErrorReply`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorCode {
    InvalidSpec,
    Store,
    Auth,
    Scope,
    Validation,
    Transport,
}

impl Error {
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::InvalidSpec(_) => ErrorCode::InvalidSpec,
            Error::Store(_) => ErrorCode::Store,
            Error::Auth(_) => ErrorCode::Auth,
            Error::Scope(_) => ErrorCode::Scope,
            Error::Validation(_) => ErrorCode::Validation,
            Error::Transport(_) => ErrorCode::Transport,
        }
    }
}
