//! Wire messages exchanged over the socket.
//!
//! Requests and replies are native nested JSON objects. `params`, `selector`
//! and `sort` travel as plain JSON rather than double-encoded strings; both
//! ends share the same [`crate::spec`] canonicalization, so the `id` a client
//! computes for a read query matches the id the server caches under.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, ErrorCode};
use crate::spec::{QueryKind, QuerySpec};

/// A request as sent by the client. For read kinds `id` is the QueryId; for
/// write kinds it is a fresh per-request id, never deduplicated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientRequest {
    pub id: String,
    #[serde(flatten)]
    pub spec: QuerySpec,
}

impl ClientRequest {
    pub fn to_json(&self) -> Result<String, Error> {
        serde_json::to_string(self).map_err(|err| Error::InvalidSpec(err.to_string()))
    }

    pub fn from_json(raw: &str) -> Result<Self, Error> {
        serde_json::from_str(raw).map_err(|err| Error::InvalidSpec(err.to_string()))
    }
}

/// The error payload of a reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorReply {
    pub code: ErrorCode,
    pub message: String,
}

impl From<&Error> for ErrorReply {
    fn from(error: &Error) -> Self {
        ErrorReply {
            code: error.code(),
            message: error.to_string(),
        }
    }
}

/// A reply or push as sent by the server. `error` present means `result` is
/// absent. `cached` is advisory only: it marks results served straight from
/// the live-query cache without re-execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerReply {
    pub id: String,
    /// Absent only when the request was too malformed to decode.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<QueryKind>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub collection: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorReply>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub cached: bool,
    pub ts: DateTime<Utc>,
}

fn is_false(flag: &bool) -> bool {
    !*flag
}

impl ServerReply {
    pub fn result(
        id: impl Into<String>,
        kind: QueryKind,
        collection: impl Into<String>,
        result: Value,
        cached: bool,
    ) -> Self {
        ServerReply {
            id: id.into(),
            kind: Some(kind),
            collection: collection.into(),
            result: Some(result),
            error: None,
            cached,
            ts: Utc::now(),
        }
    }

    pub fn error(
        id: impl Into<String>,
        kind: Option<QueryKind>,
        collection: impl Into<String>,
        error: &Error,
    ) -> Self {
        ServerReply {
            id: id.into(),
            kind,
            collection: collection.into(),
            result: None,
            error: Some(ErrorReply::from(error)),
            cached: false,
            ts: Utc::now(),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    pub fn to_json(&self) -> Result<String, Error> {
        serde_json::to_string(self).map_err(|err| Error::Transport(err.to_string()))
    }

    pub fn from_json(raw: &str) -> Result<Self, Error> {
        serde_json::from_str(raw).map_err(|err| Error::Transport(err.to_string()))
    }
}
