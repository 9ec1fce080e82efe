//! Kind-specific query results and write acknowledgements.

use serde::{Deserialize, Serialize};
use serde_json::Value;

fn is_zero(count: &u64) -> bool {
    *count == 0
}

/// Acknowledgement for Insert/Update/Remove.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WriteAck {
    #[serde(default, skip_serializing_if = "is_zero")]
    pub inserted_count: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub inserted_ids: Vec<Value>,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub matched_count: u64,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub modified_count: u64,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub deleted_count: u64,
}

/// The result of executing a [`crate::spec::QuerySpec`]. The variant is fixed
/// by the query kind: Find and Aggregate return documents, FindOne a single
/// optional document, Distinct the projected values, Count a number and every
/// write kind an acknowledgement.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryResult {
    Documents(Vec<Value>),
    Document(Option<Value>),
    Values(Vec<Value>),
    Count(u64),
    Ack(WriteAck),
}

impl QueryResult {
    /// Wire rendering. The reply's `result` field carries plain JSON shaped by
    /// the query kind, so clients see an array, a document-or-null, a number
    /// or an ack object.
    pub fn into_value(self) -> Value {
        match self {
            QueryResult::Documents(docs) => Value::Array(docs),
            QueryResult::Document(doc) => doc.unwrap_or(Value::Null),
            QueryResult::Values(values) => Value::Array(values),
            QueryResult::Count(count) => Value::from(count),
            QueryResult::Ack(ack) => serde_json::to_value(&ack).unwrap_or(Value::Null),
        }
    }
}
