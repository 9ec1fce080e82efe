//! Query specifications and their deterministic identities.
//!
//! A [`QuerySpec`] is an immutable, kind-tagged request against the document
//! store. Read kinds produce a [`QueryId`] — a canonical digest used for
//! caching and deduplication on both ends of the wire. Two specs with the same
//! semantic content always hash to the same id, regardless of the key order
//! their `params`/`selector`/`sort` objects were built with.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fmt;

use crate::error::Error;

/// The operation a [`QuerySpec`] performs against the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum QueryKind {
    Find,
    FindOne,
    Aggregate,
    Distinct,
    Count,
    Insert,
    Update,
    Remove,
}

impl QueryKind {
    /// Read kinds are cached and live-updated.
    pub fn is_read(self) -> bool {
        matches!(
            self,
            QueryKind::Find
                | QueryKind::FindOne
                | QueryKind::Aggregate
                | QueryKind::Distinct
                | QueryKind::Count
        )
    }

    /// Write kinds execute exactly once and trigger invalidation for their
    /// collection.
    pub fn is_write(self) -> bool {
        !self.is_read()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            QueryKind::Find => "find",
            QueryKind::FindOne => "findOne",
            QueryKind::Aggregate => "aggregate",
            QueryKind::Distinct => "distinct",
            QueryKind::Count => "count",
            QueryKind::Insert => "insert",
            QueryKind::Update => "update",
            QueryKind::Remove => "remove",
        }
    }
}

impl fmt::Display for QueryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-request options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryOptions {
    /// Apply Update/Remove to every matching document instead of the first.
    #[serde(default, skip_serializing_if = "is_false")]
    pub multi: bool,
    /// Skip invalidation after a write. The write still executes and is
    /// acknowledged to the requesting connection.
    #[serde(default, skip_serializing_if = "is_false")]
    pub no_broadcast: bool,
}

impl QueryOptions {
    pub fn is_default(&self) -> bool {
        *self == QueryOptions::default()
    }
}

fn is_false(flag: &bool) -> bool {
    !*flag
}

fn default_limit() -> u64 {
    100
}

fn is_default_limit(limit: &u64) -> bool {
    *limit == default_limit()
}

/// Deterministic identity of a query, derived from its semantic content.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueryId(String);

impl QueryId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for QueryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for QueryId {
    fn from(value: String) -> Self {
        QueryId(value)
    }
}

impl From<&str> for QueryId {
    fn from(value: &str) -> Self {
        QueryId(value.to_string())
    }
}

/// A fully-specified request against the store.
///
/// `params` is the filter for read kinds, the document(s) for Insert and the
/// change document for Update. `selector` targets the documents of Update and
/// Remove. `field` names the projected path of Distinct.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuerySpec {
    #[serde(rename = "type")]
    pub kind: QueryKind,
    pub database: String,
    pub collection: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort: Option<Value>,
    #[serde(default)]
    pub skip: u64,
    #[serde(default = "default_limit", skip_serializing_if = "is_default_limit")]
    pub limit: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    #[serde(default, skip_serializing_if = "QueryOptions::is_default")]
    pub options: QueryOptions,
}

impl QuerySpec {
    fn new(kind: QueryKind, database: impl Into<String>, collection: impl Into<String>) -> Self {
        QuerySpec {
            kind,
            database: database.into(),
            collection: collection.into(),
            params: None,
            selector: None,
            sort: None,
            skip: 0,
            limit: default_limit(),
            field: None,
            options: QueryOptions::default(),
        }
    }

    pub fn find(database: impl Into<String>, collection: impl Into<String>, params: Value) -> Self {
        let mut spec = Self::new(QueryKind::Find, database, collection);
        spec.params = Some(params);
        spec
    }

    pub fn find_one(
        database: impl Into<String>,
        collection: impl Into<String>,
        params: Value,
    ) -> Self {
        let mut spec = Self::new(QueryKind::FindOne, database, collection);
        spec.params = Some(params);
        spec
    }

    /// `pipeline` must be a JSON array of stage objects.
    pub fn aggregate(
        database: impl Into<String>,
        collection: impl Into<String>,
        pipeline: Value,
    ) -> Self {
        let mut spec = Self::new(QueryKind::Aggregate, database, collection);
        spec.params = Some(pipeline);
        spec
    }

    pub fn distinct(
        database: impl Into<String>,
        collection: impl Into<String>,
        field: impl Into<String>,
        params: Value,
    ) -> Self {
        let mut spec = Self::new(QueryKind::Distinct, database, collection);
        spec.field = Some(field.into());
        spec.params = Some(params);
        spec
    }

    pub fn count(database: impl Into<String>, collection: impl Into<String>, params: Value) -> Self {
        let mut spec = Self::new(QueryKind::Count, database, collection);
        spec.params = Some(params);
        spec
    }

    /// `docs` is a single document or an array of documents.
    pub fn insert(database: impl Into<String>, collection: impl Into<String>, docs: Value) -> Self {
        let mut spec = Self::new(QueryKind::Insert, database, collection);
        spec.params = Some(docs);
        spec
    }

    pub fn update(
        database: impl Into<String>,
        collection: impl Into<String>,
        selector: Value,
        changes: Value,
    ) -> Self {
        let mut spec = Self::new(QueryKind::Update, database, collection);
        spec.selector = Some(selector);
        spec.params = Some(changes);
        spec
    }

    pub fn remove(
        database: impl Into<String>,
        collection: impl Into<String>,
        selector: Value,
    ) -> Self {
        let mut spec = Self::new(QueryKind::Remove, database, collection);
        spec.selector = Some(selector);
        spec
    }

    pub fn with_sort(mut self, sort: Value) -> Self {
        self.sort = Some(sort);
        self
    }

    pub fn with_skip(mut self, skip: u64) -> Self {
        self.skip = skip;
        self
    }

    pub fn with_limit(mut self, limit: u64) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_options(mut self, options: QueryOptions) -> Self {
        self.options = options;
        self
    }

    /// Check the per-kind required fields.
    pub fn validate(&self) -> Result<(), Error> {
        if self.database.is_empty() {
            return Err(Error::InvalidSpec("database must not be empty".into()));
        }
        if self.collection.is_empty() {
            return Err(Error::InvalidSpec("collection must not be empty".into()));
        }
        match self.kind {
            QueryKind::Aggregate => match &self.params {
                Some(Value::Array(_)) => Ok(()),
                _ => Err(Error::InvalidSpec(
                    "aggregate requires an array pipeline in params".into(),
                )),
            },
            QueryKind::Distinct => match self.field.as_deref() {
                Some(field) if !field.is_empty() => Ok(()),
                _ => Err(Error::InvalidSpec("distinct requires a field".into())),
            },
            QueryKind::Insert => match &self.params {
                Some(Value::Object(_)) | Some(Value::Array(_)) => Ok(()),
                _ => Err(Error::InvalidSpec(
                    "insert requires a document or an array of documents in params".into(),
                )),
            },
            QueryKind::Update => {
                if self.selector.is_none() {
                    return Err(Error::InvalidSpec("update requires a selector".into()));
                }
                match &self.params {
                    Some(Value::Object(_)) => Ok(()),
                    _ => Err(Error::InvalidSpec(
                        "update requires a change document in params".into(),
                    )),
                }
            }
            QueryKind::Remove => {
                if self.selector.is_none() {
                    return Err(Error::InvalidSpec("remove requires a selector".into()));
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Deterministic identity: SHA-256 over the canonical rendering of every
    /// semantic field. Pure and total for well-formed specs.
    pub fn compute_id(&self) -> Result<QueryId, Error> {
        self.validate()?;
        let canon = format!(
            "{}.{}.{}.{}.{}.{}.{}.{}.{}.{}",
            self.database,
            self.collection,
            self.kind,
            canonical_opt(self.params.as_ref()),
            canonical_opt(self.selector.as_ref()),
            canonical_opt(self.sort.as_ref()),
            self.field.as_deref().unwrap_or(""),
            self.skip,
            self.limit,
            canonical_options(&self.options),
        );
        Ok(QueryId(hex::encode(Sha256::digest(canon.as_bytes()))))
    }
}

/// Render a JSON value with object keys sorted recursively, so that two
/// semantically equal values always produce the same string. Array order is
/// significant and preserved.
pub fn canonical_json(value: &Value) -> String {
    match value {
        Value::Array(items) => {
            let inner: Vec<String> = items.iter().map(canonical_json).collect();
            format!("[{}]", inner.join(","))
        }
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by_key(|(key, _)| key.as_str());
            let inner: Vec<String> = entries
                .into_iter()
                .map(|(key, value)| {
                    format!("{}:{}", Value::String(key.clone()), canonical_json(value))
                })
                .collect();
            format!("{{{}}}", inner.join(","))
        }
        other => other.to_string(),
    }
}

fn canonical_opt(value: Option<&Value>) -> String {
    value.map(canonical_json).unwrap_or_else(|| "null".into())
}

fn canonical_options(options: &QueryOptions) -> String {
    format!("{{multi:{},noBroadcast:{}}}", options.multi, options.no_broadcast)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn read_write_split() {
        assert!(QueryKind::Find.is_read());
        assert!(QueryKind::Count.is_read());
        assert!(QueryKind::Insert.is_write());
        assert!(QueryKind::Remove.is_write());
    }

    #[test]
    fn id_is_key_order_independent() {
        let a = QuerySpec::find("app", "tasks", json!({"done": false, "owner": "ada"}));
        let b = QuerySpec::find("app", "tasks", json!({"owner": "ada", "done": false}));
        assert_eq!(a.compute_id().unwrap(), b.compute_id().unwrap());
    }

    #[test]
    fn id_is_key_order_independent_nested() {
        let a = QuerySpec::find("app", "tasks", json!({"meta": {"x": 1, "y": 2}}));
        let b = QuerySpec::find("app", "tasks", json!({"meta": {"y": 2, "x": 1}}));
        assert_eq!(a.compute_id().unwrap(), b.compute_id().unwrap());
    }

    #[test]
    fn distinct_content_distinct_ids() {
        let a = QuerySpec::find("app", "tasks", json!({"done": false}));
        let b = QuerySpec::find("app", "tasks", json!({"done": true}));
        let c = QuerySpec::find("app", "notes", json!({"done": false}));
        let d = QuerySpec::count("app", "tasks", json!({"done": false}));
        let ids = [
            a.compute_id().unwrap(),
            b.compute_id().unwrap(),
            c.compute_id().unwrap(),
            d.compute_id().unwrap(),
        ];
        for (i, left) in ids.iter().enumerate() {
            for right in ids.iter().skip(i + 1) {
                assert_ne!(left, right);
            }
        }
    }

    #[test]
    fn skip_limit_and_sort_are_part_of_identity() {
        let base = QuerySpec::find("app", "tasks", json!({}));
        let skipped = base.clone().with_skip(5);
        let limited = base.clone().with_limit(7);
        let sorted = base.clone().with_sort(json!({"createdAt": -1}));
        assert_ne!(base.compute_id().unwrap(), skipped.compute_id().unwrap());
        assert_ne!(base.compute_id().unwrap(), limited.compute_id().unwrap());
        assert_ne!(base.compute_id().unwrap(), sorted.compute_id().unwrap());
    }

    #[test]
    fn update_without_selector_is_invalid() {
        let mut spec = QuerySpec::update("app", "tasks", json!({"_id": "1"}), json!({"done": true}));
        spec.selector = None;
        assert!(matches!(spec.compute_id(), Err(Error::InvalidSpec(_))));
    }

    #[test]
    fn distinct_without_field_is_invalid() {
        let mut spec = QuerySpec::distinct("app", "tasks", "owner", json!({}));
        spec.field = None;
        assert!(matches!(spec.validate(), Err(Error::InvalidSpec(_))));
    }

    #[test]
    fn aggregate_requires_array_pipeline() {
        let spec = QuerySpec::aggregate("app", "tasks", json!({"$match": {}}));
        assert!(matches!(spec.validate(), Err(Error::InvalidSpec(_))));
        let spec = QuerySpec::aggregate("app", "tasks", json!([{"$match": {}}]));
        assert!(spec.validate().is_ok());
    }

    #[test]
    fn empty_collection_is_invalid() {
        let spec = QuerySpec::find("app", "", json!({}));
        assert!(matches!(spec.validate(), Err(Error::InvalidSpec(_))));
    }

    #[test]
    fn spec_round_trips_through_json() {
        let spec = QuerySpec::find("app", "tasks", json!({"done": false}))
            .with_sort(json!({"createdAt": -1}))
            .with_skip(10)
            .with_limit(20);
        let json = serde_json::to_string(&spec).unwrap();
        let back: QuerySpec = serde_json::from_str(&json).unwrap();
        assert_eq!(spec, back);
    }

    #[test]
    fn wire_kind_names_are_camel_case() {
        let spec = QuerySpec::find_one("app", "tasks", json!({"_id": "1"}));
        let value = serde_json::to_value(&spec).unwrap();
        assert_eq!(value["type"], "findOne");
    }

    #[test]
    fn canonical_json_sorts_keys_at_every_depth() {
        let value = json!({"b": {"d": 4, "c": [3, {"f": 6, "e": 5}]}, "a": 1});
        assert_eq!(
            canonical_json(&value),
            r#"{"a":1,"b":{"c":[3,{"e":5,"f":6}],"d":4}}"#
        );
    }
}
