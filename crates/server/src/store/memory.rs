//! In-process document store.
//!
//! Documents are JSON objects grouped by database and collection. The query
//! surface covers what the broker's spec language can express: selector
//! matching with the common comparison operators, multi-key sort, skip/limit,
//! a small aggregation subset, distinct, count and the three write kinds.
//! A selector key `id` is treated as `_id`.

use std::cmp::Ordering;
use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::RwLock;
use uuid::Uuid;

use querysync_shared::{canonical_json, Error, QueryKind, QueryResult, QuerySpec, WriteAck};

use super::StoreAdapter;

#[derive(Default)]
pub struct MemoryStore {
    databases: RwLock<HashMap<String, HashMap<String, Vec<Value>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load documents into a collection, assigning `_id`s where missing.
    pub async fn seed(&self, database: &str, collection: &str, docs: Vec<Value>) {
        let mut databases = self.databases.write().await;
        let target = databases
            .entry(database.to_string())
            .or_default()
            .entry(collection.to_string())
            .or_default();
        for mut doc in docs {
            ensure_id(&mut doc);
            target.push(doc);
        }
    }

    pub async fn collection_len(&self, database: &str, collection: &str) -> usize {
        let databases = self.databases.read().await;
        databases
            .get(database)
            .and_then(|db| db.get(collection))
            .map(Vec::len)
            .unwrap_or(0)
    }

    async fn documents(&self, database: &str, collection: &str, filter: &Value) -> Vec<Value> {
        let databases = self.databases.read().await;
        let Some(docs) = databases.get(database).and_then(|db| db.get(collection)) else {
            return Vec::new();
        };
        docs.iter()
            .filter(|doc| matches(doc, filter))
            .cloned()
            .collect()
    }

    async fn find(&self, spec: &QuerySpec) -> Result<QueryResult, Error> {
        let filter = spec.params.clone().unwrap_or_else(empty_object);
        let mut docs = self.documents(&spec.database, &spec.collection, &filter).await;
        if let Some(sort) = &spec.sort {
            sort_docs(&mut docs, sort);
        }
        let docs = paginate(docs, spec.skip, spec.limit);
        Ok(QueryResult::Documents(docs))
    }

    async fn find_one(&self, spec: &QuerySpec) -> Result<QueryResult, Error> {
        let filter = normalize_selector(&spec.params.clone().unwrap_or_else(empty_object));
        let docs = self.documents(&spec.database, &spec.collection, &filter).await;
        Ok(QueryResult::Document(docs.into_iter().next()))
    }

    async fn aggregate(&self, spec: &QuerySpec) -> Result<QueryResult, Error> {
        let Some(Value::Array(stages)) = &spec.params else {
            return Err(Error::Store("aggregate pipeline must be an array".into()));
        };

        let mut docs = self
            .documents(&spec.database, &spec.collection, &empty_object())
            .await;

        for stage in stages {
            let Some(obj) = stage.as_object() else {
                return Err(Error::Store("aggregate stage must be an object".into()));
            };
            let Some((name, arg)) = obj.iter().next() else {
                return Err(Error::Store("empty aggregate stage".into()));
            };
            match name.as_str() {
                "$match" => docs.retain(|doc| matches(doc, arg)),
                "$sort" => sort_docs(&mut docs, arg),
                "$skip" => {
                    let skip = arg.as_u64().unwrap_or(0) as usize;
                    docs = docs.into_iter().skip(skip).collect();
                }
                "$limit" => {
                    let limit = arg.as_u64().unwrap_or(0) as usize;
                    docs.truncate(limit);
                }
                "$count" => {
                    let field = arg.as_str().unwrap_or("count");
                    let mut out = Map::new();
                    out.insert(field.to_string(), Value::from(docs.len() as u64));
                    return Ok(QueryResult::Documents(vec![Value::Object(out)]));
                }
                other => {
                    return Err(Error::Store(format!(
                        "unsupported aggregate stage `{other}`"
                    )));
                }
            }
        }

        Ok(QueryResult::Documents(docs))
    }

    async fn distinct(&self, spec: &QuerySpec) -> Result<QueryResult, Error> {
        let field = spec
            .field
            .as_deref()
            .ok_or_else(|| Error::Store("distinct requires a field".into()))?;
        let filter = spec.params.clone().unwrap_or_else(empty_object);
        let docs = self.documents(&spec.database, &spec.collection, &filter).await;

        let mut values: Vec<Value> = Vec::new();
        let mut push_unique = |value: &Value| {
            if !values.contains(value) {
                values.push(value.clone());
            }
        };
        for doc in &docs {
            match lookup_path(doc, field) {
                Some(Value::Array(items)) => items.iter().for_each(&mut push_unique),
                Some(value) => push_unique(value),
                None => {}
            }
        }
        Ok(QueryResult::Values(values))
    }

    async fn count(&self, spec: &QuerySpec) -> Result<QueryResult, Error> {
        let filter = spec.params.clone().unwrap_or_else(empty_object);
        let docs = self.documents(&spec.database, &spec.collection, &filter).await;
        Ok(QueryResult::Count(docs.len() as u64))
    }

    async fn insert(&self, spec: &QuerySpec) -> Result<QueryResult, Error> {
        let incoming = match &spec.params {
            Some(Value::Array(docs)) => docs.clone(),
            Some(doc @ Value::Object(_)) => vec![doc.clone()],
            _ => return Err(Error::Store("insert requires a document".into())),
        };

        let mut databases = self.databases.write().await;
        let target = databases
            .entry(spec.database.clone())
            .or_default()
            .entry(spec.collection.clone())
            .or_default();

        let mut ack = WriteAck::default();
        for mut doc in incoming {
            if !doc.is_object() {
                return Err(Error::Store("insert documents must be objects".into()));
            }
            ensure_id(&mut doc);
            if let Some(id) = doc.get("_id") {
                ack.inserted_ids.push(id.clone());
            }
            target.push(doc);
            ack.inserted_count += 1;
        }
        Ok(QueryResult::Ack(ack))
    }

    async fn update(&self, spec: &QuerySpec) -> Result<QueryResult, Error> {
        let selector = normalize_selector(
            spec.selector
                .as_ref()
                .ok_or_else(|| Error::Store("update requires a selector".into()))?,
        );
        let changes = spec
            .params
            .as_ref()
            .ok_or_else(|| Error::Store("update requires a change document".into()))?;

        let mut databases = self.databases.write().await;
        let Some(docs) = databases
            .get_mut(&spec.database)
            .and_then(|db| db.get_mut(&spec.collection))
        else {
            return Ok(QueryResult::Ack(WriteAck::default()));
        };

        let mut ack = WriteAck::default();
        for doc in docs.iter_mut() {
            if !matches(doc, &selector) {
                continue;
            }
            ack.matched_count += 1;
            if apply_update(doc, changes)? {
                ack.modified_count += 1;
            }
            if !spec.options.multi {
                break;
            }
        }
        Ok(QueryResult::Ack(ack))
    }

    async fn remove(&self, spec: &QuerySpec) -> Result<QueryResult, Error> {
        let selector = normalize_selector(
            spec.selector
                .as_ref()
                .ok_or_else(|| Error::Store("remove requires a selector".into()))?,
        );

        let mut databases = self.databases.write().await;
        let Some(docs) = databases
            .get_mut(&spec.database)
            .and_then(|db| db.get_mut(&spec.collection))
        else {
            return Ok(QueryResult::Ack(WriteAck::default()));
        };

        let mut ack = WriteAck::default();
        let mut index = 0;
        while index < docs.len() {
            if matches(&docs[index], &selector) {
                docs.remove(index);
                ack.deleted_count += 1;
                if !spec.options.multi {
                    break;
                }
            } else {
                index += 1;
            }
        }
        Ok(QueryResult::Ack(ack))
    }
}

#[async_trait]
impl StoreAdapter for MemoryStore {
    async fn execute(&self, spec: &QuerySpec) -> Result<QueryResult, Error> {
        match spec.kind {
            QueryKind::Find => self.find(spec).await,
            QueryKind::FindOne => self.find_one(spec).await,
            QueryKind::Aggregate => self.aggregate(spec).await,
            QueryKind::Distinct => self.distinct(spec).await,
            QueryKind::Count => self.count(spec).await,
            QueryKind::Insert => self.insert(spec).await,
            QueryKind::Update => self.update(spec).await,
            QueryKind::Remove => self.remove(spec).await,
        }
    }
}

fn empty_object() -> Value {
    Value::Object(Map::new())
}

fn ensure_id(doc: &mut Value) {
    if let Some(obj) = doc.as_object_mut() {
        if !obj.contains_key("_id") {
            obj.insert("_id".into(), Value::String(Uuid::new_v4().to_string()));
        }
    }
}

/// Rewrite a selector key `id` to `_id`.
fn normalize_selector(selector: &Value) -> Value {
    let Some(obj) = selector.as_object() else {
        return selector.clone();
    };
    if !obj.contains_key("id") || obj.contains_key("_id") {
        return selector.clone();
    }
    let mut out = obj.clone();
    if let Some(value) = out.remove("id") {
        out.insert("_id".into(), value);
    }
    Value::Object(out)
}

fn paginate(docs: Vec<Value>, skip: u64, limit: u64) -> Vec<Value> {
    let iter = docs.into_iter().skip(skip as usize);
    if limit == 0 {
        iter.collect()
    } else {
        iter.take(limit as usize).collect()
    }
}

/// Does `doc` satisfy `selector`? An empty selector matches everything.
fn matches(doc: &Value, selector: &Value) -> bool {
    let Some(conditions) = selector.as_object() else {
        return true;
    };
    conditions.iter().all(|(key, condition)| match key.as_str() {
        "$or" => condition
            .as_array()
            .map(|branches| branches.iter().any(|branch| matches(doc, branch)))
            .unwrap_or(false),
        "$and" => condition
            .as_array()
            .map(|branches| branches.iter().all(|branch| matches(doc, branch)))
            .unwrap_or(false),
        path => condition_matches(lookup_path(doc, path), condition),
    })
}

fn condition_matches(actual: Option<&Value>, condition: &Value) -> bool {
    if let Some(ops) = condition.as_object() {
        if ops.keys().any(|key| key.starts_with('$')) {
            return ops.iter().all(|(op, operand)| match op.as_str() {
                "$eq" => values_equal(actual, operand),
                "$ne" => !values_equal(actual, operand),
                "$gt" => ordered(actual, operand, |ord| ord == Ordering::Greater),
                "$gte" => ordered(actual, operand, |ord| ord != Ordering::Less),
                "$lt" => ordered(actual, operand, |ord| ord == Ordering::Less),
                "$lte" => ordered(actual, operand, |ord| ord != Ordering::Greater),
                "$in" => operand
                    .as_array()
                    .map(|items| items.iter().any(|item| values_equal(actual, item)))
                    .unwrap_or(false),
                "$nin" => operand
                    .as_array()
                    .map(|items| !items.iter().any(|item| values_equal(actual, item)))
                    .unwrap_or(false),
                "$exists" => operand.as_bool().unwrap_or(false) == actual.is_some(),
                _ => false,
            });
        }
    }
    values_equal(actual, condition)
}

/// Equality with document-store semantics: a missing field equals null, and
/// numbers compare by value rather than representation.
fn values_equal(actual: Option<&Value>, expected: &Value) -> bool {
    match actual {
        None => expected.is_null(),
        Some(actual) => match (actual.as_f64(), expected.as_f64()) {
            (Some(a), Some(b)) => a == b,
            _ => actual == expected,
        },
    }
}

fn ordered(actual: Option<&Value>, operand: &Value, accept: impl Fn(Ordering) -> bool) -> bool {
    match actual.and_then(|actual| partial_compare(actual, operand)) {
        Some(ordering) => accept(ordering),
        None => false,
    }
}

/// Same-type comparison for range operators; incomparable pairs never match.
fn partial_compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(_), Value::Number(_)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(left), Value::String(right)) => Some(left.cmp(right)),
        (Value::Bool(left), Value::Bool(right)) => Some(left.cmp(right)),
        _ => None,
    }
}

/// Total ordering for sorting: null < numbers < strings < objects < arrays <
/// booleans, with a stable canonical comparison inside composite types.
fn total_compare(a: &Value, b: &Value) -> Ordering {
    fn rank(value: &Value) -> u8 {
        match value {
            Value::Null => 0,
            Value::Number(_) => 1,
            Value::String(_) => 2,
            Value::Object(_) => 3,
            Value::Array(_) => 4,
            Value::Bool(_) => 5,
        }
    }

    match (a, b) {
        (Value::Number(_), Value::Number(_)) => {
            let left = a.as_f64().unwrap_or(f64::NAN);
            let right = b.as_f64().unwrap_or(f64::NAN);
            left.partial_cmp(&right).unwrap_or(Ordering::Equal)
        }
        (Value::String(left), Value::String(right)) => left.cmp(right),
        (Value::Bool(left), Value::Bool(right)) => left.cmp(right),
        (Value::Object(_), Value::Object(_)) | (Value::Array(_), Value::Array(_)) => {
            canonical_json(a).cmp(&canonical_json(b))
        }
        _ => rank(a).cmp(&rank(b)),
    }
}

fn sort_docs(docs: &mut [Value], sort: &Value) {
    let Some(keys) = sort.as_object() else {
        return;
    };
    let keys: Vec<(&String, i64)> = keys
        .iter()
        .map(|(path, dir)| (path, dir.as_i64().unwrap_or(1)))
        .collect();

    docs.sort_by(|a, b| {
        for (path, direction) in &keys {
            let left = lookup_path(a, path).cloned().unwrap_or(Value::Null);
            let right = lookup_path(b, path).cloned().unwrap_or(Value::Null);
            let mut ordering = total_compare(&left, &right);
            if *direction < 0 {
                ordering = ordering.reverse();
            }
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    });
}

fn lookup_path<'a>(doc: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = doc;
    for segment in path.split('.') {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

/// Apply a change document: either operator form (`$set`/`$unset`/`$inc`) or a
/// full replacement that keeps the existing `_id`. Returns whether the
/// document actually changed.
fn apply_update(doc: &mut Value, changes: &Value) -> Result<bool, Error> {
    let Some(change_obj) = changes.as_object() else {
        return Err(Error::Store("update changes must be an object".into()));
    };

    let has_operators = change_obj.keys().any(|key| key.starts_with('$'));
    let before = doc.clone();

    if has_operators {
        for (op, operand) in change_obj {
            let Some(fields) = operand.as_object() else {
                return Err(Error::Store(format!("operand of `{op}` must be an object")));
            };
            match op.as_str() {
                "$set" => {
                    for (path, value) in fields {
                        set_path(doc, path, value.clone());
                    }
                }
                "$unset" => {
                    for path in fields.keys() {
                        unset_path(doc, path);
                    }
                }
                "$inc" => {
                    for (path, delta) in fields {
                        let delta = delta
                            .as_f64()
                            .ok_or_else(|| Error::Store("$inc requires a number".into()))?;
                        let current = lookup_path(doc, path).and_then(Value::as_f64).unwrap_or(0.0);
                        set_path(doc, path, number_value(current + delta));
                    }
                }
                other => {
                    return Err(Error::Store(format!(
                        "unsupported update operator `{other}`"
                    )));
                }
            }
        }
    } else {
        let id = doc.get("_id").cloned();
        let mut replacement = change_obj.clone();
        if let Some(id) = id {
            replacement.insert("_id".into(), id);
        }
        *doc = Value::Object(replacement);
    }

    Ok(*doc != before)
}

/// Render integral results as integers so counters stay whole numbers.
fn number_value(value: f64) -> Value {
    if value.fract() == 0.0 && value.abs() < (i64::MAX as f64) {
        Value::from(value as i64)
    } else {
        Value::from(value)
    }
}

fn set_path(doc: &mut Value, path: &str, value: Value) {
    let mut current = doc;
    let segments: Vec<&str> = path.split('.').collect();
    for (index, segment) in segments.iter().enumerate() {
        let Some(obj) = current.as_object_mut() else {
            return;
        };
        if index == segments.len() - 1 {
            obj.insert(segment.to_string(), value);
            return;
        }
        current = obj
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
    }
}

fn unset_path(doc: &mut Value, path: &str) {
    let mut current = doc;
    let segments: Vec<&str> = path.split('.').collect();
    for (index, segment) in segments.iter().enumerate() {
        let Some(obj) = current.as_object_mut() else {
            return;
        };
        if index == segments.len() - 1 {
            obj.remove(*segment);
            return;
        }
        match obj.get_mut(*segment) {
            Some(next) => current = next,
            None => return,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn store_with_tasks() -> MemoryStore {
        let store = MemoryStore::new();
        store
            .seed(
                "app",
                "tasks",
                vec![
                    json!({"_id": "1", "title": "write", "done": false, "priority": 3}),
                    json!({"_id": "2", "title": "review", "done": true, "priority": 1}),
                    json!({"_id": "3", "title": "ship", "done": false, "priority": 2}),
                ],
            )
            .await;
        store
    }

    async fn run(store: &MemoryStore, spec: QuerySpec) -> QueryResult {
        store.execute(&spec).await.unwrap()
    }

    #[tokio::test]
    async fn find_filters_by_equality() {
        let store = store_with_tasks().await;
        let result = run(&store, QuerySpec::find("app", "tasks", json!({"done": false}))).await;
        let QueryResult::Documents(docs) = result else {
            panic!("expected documents");
        };
        assert_eq!(docs.len(), 2);
    }

    #[tokio::test]
    async fn find_on_missing_collection_is_empty() {
        let store = MemoryStore::new();
        let result = run(&store, QuerySpec::find("app", "nothing", json!({}))).await;
        assert_eq!(result, QueryResult::Documents(vec![]));
    }

    #[tokio::test]
    async fn comparison_operators() {
        let store = store_with_tasks().await;
        let result = run(
            &store,
            QuerySpec::find("app", "tasks", json!({"priority": {"$gte": 2}})),
        )
        .await;
        let QueryResult::Documents(docs) = result else {
            panic!("expected documents");
        };
        assert_eq!(docs.len(), 2);

        let result = run(
            &store,
            QuerySpec::find("app", "tasks", json!({"title": {"$in": ["ship", "write"]}})),
        )
        .await;
        let QueryResult::Documents(docs) = result else {
            panic!("expected documents");
        };
        assert_eq!(docs.len(), 2);
    }

    #[tokio::test]
    async fn or_branches() {
        let store = store_with_tasks().await;
        let result = run(
            &store,
            QuerySpec::find(
                "app",
                "tasks",
                json!({"$or": [{"title": "ship"}, {"priority": 1}]}),
            ),
        )
        .await;
        let QueryResult::Documents(docs) = result else {
            panic!("expected documents");
        };
        assert_eq!(docs.len(), 2);
    }

    #[tokio::test]
    async fn sort_skip_limit() {
        let store = store_with_tasks().await;
        let spec = QuerySpec::find("app", "tasks", json!({}))
            .with_sort(json!({"priority": -1}))
            .with_skip(1)
            .with_limit(1);
        let QueryResult::Documents(docs) = run(&store, spec).await else {
            panic!("expected documents");
        };
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0]["priority"], 2);
    }

    #[tokio::test]
    async fn find_one_normalizes_id() {
        let store = store_with_tasks().await;
        let result = run(&store, QuerySpec::find_one("app", "tasks", json!({"id": "2"}))).await;
        let QueryResult::Document(Some(doc)) = result else {
            panic!("expected a document");
        };
        assert_eq!(doc["title"], "review");
    }

    #[tokio::test]
    async fn find_one_missing_is_null() {
        let store = store_with_tasks().await;
        let result = run(
            &store,
            QuerySpec::find_one("app", "tasks", json!({"_id": "nope"})),
        )
        .await;
        assert_eq!(result, QueryResult::Document(None));
    }

    #[tokio::test]
    async fn distinct_collects_unique_values() {
        let store = store_with_tasks().await;
        let result = run(
            &store,
            QuerySpec::distinct("app", "tasks", "done", json!({})),
        )
        .await;
        let QueryResult::Values(values) = result else {
            panic!("expected values");
        };
        assert_eq!(values.len(), 2);
    }

    #[tokio::test]
    async fn count_matches_filter() {
        let store = store_with_tasks().await;
        let result = run(&store, QuerySpec::count("app", "tasks", json!({"done": true}))).await;
        assert_eq!(result, QueryResult::Count(1));
    }

    #[tokio::test]
    async fn insert_assigns_ids() {
        let store = MemoryStore::new();
        let result = run(
            &store,
            QuerySpec::insert("app", "tasks", json!({"title": "new"})),
        )
        .await;
        let QueryResult::Ack(ack) = result else {
            panic!("expected an ack");
        };
        assert_eq!(ack.inserted_count, 1);
        assert_eq!(ack.inserted_ids.len(), 1);
        assert_eq!(store.collection_len("app", "tasks").await, 1);
    }

    #[tokio::test]
    async fn insert_many_from_array() {
        let store = MemoryStore::new();
        let result = run(
            &store,
            QuerySpec::insert("app", "tasks", json!([{"a": 1}, {"a": 2}, {"a": 3}])),
        )
        .await;
        let QueryResult::Ack(ack) = result else {
            panic!("expected an ack");
        };
        assert_eq!(ack.inserted_count, 3);
        assert_eq!(store.collection_len("app", "tasks").await, 3);
    }

    #[tokio::test]
    async fn update_set_first_match_only() {
        let store = store_with_tasks().await;
        let spec = QuerySpec::update(
            "app",
            "tasks",
            json!({"done": false}),
            json!({"$set": {"done": true}}),
        );
        let QueryResult::Ack(ack) = run(&store, spec).await else {
            panic!("expected an ack");
        };
        assert_eq!(ack.matched_count, 1);
        assert_eq!(ack.modified_count, 1);

        let QueryResult::Count(count) = run(
            &store,
            QuerySpec::count("app", "tasks", json!({"done": false})),
        )
        .await
        else {
            panic!("expected a count");
        };
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn update_multi_touches_every_match() {
        let store = store_with_tasks().await;
        let spec = QuerySpec::update(
            "app",
            "tasks",
            json!({"done": false}),
            json!({"$set": {"done": true}}),
        )
        .with_options(querysync_shared::QueryOptions {
            multi: true,
            ..Default::default()
        });
        let QueryResult::Ack(ack) = run(&store, spec).await else {
            panic!("expected an ack");
        };
        assert_eq!(ack.matched_count, 2);
        assert_eq!(ack.modified_count, 2);
    }

    #[tokio::test]
    async fn update_inc_and_unset() {
        let store = store_with_tasks().await;
        let spec = QuerySpec::update(
            "app",
            "tasks",
            json!({"_id": "1"}),
            json!({"$inc": {"priority": 2}, "$unset": {"title": ""}}),
        );
        run(&store, spec).await;

        let QueryResult::Document(Some(doc)) = run(
            &store,
            QuerySpec::find_one("app", "tasks", json!({"_id": "1"})),
        )
        .await
        else {
            panic!("expected a document");
        };
        assert_eq!(doc["priority"], 5);
        assert!(doc.get("title").is_none());
    }

    #[tokio::test]
    async fn replacement_update_keeps_id() {
        let store = store_with_tasks().await;
        let spec = QuerySpec::update("app", "tasks", json!({"_id": "1"}), json!({"fresh": true}));
        run(&store, spec).await;

        let QueryResult::Document(Some(doc)) = run(
            &store,
            QuerySpec::find_one("app", "tasks", json!({"_id": "1"})),
        )
        .await
        else {
            panic!("expected a document");
        };
        assert_eq!(doc["_id"], "1");
        assert_eq!(doc["fresh"], true);
        assert!(doc.get("title").is_none());
    }

    #[tokio::test]
    async fn unknown_update_operator_is_a_store_error() {
        let store = store_with_tasks().await;
        let spec = QuerySpec::update(
            "app",
            "tasks",
            json!({"_id": "1"}),
            json!({"$push": {"tags": "x"}}),
        );
        assert!(matches!(store.execute(&spec).await, Err(Error::Store(_))));
    }

    #[tokio::test]
    async fn unmodified_update_counts_match_only() {
        let store = store_with_tasks().await;
        let spec = QuerySpec::update(
            "app",
            "tasks",
            json!({"_id": "2"}),
            json!({"$set": {"done": true}}),
        );
        let QueryResult::Ack(ack) = run(&store, spec).await else {
            panic!("expected an ack");
        };
        assert_eq!(ack.matched_count, 1);
        assert_eq!(ack.modified_count, 0);
    }

    #[tokio::test]
    async fn remove_first_match_then_multi() {
        let store = store_with_tasks().await;
        let spec = QuerySpec::remove("app", "tasks", json!({"done": false}));
        let QueryResult::Ack(ack) = run(&store, spec).await else {
            panic!("expected an ack");
        };
        assert_eq!(ack.deleted_count, 1);

        let store = store_with_tasks().await;
        let spec = QuerySpec::remove("app", "tasks", json!({"done": false})).with_options(
            querysync_shared::QueryOptions {
                multi: true,
                ..Default::default()
            },
        );
        let QueryResult::Ack(ack) = run(&store, spec).await else {
            panic!("expected an ack");
        };
        assert_eq!(ack.deleted_count, 2);
    }

    #[tokio::test]
    async fn aggregate_match_sort_limit() {
        let store = store_with_tasks().await;
        let spec = QuerySpec::aggregate(
            "app",
            "tasks",
            json!([
                {"$match": {"done": false}},
                {"$sort": {"priority": -1}},
                {"$limit": 1}
            ]),
        );
        let QueryResult::Documents(docs) = run(&store, spec).await else {
            panic!("expected documents");
        };
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0]["title"], "write");
    }

    #[tokio::test]
    async fn aggregate_count_stage() {
        let store = store_with_tasks().await;
        let spec = QuerySpec::aggregate(
            "app",
            "tasks",
            json!([{"$match": {"done": false}}, {"$count": "pending"}]),
        );
        let QueryResult::Documents(docs) = run(&store, spec).await else {
            panic!("expected documents");
        };
        assert_eq!(docs, vec![json!({"pending": 2})]);
    }

    #[tokio::test]
    async fn aggregate_unknown_stage_is_a_store_error() {
        let store = store_with_tasks().await;
        let spec = QuerySpec::aggregate("app", "tasks", json!([{"$lookup": {}}]));
        assert!(matches!(store.execute(&spec).await, Err(Error::Store(_))));
    }

    #[tokio::test]
    async fn dotted_paths_match_nested_fields() {
        let store = MemoryStore::new();
        store
            .seed(
                "app",
                "events",
                vec![json!({"meta": {"kind": "deploy"}}), json!({"meta": {"kind": "alert"}})],
            )
            .await;
        let result = run(
            &store,
            QuerySpec::find("app", "events", json!({"meta.kind": "alert"})),
        )
        .await;
        let QueryResult::Documents(docs) = result else {
            panic!("expected documents");
        };
        assert_eq!(docs.len(), 1);
    }

    #[tokio::test]
    async fn databases_are_isolated() {
        let store = MemoryStore::new();
        store.seed("app", "tasks", vec![json!({"a": 1})]).await;
        store.seed("other", "tasks", vec![json!({"a": 2})]).await;

        let QueryResult::Count(count) = run(&store, QuerySpec::count("other", "tasks", json!({})))
            .await
        else {
            panic!("expected a count");
        };
        assert_eq!(count, 1);
    }
}
