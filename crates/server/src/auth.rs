//! Authentication and payload validation in front of the cache.
//!
//! Token verification and schema validation are capabilities: the broker only
//! depends on the two traits below. The bundled implementations decode claims
//! and check field presence/types; deployments swap in their own.

use chrono::Utc;
use serde_json::Value;
use std::collections::HashMap;

use querysync_shared::{AccessToken, Claims, Error, QueryKind, QuerySpec};

/// Verifies a bearer token into claims.
pub trait TokenVerifier: Send + Sync + 'static {
    fn verify(&self, token: &str) -> Result<Claims, Error>;
}

/// Default verifier: decodes the token and enforces expiry. Signature checks
/// belong to the deployment's own implementation of [`TokenVerifier`].
#[derive(Debug, Default)]
pub struct ClaimsVerifier;

impl TokenVerifier for ClaimsVerifier {
    fn verify(&self, token: &str) -> Result<Claims, Error> {
        let parsed = AccessToken::parse(token)?;
        if parsed.claims.is_expired(Utc::now()) {
            return Err(Error::Auth("access token is expired".into()));
        }
        Ok(parsed.claims)
    }
}

/// JSON type expected of a schema field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    String,
    Number,
    Bool,
    Object,
    Array,
}

impl FieldType {
    fn accepts(self, value: &Value) -> bool {
        match self {
            FieldType::String => value.is_string(),
            FieldType::Number => value.is_number(),
            FieldType::Bool => value.is_boolean(),
            FieldType::Object => value.is_object(),
            FieldType::Array => value.is_array(),
        }
    }
}

/// Declarative payload schema: (field name, expected type, required).
#[derive(Debug, Clone, Default)]
pub struct Schema {
    fields: Vec<(String, FieldType, bool)>,
}

impl Schema {
    pub fn new(fields: Vec<(&str, FieldType, bool)>) -> Self {
        Schema {
            fields: fields
                .into_iter()
                .map(|(name, kind, required)| (name.to_string(), kind, required))
                .collect(),
        }
    }
}

/// Validates a payload against a [`Schema`].
pub trait SchemaValidator: Send + Sync + 'static {
    fn validate(&self, schema: &Schema, payload: &Value) -> Result<(), Error>;
}

/// Checks presence and JSON type of every declared field.
#[derive(Debug, Default)]
pub struct FieldTypeValidator;

impl SchemaValidator for FieldTypeValidator {
    fn validate(&self, schema: &Schema, payload: &Value) -> Result<(), Error> {
        let Some(doc) = payload.as_object() else {
            return Err(Error::Validation("payload must be an object".into()));
        };
        for (name, kind, required) in &schema.fields {
            match doc.get(name) {
                Some(value) => {
                    if !kind.accepts(value) {
                        return Err(Error::Validation(format!(
                            "field `{name}` has the wrong type"
                        )));
                    }
                }
                None if *required => {
                    return Err(Error::Validation(format!(
                        "missing required field `{name}`"
                    )));
                }
                None => {}
            }
        }
        Ok(())
    }
}

struct Rule {
    schema: Schema,
    scopes: Vec<String>,
}

/// Per-collection admission rules. A collection without a rule is open; with
/// one, the connection's claims must hold at least one of the rule's scopes,
/// and write payloads must satisfy the rule's schema.
pub struct Gate {
    rules: HashMap<String, Rule>,
    validator: Box<dyn SchemaValidator>,
}

impl Default for Gate {
    fn default() -> Self {
        Gate::new()
    }
}

impl Gate {
    pub fn new() -> Self {
        Gate::with_validator(Box::new(FieldTypeValidator))
    }

    pub fn with_validator(validator: Box<dyn SchemaValidator>) -> Self {
        Gate {
            rules: HashMap::new(),
            validator,
        }
    }

    pub fn add_rule(&mut self, collection: &str, schema: Schema, scopes: Vec<String>) {
        self.rules.insert(
            collection.to_string(),
            Rule { schema, scopes },
        );
    }

    /// Admit or reject a request before it reaches the cache. Failures keep
    /// the connection open; the caller turns them into error replies.
    pub fn check(&self, claims: Option<&Claims>, spec: &QuerySpec) -> Result<(), Error> {
        let Some(rule) = self.rules.get(&spec.collection) else {
            return Ok(());
        };

        if !rule.scopes.is_empty() {
            let granted = claims
                .map(|claims| rule.scopes.iter().any(|scope| claims.is_granted(scope)))
                .unwrap_or(false);
            if !granted {
                return Err(Error::Scope(format!(
                    "requires one of: {}",
                    rule.scopes.join(", ")
                )));
            }
        }

        // The schema applies to documents entering the collection: inserts
        // and replacement-style updates. Operator updates and read filters
        // pass through.
        match spec.kind {
            QueryKind::Insert => match &spec.params {
                Some(Value::Array(docs)) => {
                    for doc in docs {
                        self.validator.validate(&rule.schema, doc)?;
                    }
                    Ok(())
                }
                Some(doc) => self.validator.validate(&rule.schema, doc),
                None => Err(Error::Validation("insert payload is missing".into())),
            },
            QueryKind::Update => match &spec.params {
                Some(Value::Object(changes))
                    if !changes.keys().any(|key| key.starts_with('$')) =>
                {
                    self.validator.validate(&rule.schema, &Value::Object(changes.clone()))
                }
                _ => Ok(()),
            },
            _ => Ok(()),
        }
    }
}
