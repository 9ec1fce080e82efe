//! Bearer-token claims.
//!
//! Only decoding lives here: a token is three base64url segments (header,
//! payload, signature) and the payload carries scopes plus the usual epoch
//! timestamps. Cryptographic verification is a server capability behind
//! `TokenVerifier` — deployments decide how signatures are checked.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Error;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scopes: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nbf: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
}

impl Claims {
    pub fn is_granted(&self, scope: &str) -> bool {
        self.scopes.iter().any(|granted| granted == scope)
    }

    /// Tokens without an `exp` claim never expire.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match self.exp {
            Some(exp) => now.timestamp() >= exp,
            None => false,
        }
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.exp.and_then(|secs| Utc.timestamp_opt(secs, 0).single())
    }
}

/// A parsed (not verified) access token.
#[derive(Debug, Clone)]
pub struct AccessToken {
    pub header: Value,
    pub claims: Claims,
    pub signature: String,
    raw: String,
}

impl AccessToken {
    pub fn parse(access: &str) -> Result<Self, Error> {
        let parts: Vec<&str> = access.split('.').collect();
        if parts.len() < 3 {
            return Err(Error::Auth("invalid access token".into()));
        }

        let header = decode_segment(parts[0])
            .map_err(|_| Error::Auth("access token header is invalid".into()))?;
        let payload = decode_segment(parts[1])
            .map_err(|_| Error::Auth("access token payload is invalid".into()))?;
        let claims = serde_json::from_value(payload)
            .map_err(|_| Error::Auth("access token payload is invalid".into()))?;

        Ok(AccessToken {
            header,
            claims,
            signature: parts[2].to_string(),
            raw: access.to_string(),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

fn decode_segment(segment: &str) -> Result<Value, Error> {
    let bytes = URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|err| Error::Auth(err.to_string()))?;
    serde_json::from_slice(&bytes).map_err(|err| Error::Auth(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn mint(claims: &Value) -> String {
        let header = URL_SAFE_NO_PAD.encode(json!({"alg": "none"}).to_string());
        let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
        format!("{header}.{payload}.sig")
    }

    #[test]
    fn parses_scopes_and_subject() {
        let token = mint(&json!({"sub": "ada", "scopes": ["tasks:read", "tasks:write"]}));
        let parsed = AccessToken::parse(&token).unwrap();
        assert_eq!(parsed.claims.sub.as_deref(), Some("ada"));
        assert!(parsed.claims.is_granted("tasks:read"));
        assert!(!parsed.claims.is_granted("admin"));
    }

    #[test]
    fn expiry_is_checked_against_now() {
        let token = mint(&json!({"exp": 1_000}));
        let parsed = AccessToken::parse(&token).unwrap();
        assert!(parsed.claims.is_expired(Utc::now()));

        let token = mint(&json!({"exp": Utc::now().timestamp() + 3600}));
        let parsed = AccessToken::parse(&token).unwrap();
        assert!(!parsed.claims.is_expired(Utc::now()));
    }

    #[test]
    fn missing_exp_never_expires() {
        let token = mint(&json!({"sub": "ada"}));
        let parsed = AccessToken::parse(&token).unwrap();
        assert!(!parsed.claims.is_expired(Utc::now()));
    }

    #[test]
    fn rejects_short_tokens() {
        assert!(matches!(
            AccessToken::parse("only.two"),
            Err(Error::Auth(_))
        ));
    }

    #[test]
    fn rejects_garbage_segments() {
        assert!(matches!(
            AccessToken::parse("$$$.%%%.sig"),
            Err(Error::Auth(_))
        ));
    }
}
