//! Read-only view over decoded token claims.

use serde_json::{Map, Value};

/// Name of the claim holding the space-separated scopes.
pub const SCOPE_CLAIM: &str = "scope";

/// Decoded token claims.
///
/// Launch context ids live in claims named after their compartment
/// (`patient`, `encounter`, `practitioner`).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TokenClaims {
    claims: Map<String, Value>,
}

impl TokenClaims {
    /// Wraps a claims object.
    #[must_use]
    pub fn new(claims: Map<String, Value>) -> Self {
        Self { claims }
    }

    /// Builds claims from a JSON value; non-objects yield empty claims.
    #[must_use]
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Object(claims) => Self { claims },
            _ => Self::default(),
        }
    }

    /// Raw claim lookup.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.claims.get(name)
    }

    /// The scope claim as a single space-separated string.
    ///
    /// Some issuers emit `scope` (or `scp`) as a JSON array; it is joined.
    #[must_use]
    pub fn scope(&self) -> String {
        let value = self.claims.get(SCOPE_CLAIM).or_else(|| self.claims.get("scp"));
        match value {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(Value::as_str)
                .collect::<Vec<_>>()
                .join(" "),
            _ => String::new(),
        }
    }

    /// The launch context id held in `claim_name`, if present and non-empty.
    #[must_use]
    pub fn launch_context(&self, claim_name: &str) -> Option<String> {
        match self.claims.get(claim_name)? {
            Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}

impl From<Map<String, Value>> for TokenClaims {
    fn from(claims: Map<String, Value>) -> Self {
        Self::new(claims)
    }
}
