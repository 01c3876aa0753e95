//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;

use octofhir_smart_auth::prelude::*;
use octofhir_smart_auth::token::JwtError;
use serde_json::Value;

/// Decoder mapping opaque test tokens to fixed claims.
#[derive(Default)]
pub struct StaticTokenDecoder {
    tokens: HashMap<String, TokenClaims>,
}

impl StaticTokenDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(mut self, token: &str, claims: Value) -> Self {
        self.tokens
            .insert(token.to_string(), TokenClaims::from_value(claims));
        self
    }
}

impl TokenDecoder for StaticTokenDecoder {
    fn decode(&self, token: &str) -> Result<TokenClaims, JwtError> {
        self.tokens
            .get(token)
            .cloned()
            .ok_or(JwtError::InvalidSignature)
    }
}

pub fn authorization_engine(decoder: StaticTokenDecoder) -> AuthorizationEngine {
    AuthorizationEngine::new(Arc::new(CompartmentRegistry::standard()), Arc::new(decoder))
}

pub fn narrowing_engine(decoder: StaticTokenDecoder) -> SearchNarrowingEngine {
    SearchNarrowingEngine::new(Arc::new(decoder), Default::default())
}

pub fn get(resource: &str, id: &str, token: &str) -> RequestDetails {
    RequestDetails::new(RequestType::Get)
        .with_resource(resource)
        .with_id(id)
        .with_bearer(token)
}

pub fn search(resource: &str, token: &str) -> RequestDetails {
    RequestDetails::new(RequestType::Get)
        .with_resource(resource)
        .with_bearer(token)
}

pub fn create(resource: &str, token: &str) -> RequestDetails {
    RequestDetails::new(RequestType::Post)
        .with_resource(resource)
        .with_bearer(token)
}
