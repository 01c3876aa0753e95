//! Rule compilation and narrowing with real HS256 access tokens.

use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use octofhir_smart_auth::config::{SmartAuthConfig, TokenConfig};
use octofhir_smart_auth::prelude::*;
use octofhir_smart_auth::rules::DENY_UNMATCHED_REASON;
use serde_json::{Value, json};
use time::{Duration, OffsetDateTime};

const SECRET: &str = "integration-secret-with-enough-entropy";
const ISSUER: &str = "https://auth.example.com";

fn config() -> SmartAuthConfig {
    SmartAuthConfig {
        token: TokenConfig {
            secret: Some(SECRET.to_string()),
            issuer: Some(ISSUER.to_string()),
            audience: vec!["https://fhir.example.com".to_string()],
            ..TokenConfig::default()
        },
        ..SmartAuthConfig::default()
    }
}

fn authorization_engine() -> AuthorizationEngine {
    AuthorizationEngine::from_config(&config())
        .unwrap()
        .expect("authorization is enabled")
}

fn narrowing_engine() -> SearchNarrowingEngine {
    SearchNarrowingEngine::from_config(&config())
        .unwrap()
        .expect("narrowing is enabled")
}

fn mint(mut claims: Value, expires_in: Duration) -> String {
    let now = OffsetDateTime::now_utc();
    claims["iss"] = json!(ISSUER);
    claims["aud"] = json!("https://fhir.example.com");
    claims["iat"] = json!(now.unix_timestamp());
    claims["exp"] = json!((now + expires_in).unix_timestamp());
    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(SECRET.as_bytes()),
    )
    .unwrap()
}

#[test]
fn test_valid_token_compiles_rules() {
    let engine = authorization_engine();
    let token = mint(
        json!({"scope": "launch/patient openid patient/Observation.read", "patient": "123"}),
        Duration::minutes(5),
    );
    let request = RequestDetails::new(RequestType::Get)
        .with_resource("Observation")
        .with_id("obs-1")
        .with_bearer(&token);

    let rules = engine.build_rule_list(&request);
    assert_eq!(rules.len(), 3);
    assert_eq!(rules[1].name, "allow-read-Observation-Patient/123");
    assert_eq!(rules[2].reason.as_deref(), Some(DENY_UNMATCHED_REASON));
}

#[test]
fn test_expired_token_gets_metadata_only() {
    let engine = authorization_engine();
    let token = mint(
        json!({"scope": "patient/*.read", "patient": "123"}),
        Duration::hours(-1),
    );
    let request = RequestDetails::new(RequestType::Get)
        .with_resource("Patient")
        .with_id("123")
        .with_bearer(&token);

    assert_eq!(engine.build_rule_list(&request), vec![Rule::allow_metadata()]);
}

#[test]
fn test_expired_token_rejected_by_narrowing() {
    let engine = narrowing_engine();
    let token = mint(
        json!({"scope": "patient/*.read", "patient": "123"}),
        Duration::hours(-1),
    );
    let request = RequestDetails::new(RequestType::Get)
        .with_resource("Observation")
        .with_bearer(&token);

    let err = engine.build_authorized_list(&request).unwrap_err();
    assert!(matches!(err, AuthError::InvalidToken { .. }));
}

#[test]
fn test_narrowing_with_valid_token() {
    let engine = narrowing_engine();
    let token = mint(
        json!({"scope": ["patient/*.read", "fhirUser"], "patient": "123"}),
        Duration::minutes(5),
    );
    let request = RequestDetails::new(RequestType::Post)
        .with_resource("Observation")
        .with_operation("_search")
        .with_bearer(&token);

    let outcome = engine.build_authorized_list(&request).unwrap();
    assert_eq!(
        outcome.authorized_list().unwrap().references(),
        vec!["Patient/123"]
    );
}

#[test]
fn test_from_config_requires_key() {
    let config = SmartAuthConfig::default();
    let err = AuthorizationEngine::from_config(&config).unwrap_err();
    assert!(matches!(err, AuthError::Configuration { .. }));
}

#[test]
fn test_disabled_config_installs_nothing() {
    let config = SmartAuthConfig {
        enabled: false,
        ..SmartAuthConfig::default()
    };
    assert!(config.validate().is_ok());
    assert!(AuthorizationEngine::from_config(&config).unwrap().is_none());
    assert!(SearchNarrowingEngine::from_config(&config).unwrap().is_none());
}
