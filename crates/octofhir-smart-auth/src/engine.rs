//! Per-request compilation of SMART clinical scopes into rule lists.
//!
//! For every request the engine produces an ordered rule list:
//!
//! 1. `allow-metadata`, always first, so the capability statement stays
//!    reachable whatever the token says.
//! 2. Without a usable bearer token, nothing else.
//! 3. A malformed scope claim: a single deny-all carrying the parse error.
//! 4. Otherwise the rules of every compartment scope, in claim order.
//! 5. A terminal deny-all for anything not matched above, unless the list
//!    already ends with one.

use std::sync::Arc;

use crate::config::SmartAuthConfig;
use crate::error::AuthError;
use crate::request::{RequestDetails, RequestType};
use crate::rules::{
    CompartmentRegistry, DENY_UNMATCHED_REASON, Rule, RuleInstances, RuleOperation, RuleTarget,
};
use crate::smart::scopes::{ClinicalScope, ScopeParser};
use crate::token::{JwtTokenDecoder, TokenClaims, TokenDecoder, extract_bearer_token};

/// Compiles bearer-token scopes into first-match rule lists.
#[derive(Clone)]
pub struct AuthorizationEngine {
    registry: Arc<CompartmentRegistry>,
    decoder: Arc<dyn TokenDecoder>,
    parser: ScopeParser,
}

impl std::fmt::Debug for AuthorizationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthorizationEngine")
            .field("registry", &self.registry)
            .field("parser", &self.parser)
            .finish_non_exhaustive()
    }
}

impl AuthorizationEngine {
    /// Creates an engine with the default scope parser.
    #[must_use]
    pub fn new(registry: Arc<CompartmentRegistry>, decoder: Arc<dyn TokenDecoder>) -> Self {
        Self {
            registry,
            decoder,
            parser: ScopeParser::default(),
        }
    }

    /// Replaces the scope parser.
    #[must_use]
    pub fn with_parser(mut self, parser: ScopeParser) -> Self {
        self.parser = parser;
        self
    }

    /// Builds an engine with a JWT decoder, the configured compartments and
    /// the configured non-clinical scopes.
    ///
    /// Returns `None` when `enabled` is off; no scope authorization is
    /// installed then.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Configuration` if the token key or a compartment
    /// is invalid.
    pub fn from_config(config: &SmartAuthConfig) -> Result<Option<Self>, AuthError> {
        if !config.enabled {
            tracing::info!("SMART scope authorization disabled");
            return Ok(None);
        }
        let decoder = JwtTokenDecoder::from_config(&config.token)
            .map_err(|e| AuthError::configuration(e.to_string()))?;
        let registry = CompartmentRegistry::from_config(config)?;
        let parser = ScopeParser::with_non_clinical(config.scopes.non_clinical.iter());

        Ok(Some(
            Self::new(Arc::new(registry), Arc::new(decoder)).with_parser(parser),
        ))
    }

    /// The registered compartment builders.
    #[must_use]
    pub fn registry(&self) -> &CompartmentRegistry {
        &self.registry
    }

    /// Builds the rule list for `request`.
    ///
    /// Never fails: missing or undecodable tokens yield metadata-only access,
    /// malformed scopes yield an explicit deny-all.
    #[must_use]
    pub fn build_rule_list(&self, request: &RequestDetails) -> Vec<Rule> {
        let Some(token) = extract_bearer_token(request) else {
            tracing::debug!("No bearer token, metadata access only");
            return vec![Rule::allow_metadata()];
        };

        match self.decoder.decode(token) {
            Ok(claims) => self.rules_for_claims(request, &claims),
            Err(e) => {
                tracing::warn!(error = %e, "Bearer token rejected, metadata access only");
                vec![Rule::allow_metadata()]
            }
        }
    }

    /// Builds the rule list for already decoded claims.
    #[must_use]
    pub fn rules_for_claims(&self, request: &RequestDetails, claims: &TokenClaims) -> Vec<Rule> {
        let mut rules = vec![Rule::allow_metadata()];

        let scopes = match self.parser.parse(&claims.scope()) {
            Ok(scopes) => scopes,
            Err(e) => {
                tracing::warn!(error = %e, "Malformed scope claim, denying all");
                rules.push(Rule::deny_all(e.to_string()));
                return rules;
            }
        };

        for scope in &scopes {
            let Some(compartment) = scope.compartment() else {
                tracing::debug!(scope = %scope, "Scope without compartment grants nothing");
                continue;
            };

            let mut served = false;
            for builder in self.registry.builders_for(compartment) {
                served = true;
                let claim_name = builder.launch_context_claim_name(compartment);
                let launch_context = claims.launch_context(&claim_name);

                let granted = if is_read_without_id(request) {
                    vec![read_any_instance(scope)]
                } else {
                    builder.build_rules(launch_context.as_deref(), scope)
                };
                tracing::debug!(
                    scope = %scope,
                    launch_context = ?launch_context,
                    rules = granted.len(),
                    "Compartment scope compiled"
                );
                rules.extend(granted);
            }
            if !served {
                tracing::debug!(scope = %scope, "No rule builder registered for compartment");
            }
        }

        // A trailing hard stop already denies everything left
        if !rules.last().is_some_and(Rule::is_deny_all) {
            rules.push(Rule::deny_all(DENY_UNMATCHED_REASON));
        }
        rules
    }
}

fn is_read_without_id(request: &RequestDetails) -> bool {
    request.request_type == RequestType::Get && request.resource_id.is_none()
}

/// Listing grant for a GET without an instance id: results are bounded by
/// search narrowing rather than by the rule.
fn read_any_instance(scope: &ClinicalScope) -> Rule {
    let target = if scope.is_wildcard() {
        RuleTarget::AllResources
    } else {
        RuleTarget::single(scope.resource())
    };
    Rule::allow(RuleOperation::Read, target, RuleInstances::AnyId)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::JwtError;
    use serde_json::json;

    /// Treats the raw token as a JSON claims object.
    struct JsonDecoder;

    impl TokenDecoder for JsonDecoder {
        fn decode(&self, token: &str) -> Result<TokenClaims, JwtError> {
            serde_json::from_str(token)
                .map(TokenClaims::from_value)
                .map_err(|e| JwtError::decoding_error(e.to_string()))
        }
    }

    fn engine() -> AuthorizationEngine {
        AuthorizationEngine::new(
            Arc::new(CompartmentRegistry::standard()),
            Arc::new(JsonDecoder),
        )
    }

    fn read_patient(claims: serde_json::Value) -> RequestDetails {
        RequestDetails::new(RequestType::Get)
            .with_resource("Patient")
            .with_id("123")
            .with_bearer(&claims.to_string())
    }

    #[test]
    fn test_no_token_metadata_only() {
        let rules = engine().build_rule_list(&RequestDetails::new(RequestType::Get));
        assert_eq!(rules, vec![Rule::allow_metadata()]);
    }

    #[test]
    fn test_undecodable_token_metadata_only() {
        let request = RequestDetails::new(RequestType::Get).with_bearer("not-json");
        assert_eq!(engine().build_rule_list(&request), vec![Rule::allow_metadata()]);
    }

    #[test]
    fn test_empty_scope() {
        let rules = engine().build_rule_list(&read_patient(json!({"scope": ""})));
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[0], Rule::allow_metadata());
        assert!(rules[1].is_deny_all());
    }

    #[test]
    fn test_malformed_scope_denies_everything() {
        let rules = engine().build_rule_list(&read_patient(json!({
            "scope": "patient/*.read patient/Observation",
            "patient": "123"
        })));
        assert_eq!(rules.len(), 2);
        assert!(rules[1].is_deny_all());
        assert_eq!(
            rules[1].reason.as_deref(),
            Some("Invalid clinical scope 'patient/Observation': expected [compartment/]resource.operation")
        );
    }

    #[test]
    fn test_compartmentless_scope_skipped() {
        let rules = engine().build_rule_list(&read_patient(json!({"scope": "Observation.read"})));
        assert_eq!(rules.len(), 2);
    }

    #[test]
    fn test_unregistered_compartment_skipped() {
        let rules = engine().build_rule_list(&read_patient(json!({
            "scope": "device/Observation.read",
            "device": "d1"
        })));
        assert_eq!(rules.len(), 2);
    }

    #[test]
    fn test_read_without_id() {
        let claims = json!({"scope": "patient/*.read patient/Observation.write", "patient": "123"});
        let request = RequestDetails::new(RequestType::Get)
            .with_resource("Observation")
            .with_bearer(&claims.to_string());

        let rules = engine().build_rule_list(&request);
        assert_eq!(rules.len(), 4);
        assert_eq!(
            rules[1],
            Rule::allow(RuleOperation::Read, RuleTarget::AllResources, RuleInstances::AnyId)
        );
        assert_eq!(
            rules[2],
            Rule::allow(
                RuleOperation::Read,
                RuleTarget::single("Observation"),
                RuleInstances::AnyId
            )
        );
        assert!(rules[3].is_deny_all());
    }

    #[test]
    fn test_read_without_id_ignores_launch_context() {
        let claims = json!({"scope": "patient/*.read"});
        let request = RequestDetails::new(RequestType::Get)
            .with_resource("Observation")
            .with_bearer(&claims.to_string());

        let rules = engine().build_rule_list(&request);
        assert_eq!(
            rules,
            vec![
                Rule::allow_metadata(),
                Rule::allow(RuleOperation::Read, RuleTarget::AllResources, RuleInstances::AnyId),
                Rule::deny_all(DENY_UNMATCHED_REASON),
            ]
        );

        let claims = json!({"scope": "patient/Observation.read"});
        let request = RequestDetails::new(RequestType::Get)
            .with_resource("Observation")
            .with_bearer(&claims.to_string());
        assert_eq!(
            engine().build_rule_list(&request)[1],
            Rule::allow(
                RuleOperation::Read,
                RuleTarget::single("Observation"),
                RuleInstances::AnyId
            )
        );
    }

    #[test]
    fn test_read_with_id_and_without_context_stops() {
        let rules = engine().build_rule_list(&read_patient(json!({"scope": "patient/*.read"})));
        assert_eq!(rules.len(), 2);
        assert_eq!(
            rules[1].reason.as_deref(),
            Some("Deny ALL Patient requests if no launch context is given!")
        );
    }

    #[test]
    fn test_terminal_deny_follows_later_grants() {
        let rules = engine().build_rule_list(&read_patient(json!({
            "scope": "encounter/*.read patient/Observation.read",
            "patient": "123"
        })));
        assert_eq!(rules.len(), 4);
        assert_eq!(
            rules[1].reason.as_deref(),
            Some("Deny ALL Encounter requests if no launch context is given!")
        );
        assert!(rules[2].is_allow());
        assert_eq!(rules[3].reason.as_deref(), Some(DENY_UNMATCHED_REASON));
    }

    #[test]
    fn test_capitalized_compartment_reads_lowercase_claim() {
        let rules = engine().build_rule_list(&read_patient(json!({
            "scope": "Patient/Patient.read",
            "patient": "123"
        })));
        assert_eq!(rules.len(), 3);
        assert_eq!(
            rules[1].instances,
            RuleInstances::InCompartment {
                compartment: "Patient".into(),
                id: "123".into()
            }
        );
    }

    #[test]
    fn test_rules_follow_claim_order() {
        let rules = engine().build_rule_list(&read_patient(json!({
            "scope": "encounter/Observation.read patient/Condition.read",
            "patient": "123",
            "encounter": "e1"
        })));
        let instances: Vec<String> = rules[1..3].iter().map(|r| r.instances.to_string()).collect();
        assert_eq!(instances, vec!["Encounter/e1", "Patient/123"]);
    }
}
