//! First-match evaluation of compiled rule lists.
//!
//! Hosts that apply rules themselves can ignore this module; it is the
//! reference semantics for [`Rule`] and what the integration tests use.

use std::fmt;

use serde_json::Value;

use crate::compartment::CompartmentChecker;
use crate::error::AuthError;
use crate::request::{RequestDetails, RequestType};

use super::{Rule, RuleInstances, RuleOperation, Verdict};

/// Reason reported when no rule matches.
pub const NO_MATCHING_RULE_REASON: &str = "No matching rule for this request";

/// FHIR interaction being authorized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    Metadata,
    Read,
    Search,
    Create,
    Update,
    Patch,
    Delete,
}

impl OperationKind {
    /// Returns `true` for interactions covered by read rules.
    #[must_use]
    pub fn is_read(&self) -> bool {
        matches!(self, Self::Read | Self::Search)
    }

    /// Returns `true` for interactions covered by write rules.
    #[must_use]
    pub fn is_write(&self) -> bool {
        matches!(self, Self::Create | Self::Update | Self::Patch | Self::Delete)
    }
}

/// A concrete operation to check against a rule list.
///
/// Instance-level operations on resources other than the compartment
/// resource need `resource` (the incoming body, or the stored resource for
/// reads and deletes) to establish compartment linkage.
#[derive(Debug, Clone, PartialEq)]
pub struct OperationRequest {
    pub kind: OperationKind,
    pub resource_type: Option<String>,
    pub resource_id: Option<String>,
    pub resource: Option<Value>,
}

impl OperationRequest {
    fn new(kind: OperationKind, resource_type: Option<&str>, resource_id: Option<&str>) -> Self {
        Self {
            kind,
            resource_type: resource_type.map(ToString::to_string),
            resource_id: resource_id.map(ToString::to_string),
            resource: None,
        }
    }

    #[must_use]
    pub fn metadata() -> Self {
        Self::new(OperationKind::Metadata, None, None)
    }

    #[must_use]
    pub fn read(resource_type: &str, id: &str) -> Self {
        Self::new(OperationKind::Read, Some(resource_type), Some(id))
    }

    #[must_use]
    pub fn search(resource_type: &str) -> Self {
        Self::new(OperationKind::Search, Some(resource_type), None)
    }

    /// A create; type and id are taken from the body.
    #[must_use]
    pub fn create(resource: Value) -> Self {
        let mut request = Self::new(
            OperationKind::Create,
            resource["resourceType"].as_str(),
            resource["id"].as_str(),
        );
        request.resource = Some(resource);
        request
    }

    /// An update; type and id are taken from the body.
    #[must_use]
    pub fn update(resource: Value) -> Self {
        let mut request = Self::create(resource);
        request.kind = OperationKind::Update;
        request
    }

    #[must_use]
    pub fn patch(resource_type: &str, id: &str) -> Self {
        Self::new(OperationKind::Patch, Some(resource_type), Some(id))
    }

    #[must_use]
    pub fn delete(resource_type: &str, id: &str) -> Self {
        Self::new(OperationKind::Delete, Some(resource_type), Some(id))
    }

    /// Attaches the resource used for compartment linkage.
    #[must_use]
    pub fn with_resource(mut self, resource: Value) -> Self {
        self.resource = Some(resource);
        self
    }

    /// Derives the interaction from request details.
    ///
    /// Returns `None` for `OPTIONS` and for writes without a resource type.
    #[must_use]
    pub fn from_request(request: &RequestDetails) -> Option<Self> {
        if request.is_metadata() {
            return Some(Self::metadata());
        }
        let kind = match request.request_type {
            _ if request.is_search() => OperationKind::Search,
            RequestType::Get | RequestType::Head => OperationKind::Read,
            RequestType::Post => OperationKind::Create,
            RequestType::Put => OperationKind::Update,
            RequestType::Patch => OperationKind::Patch,
            RequestType::Delete => OperationKind::Delete,
            RequestType::Options => return None,
        };
        if kind.is_write() && request.resource_name.is_none() {
            return None;
        }
        Some(Self::new(
            kind,
            request.resource_name.as_deref(),
            request.resource_id.as_deref(),
        ))
    }
}

/// Outcome of evaluating a rule list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Allow {
        /// Name of the matching rule.
        rule: String,
    },
    Deny {
        /// Name of the matching rule, if any matched.
        rule: Option<String>,
        reason: String,
    },
}

impl Decision {
    #[must_use]
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow { .. })
    }

    /// Converts a denial into `AuthError::AccessDenied`.
    ///
    /// # Errors
    ///
    /// Returns the denial as an error.
    pub fn into_result(self) -> Result<(), AuthError> {
        match self {
            Self::Allow { .. } => Ok(()),
            Self::Deny { reason, .. } => Err(AuthError::access_denied(reason)),
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Allow { rule } => write!(f, "Allowed by rule: {rule}"),
            Self::Deny { reason, .. } => write!(f, "Access denied by rule: {reason}"),
        }
    }
}

/// Applies rule lists to concrete operations, first match wins.
#[derive(Debug, Clone, Default)]
pub struct RuleEvaluator {
    checker: CompartmentChecker,
}

impl RuleEvaluator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_checker(checker: CompartmentChecker) -> Self {
        Self { checker }
    }

    /// Returns the decision of the first rule matching `request`.
    #[must_use]
    pub fn evaluate(&self, rules: &[Rule], request: &OperationRequest) -> Decision {
        let matched = rules.iter().find(|rule| self.matches(rule, request));

        let decision = match matched {
            Some(rule) if rule.verdict == Verdict::Allow => Decision::Allow {
                rule: rule.name.clone(),
            },
            Some(rule) => Decision::Deny {
                rule: Some(rule.name.clone()),
                reason: rule.reason.clone().unwrap_or_else(|| rule.to_string()),
            },
            None => Decision::Deny {
                rule: None,
                reason: NO_MATCHING_RULE_REASON.to_string(),
            },
        };

        tracing::debug!(
            kind = ?request.kind,
            resource_type = ?request.resource_type,
            resource_id = ?request.resource_id,
            allowed = decision.is_allowed(),
            "Rule list evaluated"
        );
        decision
    }

    fn matches(&self, rule: &Rule, request: &OperationRequest) -> bool {
        let operation_matches = match rule.operation {
            RuleOperation::All => true,
            RuleOperation::Metadata => request.kind == OperationKind::Metadata,
            RuleOperation::Read => request.kind.is_read(),
            RuleOperation::Write => request.kind.is_write(),
        };

        operation_matches
            && rule.target.covers(request.resource_type.as_deref())
            && self.instances_match(&rule.instances, request)
    }

    fn instances_match(&self, instances: &RuleInstances, request: &OperationRequest) -> bool {
        let RuleInstances::InCompartment { compartment, id } = instances else {
            return true;
        };
        let Some(resource_type) = request.resource_type.as_deref() else {
            return false;
        };

        if request.kind == OperationKind::Search {
            return self
                .checker
                .is_resource_in_compartment_definition(compartment, resource_type);
        }

        // The compartment resource itself
        if resource_type == compartment {
            let body_id = request
                .resource
                .as_ref()
                .and_then(|r| r["id"].as_str());
            return request.resource_id.as_deref().or(body_id) == Some(id.as_str());
        }

        request
            .resource
            .as_ref()
            .is_some_and(|r| self.checker.is_in_compartment(compartment, id, r))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::{DENY_UNMATCHED_REASON, RuleTarget};
    use serde_json::json;

    fn patient_rules(operation: RuleOperation, resource_type: &str) -> Vec<Rule> {
        vec![
            Rule::allow_metadata(),
            Rule::allow(
                operation,
                RuleTarget::single(resource_type),
                RuleInstances::InCompartment {
                    compartment: "Patient".into(),
                    id: "123".into(),
                },
            ),
            Rule::deny_all(DENY_UNMATCHED_REASON),
        ]
    }

    #[test]
    fn test_metadata_always_allowed() {
        let evaluator = RuleEvaluator::new();
        let decision = evaluator.evaluate(&[Rule::allow_metadata()], &OperationRequest::metadata());
        assert!(decision.is_allowed());
    }

    #[test]
    fn test_no_matching_rule() {
        let evaluator = RuleEvaluator::new();
        let decision = evaluator.evaluate(
            &[Rule::allow_metadata()],
            &OperationRequest::read("Patient", "1"),
        );
        assert_eq!(
            decision.to_string(),
            "Access denied by rule: No matching rule for this request"
        );
    }

    #[test]
    fn test_compartment_resource_by_id() {
        let evaluator = RuleEvaluator::new();
        let rules = patient_rules(RuleOperation::Read, "Patient");

        assert!(evaluator
            .evaluate(&rules, &OperationRequest::read("Patient", "123"))
            .is_allowed());

        let decision = evaluator.evaluate(&rules, &OperationRequest::read("Patient", "456"));
        assert_eq!(
            decision,
            Decision::Deny {
                rule: Some("deny-all".into()),
                reason: DENY_UNMATCHED_REASON.into(),
            }
        );
    }

    #[test]
    fn test_linked_resource_needs_body() {
        let evaluator = RuleEvaluator::new();
        let rules = patient_rules(RuleOperation::Read, "Observation");
        let observation = json!({
            "resourceType": "Observation",
            "id": "obs-1",
            "subject": {"reference": "Patient/123"}
        });

        let bare = OperationRequest::read("Observation", "obs-1");
        assert!(!evaluator.evaluate(&rules, &bare).is_allowed());

        let with_body = bare.with_resource(observation);
        assert!(evaluator.evaluate(&rules, &with_body).is_allowed());
    }

    #[test]
    fn test_write_covers_create_update_patch_delete() {
        let evaluator = RuleEvaluator::new();
        let rules = patient_rules(RuleOperation::Write, "Observation");
        let observation = json!({
            "resourceType": "Observation",
            "id": "obs-1",
            "subject": {"reference": "Patient/123"}
        });

        for request in [
            OperationRequest::create(observation.clone()),
            OperationRequest::update(observation.clone()),
            OperationRequest::patch("Observation", "obs-1").with_resource(observation.clone()),
            OperationRequest::delete("Observation", "obs-1").with_resource(observation.clone()),
        ] {
            assert!(evaluator.evaluate(&rules, &request).is_allowed(), "{request:?}");
        }

        let read = OperationRequest::read("Observation", "obs-1").with_resource(observation);
        assert!(!evaluator.evaluate(&rules, &read).is_allowed());
    }

    #[test]
    fn test_search_matches_compartment_member_types() {
        let evaluator = RuleEvaluator::new();
        let rules = patient_rules(RuleOperation::Read, "Observation");
        assert!(evaluator
            .evaluate(&rules, &OperationRequest::search("Observation"))
            .is_allowed());
        assert!(!evaluator
            .evaluate(&rules, &OperationRequest::search("Organization"))
            .is_allowed());
    }

    #[test]
    fn test_into_result() {
        let decision = Decision::Deny {
            rule: None,
            reason: "nope".into(),
        };
        let err = decision.into_result().unwrap_err();
        assert_eq!(err.to_string(), "Access denied by rule: nope");
        assert!(Decision::Allow { rule: "r".into() }.into_result().is_ok());
    }

    #[test]
    fn test_from_request() {
        let details = RequestDetails::new(RequestType::Get)
            .with_resource("Observation")
            .with_id("1");
        assert_eq!(
            OperationRequest::from_request(&details).unwrap().kind,
            OperationKind::Read
        );

        let details = RequestDetails::new(RequestType::Get).with_resource("Observation");
        assert_eq!(
            OperationRequest::from_request(&details).unwrap().kind,
            OperationKind::Search
        );

        let details = RequestDetails::new(RequestType::Post).with_resource("Observation");
        assert_eq!(
            OperationRequest::from_request(&details).unwrap().kind,
            OperationKind::Create
        );

        assert_eq!(
            OperationRequest::from_request(&RequestDetails::metadata()).unwrap().kind,
            OperationKind::Metadata
        );
        assert!(OperationRequest::from_request(&RequestDetails::new(RequestType::Delete)).is_none());
    }
}
