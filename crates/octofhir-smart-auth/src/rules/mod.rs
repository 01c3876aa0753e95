//! Compiled access rules.
//!
//! A rule list is an ordered set of allow/deny directives. Evaluation is
//! first-match; every list produced by the
//! [`AuthorizationEngine`](crate::engine::AuthorizationEngine) for an
//! authenticated request ends in a deny-all rule.

pub mod builder;
pub mod evaluator;
pub mod registry;

use std::collections::BTreeSet;
use std::fmt;

use serde::Serialize;

pub use builder::{CompartmentRuleBuilder, StandardCompartmentRuleBuilder};
pub use evaluator::{Decision, OperationKind, OperationRequest, RuleEvaluator};
pub use registry::CompartmentRegistry;

/// Reason carried by the terminal rule of every authenticated rule list.
pub const DENY_UNMATCHED_REASON: &str = "Deny all requests that do not match any pre-defined rules";

/// Reason carried by the hard-stop rule emitted when a compartment scope has
/// no launch context.
#[must_use]
pub fn no_launch_context_reason(compartment_type: &str) -> String {
    format!("Deny ALL {compartment_type} requests if no launch context is given!")
}

/// Whether a matching rule permits or rejects the operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Allow,
    Deny,
}

/// The operations a rule applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleOperation {
    /// The capability statement only.
    Metadata,
    /// Reads and searches.
    Read,
    /// Create, update, patch and delete.
    Write,
    /// Every operation, metadata included.
    All,
}

impl RuleOperation {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Metadata => "metadata",
            Self::Read => "read",
            Self::Write => "write",
            Self::All => "all",
        }
    }
}

impl fmt::Display for RuleOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The resource types a rule applies to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleTarget {
    AllResources,
    Types(BTreeSet<String>),
}

impl RuleTarget {
    /// A target naming a single resource type.
    #[must_use]
    pub fn single(resource_type: impl Into<String>) -> Self {
        Self::Types(BTreeSet::from([resource_type.into()]))
    }

    /// Returns `true` if the target covers `resource_type`.
    ///
    /// Typed targets never cover system-level requests.
    #[must_use]
    pub fn covers(&self, resource_type: Option<&str>) -> bool {
        match self {
            Self::AllResources => true,
            Self::Types(types) => resource_type.is_some_and(|t| types.contains(t)),
        }
    }
}

impl fmt::Display for RuleTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AllResources => f.write_str("*"),
            Self::Types(types) if types.len() == 1 => {
                f.write_str(types.iter().next().map_or("", String::as_str))
            }
            Self::Types(types) => write!(f, "{} types", types.len()),
        }
    }
}

/// The resource instances a rule applies to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleInstances {
    AnyId,
    /// Instances linked to one compartment instance, e.g. `Patient/123`.
    InCompartment { compartment: String, id: String },
}

impl fmt::Display for RuleInstances {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AnyId => f.write_str("any"),
            Self::InCompartment { compartment, id } => write!(f, "{compartment}/{id}"),
        }
    }
}

/// One allow/deny directive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Rule {
    pub name: String,
    pub verdict: Verdict,
    pub operation: RuleOperation,
    pub target: RuleTarget,
    pub instances: RuleInstances,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl Rule {
    /// Unconditional access to the capability statement.
    #[must_use]
    pub fn allow_metadata() -> Self {
        Self {
            name: "allow-metadata".to_string(),
            verdict: Verdict::Allow,
            operation: RuleOperation::Metadata,
            target: RuleTarget::AllResources,
            instances: RuleInstances::AnyId,
            reason: None,
        }
    }

    /// Rejects everything that reaches it.
    #[must_use]
    pub fn deny_all(reason: impl Into<String>) -> Self {
        Self {
            name: "deny-all".to_string(),
            verdict: Verdict::Deny,
            operation: RuleOperation::All,
            target: RuleTarget::AllResources,
            instances: RuleInstances::AnyId,
            reason: Some(reason.into()),
        }
    }

    /// An allow rule; the name is derived from its shape.
    #[must_use]
    pub fn allow(operation: RuleOperation, target: RuleTarget, instances: RuleInstances) -> Self {
        let name = format!("allow-{operation}-{target}-{instances}").replace(' ', "-");
        Self {
            name,
            verdict: Verdict::Allow,
            operation,
            target,
            instances,
            reason: None,
        }
    }

    /// Returns `true` for a rule that denies every operation on every resource.
    #[must_use]
    pub fn is_deny_all(&self) -> bool {
        self.verdict == Verdict::Deny
            && self.operation == RuleOperation::All
            && self.target == RuleTarget::AllResources
            && self.instances == RuleInstances::AnyId
    }

    #[must_use]
    pub fn is_allow(&self) -> bool {
        self.verdict == Verdict::Allow
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.verdict, &self.reason) {
            (Verdict::Deny, Some(reason)) => write!(f, "deny all: {reason}"),
            _ => write!(
                f,
                "{} {} {} in {}",
                match self.verdict {
                    Verdict::Allow => "allow",
                    Verdict::Deny => "deny",
                },
                self.operation,
                self.target,
                self.instances
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rule_constructors() {
        let metadata = Rule::allow_metadata();
        assert!(metadata.is_allow());
        assert_eq!(metadata.operation, RuleOperation::Metadata);

        let deny = Rule::deny_all(DENY_UNMATCHED_REASON);
        assert!(deny.is_deny_all());
        assert_eq!(deny.reason.as_deref(), Some(DENY_UNMATCHED_REASON));
    }

    #[test]
    fn test_allow_rule_name() {
        let rule = Rule::allow(
            RuleOperation::Read,
            RuleTarget::single("Observation"),
            RuleInstances::InCompartment {
                compartment: "Patient".into(),
                id: "123".into(),
            },
        );
        assert_eq!(rule.name, "allow-read-Observation-Patient/123");
        assert_eq!(rule.to_string(), "allow read Observation in Patient/123");
        assert!(!rule.is_deny_all());
    }

    #[test]
    fn test_target_covers() {
        let target = RuleTarget::single("Observation");
        assert!(target.covers(Some("Observation")));
        assert!(!target.covers(Some("Patient")));
        assert!(!target.covers(None));
        assert!(RuleTarget::AllResources.covers(None));
    }

    #[test]
    fn test_no_launch_context_reason() {
        assert_eq!(
            no_launch_context_reason("Patient"),
            "Deny ALL Patient requests if no launch context is given!"
        );
    }

    #[test]
    fn test_rule_serializes() {
        let rule = Rule::allow(
            RuleOperation::Write,
            RuleTarget::single("Observation"),
            RuleInstances::AnyId,
        );
        let json = serde_json::to_value(&rule).unwrap();
        assert_eq!(json["verdict"], "allow");
        assert_eq!(json["operation"], "write");
        assert_eq!(json["target"]["types"][0], "Observation");
        assert_eq!(json["instances"], "any_id");
        assert!(json.get("reason").is_none());
    }
}
