//! Per-compartment rule builders.

use std::collections::BTreeSet;
use std::fmt;

use crate::compartment::CompartmentDefinition;
use crate::smart::scopes::ClinicalScope;

use super::{Rule, RuleInstances, RuleOperation, RuleTarget, no_launch_context_reason};

/// Turns one clinical scope plus a launch context id into access rules for
/// resources in a compartment.
pub trait CompartmentRuleBuilder: Send + Sync + fmt::Debug {
    /// Returns `true` if this builder serves scopes with the given
    /// compartment prefix (e.g. `patient`).
    fn has_registered_resource(&self, compartment_name: &str) -> bool;

    /// The claim holding the launch context id for `compartment_name`.
    ///
    /// Claim names are lowercase, so `Patient/*.read` reads `patient`.
    fn launch_context_claim_name(&self, compartment_name: &str) -> String {
        compartment_name.to_ascii_lowercase()
    }

    /// Builds the rules granted by `scope` within the compartment instance
    /// `launch_context_id`.
    ///
    /// A missing or blank id yields a single deny-all rule.
    fn build_rules(&self, launch_context_id: Option<&str>, scope: &ClinicalScope) -> Vec<Rule>;
}

/// Rule builder backed by a [`CompartmentDefinition`].
#[derive(Debug, Clone)]
pub struct StandardCompartmentRuleBuilder {
    name: String,
    definition: CompartmentDefinition,
    resource_types: BTreeSet<String>,
}

impl StandardCompartmentRuleBuilder {
    /// Serves scopes prefixed with the lowercased definition code.
    #[must_use]
    pub fn new(definition: CompartmentDefinition) -> Self {
        let resource_types = definition.resource_types().into_iter().collect();
        Self {
            name: definition.code.to_ascii_lowercase(),
            definition,
            resource_types,
        }
    }

    #[must_use]
    pub fn patient() -> Self {
        Self::new(CompartmentDefinition::patient())
    }

    #[must_use]
    pub fn encounter() -> Self {
        Self::new(CompartmentDefinition::encounter())
    }

    #[must_use]
    pub fn practitioner() -> Self {
        Self::new(CompartmentDefinition::practitioner())
    }

    /// The scope prefix this builder serves.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The compartment resource type, e.g. `Patient`.
    #[must_use]
    pub fn compartment_type(&self) -> &str {
        &self.definition.code
    }
}

impl CompartmentRuleBuilder for StandardCompartmentRuleBuilder {
    fn has_registered_resource(&self, compartment_name: &str) -> bool {
        self.name.eq_ignore_ascii_case(compartment_name)
    }

    fn build_rules(&self, launch_context_id: Option<&str>, scope: &ClinicalScope) -> Vec<Rule> {
        let Some(id) = launch_context_id.map(str::trim).filter(|id| !id.is_empty()) else {
            tracing::debug!(
                compartment = %self.definition.code,
                scope = %scope,
                "No launch context, denying all"
            );
            return vec![Rule::deny_all(no_launch_context_reason(&self.definition.code))];
        };

        let target = if scope.is_wildcard() {
            RuleTarget::Types(self.resource_types.clone())
        } else {
            if !self.resource_types.contains(scope.resource()) {
                tracing::debug!(
                    compartment = %self.definition.code,
                    resource = scope.resource(),
                    "Scope names a resource type outside the compartment"
                );
            }
            RuleTarget::single(scope.resource())
        };
        let instances = RuleInstances::InCompartment {
            compartment: self.definition.code.clone(),
            id: id.to_string(),
        };

        let operation = scope.operation();
        let mut rules = Vec::with_capacity(2);
        if operation.grants_read() {
            rules.push(Rule::allow(RuleOperation::Read, target.clone(), instances.clone()));
        }
        if operation.grants_write() {
            rules.push(Rule::allow(RuleOperation::Write, target, instances));
        }
        rules
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::Verdict;

    fn scope(s: &str) -> ClinicalScope {
        ClinicalScope::parse(s).unwrap()
    }

    fn in_patient(id: &str) -> RuleInstances {
        RuleInstances::InCompartment {
            compartment: "Patient".into(),
            id: id.into(),
        }
    }

    #[test]
    fn test_registration() {
        let builder = StandardCompartmentRuleBuilder::patient();
        assert!(builder.has_registered_resource("patient"));
        assert!(!builder.has_registered_resource("encounter"));
        assert_eq!(builder.launch_context_claim_name("patient"), "patient");
        assert_eq!(builder.compartment_type(), "Patient");
    }

    #[test]
    fn test_claim_name_is_lowercase() {
        let builder = StandardCompartmentRuleBuilder::patient();
        assert!(builder.has_registered_resource("Patient"));
        assert_eq!(builder.launch_context_claim_name("Patient"), "patient");
        assert_eq!(builder.launch_context_claim_name("PATIENT"), "patient");
    }

    #[test]
    fn test_wildcard_read_expands_to_compartment_types() {
        let builder = StandardCompartmentRuleBuilder::patient();
        let rules = builder.build_rules(Some("123"), &scope("patient/*.read"));

        assert_eq!(rules.len(), 1);
        let rule = &rules[0];
        assert_eq!(rule.verdict, Verdict::Allow);
        assert_eq!(rule.operation, RuleOperation::Read);
        assert_eq!(rule.instances, in_patient("123"));
        let RuleTarget::Types(types) = &rule.target else {
            panic!("expected typed target");
        };
        let expected: BTreeSet<String> = CompartmentDefinition::patient()
            .resource_types()
            .into_iter()
            .collect();
        assert_eq!(types, &expected);
    }

    #[test]
    fn test_specific_resource() {
        let builder = StandardCompartmentRuleBuilder::patient();
        let rules = builder.build_rules(Some("123"), &scope("patient/Observation.write"));

        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].operation, RuleOperation::Write);
        assert_eq!(rules[0].target, RuleTarget::single("Observation"));
    }

    #[test]
    fn test_all_expands_to_read_and_write() {
        let builder = StandardCompartmentRuleBuilder::encounter();
        let rules = builder.build_rules(Some("e1"), &scope("encounter/Observation.*"));

        let ops: Vec<RuleOperation> = rules.iter().map(|r| r.operation).collect();
        assert_eq!(ops, vec![RuleOperation::Read, RuleOperation::Write]);
    }

    #[test]
    fn test_missing_launch_context_denies_all() {
        let builder = StandardCompartmentRuleBuilder::patient();

        for ctx in [None, Some(""), Some("  ")] {
            let rules = builder.build_rules(ctx, &scope("patient/Observation.read"));
            assert_eq!(rules.len(), 1);
            assert!(rules[0].is_deny_all());
            assert_eq!(
                rules[0].reason.as_deref(),
                Some("Deny ALL Patient requests if no launch context is given!")
            );
        }
    }
}
