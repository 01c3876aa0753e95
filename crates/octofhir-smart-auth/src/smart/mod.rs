//! SMART on FHIR clinical scopes.

pub mod scopes;

pub use scopes::{
    ClinicalScope, ClinicalScopes, STANDARD_NON_CLINICAL_SCOPES, ScopeError, ScopeParser,
    SmartOperation, WILDCARD_RESOURCE, compartment_resource_type,
};
