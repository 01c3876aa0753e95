//! SMART on FHIR clinical scope parsing.
//!
//! Clinical scopes follow the SMART v1 grammar: `[compartment/]Resource.operation`
//!
//! - **Compartment** (optional): `patient`, `encounter`, `practitioner`, ...
//! - **Resource**: a FHIR resource type (e.g. `Observation`) or `*` for all types
//! - **Operation**: `read`, `write` or `*` (both)
//!
//! # Examples
//!
//! ```
//! use octofhir_smart_auth::smart::scopes::{ScopeParser, SmartOperation};
//!
//! let scopes = ScopeParser::strict()
//!     .parse("patient/Observation.read patient/*.write")
//!     .unwrap();
//! assert_eq!(scopes.len(), 2);
//!
//! let first = scopes.iter().next().unwrap();
//! assert_eq!(first.compartment(), Some("patient"));
//! assert_eq!(first.resource(), "Observation");
//! assert_eq!(first.operation(), SmartOperation::Read);
//! ```

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use indexmap::IndexSet;
use serde::Serialize;

/// Wildcard resource segment granting every resource type.
pub const WILDCARD_RESOURCE: &str = "*";

/// SMART launch and identity scopes that carry no clinical grant.
pub const STANDARD_NON_CLINICAL_SCOPES: &[&str] = &[
    "openid",
    "profile",
    "fhirUser",
    "launch",
    "launch/patient",
    "launch/encounter",
    "offline_access",
    "online_access",
];

// ============================================================================
// Error Types
// ============================================================================

/// Errors that can occur while parsing a scope claim.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScopeError {
    /// The scope token does not match `[compartment/]resource.operation`.
    #[error("Invalid clinical scope '{scope}': expected [compartment/]resource.operation")]
    InvalidClinicalScopeKind {
        /// The offending scope token.
        scope: String,
    },

    /// The operation segment is not one of `read`, `write` or `*`.
    #[error("Invalid operation '{operation}' in scope '{scope}': expected read, write or *")]
    InvalidOperationKind {
        /// The offending scope token.
        scope: String,
        /// The unrecognised operation segment.
        operation: String,
    },
}

impl ScopeError {
    /// Creates a new `InvalidClinicalScopeKind` error.
    #[must_use]
    pub fn invalid_clinical_scope(scope: impl Into<String>) -> Self {
        Self::InvalidClinicalScopeKind {
            scope: scope.into(),
        }
    }

    /// Creates a new `InvalidOperationKind` error.
    #[must_use]
    pub fn invalid_operation(scope: impl Into<String>, operation: impl Into<String>) -> Self {
        Self::InvalidOperationKind {
            scope: scope.into(),
            operation: operation.into(),
        }
    }
}

// ============================================================================
// Operation
// ============================================================================

/// Access level granted by a clinical scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SmartOperation {
    /// `read`
    Read,
    /// `write`
    Write,
    /// `*`, equivalent to both read and write.
    All,
}

impl SmartOperation {
    /// Returns the scope-grammar spelling of the operation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
            Self::All => "*",
        }
    }

    /// Returns true if the operation grants read access.
    #[must_use]
    pub fn grants_read(&self) -> bool {
        matches!(self, Self::Read | Self::All)
    }

    /// Returns true if the operation grants write access.
    #[must_use]
    pub fn grants_write(&self) -> bool {
        matches!(self, Self::Write | Self::All)
    }
}

impl fmt::Display for SmartOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SmartOperation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "read" => Ok(Self::Read),
            "write" => Ok(Self::Write),
            "*" => Ok(Self::All),
            other => Err(other.to_string()),
        }
    }
}

// ============================================================================
// Clinical Scope
// ============================================================================

/// A single parsed clinical scope.
///
/// A scope without a compartment (e.g. `Observation.read`) parses fine but
/// never grants access on its own.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ClinicalScope {
    compartment: Option<String>,
    resource: String,
    operation: SmartOperation,
}

impl ClinicalScope {
    /// Creates a scope from its parts.
    #[must_use]
    pub fn new(
        compartment: Option<&str>,
        resource: impl Into<String>,
        operation: SmartOperation,
    ) -> Self {
        Self {
            compartment: compartment.filter(|c| !c.is_empty()).map(str::to_string),
            resource: resource.into(),
            operation,
        }
    }

    /// Parse a single scope token.
    ///
    /// The operation is split off at the last `.`, the compartment at `/`.
    ///
    /// # Errors
    ///
    /// Returns `ScopeError::InvalidClinicalScopeKind` if the token does not
    /// match the grammar and `ScopeError::InvalidOperationKind` if the
    /// operation segment is unknown.
    pub fn parse(token: &str) -> Result<Self, ScopeError> {
        let (path, operation) = token
            .rsplit_once('.')
            .ok_or_else(|| ScopeError::invalid_clinical_scope(token))?;

        let (compartment, resource) = match path.split_once('/') {
            Some((compartment, resource)) => (Some(compartment), resource),
            None => (None, path),
        };

        if let Some(compartment) = compartment
            && !is_valid_compartment(compartment)
        {
            return Err(ScopeError::invalid_clinical_scope(token));
        }
        if !is_valid_resource(resource) {
            return Err(ScopeError::invalid_clinical_scope(token));
        }

        let operation = operation
            .parse::<SmartOperation>()
            .map_err(|op| ScopeError::invalid_operation(token, op))?;

        Ok(Self::new(compartment, resource, operation))
    }

    /// The compartment name as written in the scope, if any.
    #[must_use]
    pub fn compartment(&self) -> Option<&str> {
        self.compartment.as_deref()
    }

    /// The FHIR resource type of the compartment (`patient` -> `Patient`).
    #[must_use]
    pub fn compartment_type(&self) -> Option<String> {
        self.compartment.as_deref().map(compartment_resource_type)
    }

    /// The resource type, or `*`.
    #[must_use]
    pub fn resource(&self) -> &str {
        &self.resource
    }

    /// The granted access level.
    #[must_use]
    pub fn operation(&self) -> SmartOperation {
        self.operation
    }

    /// Returns true if the scope covers every resource type.
    #[must_use]
    pub fn is_wildcard(&self) -> bool {
        self.resource == WILDCARD_RESOURCE
    }
}

impl fmt::Display for ClinicalScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(ref compartment) = self.compartment {
            write!(f, "{}/", compartment)?;
        }
        write!(f, "{}.{}", self.resource, self.operation)
    }
}

impl FromStr for ClinicalScope {
    type Err = ScopeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Maps a compartment name to its FHIR resource type (`encounter` -> `Encounter`).
#[must_use]
pub fn compartment_resource_type(compartment: &str) -> String {
    let mut chars = compartment.chars();
    match chars.next() {
        Some(first) => first.to_ascii_uppercase().to_string() + &chars.as_str().to_ascii_lowercase(),
        None => String::new(),
    }
}

fn is_valid_compartment(segment: &str) -> bool {
    !segment.is_empty() && segment.chars().all(|c| c.is_ascii_alphabetic())
}

fn is_valid_resource(segment: &str) -> bool {
    segment == WILDCARD_RESOURCE
        || (!segment.is_empty() && segment.chars().all(|c| c.is_ascii_alphanumeric()))
}

// ============================================================================
// Scope Set
// ============================================================================

/// The de-duplicated set of clinical scopes from one token.
///
/// Iteration follows the order of first appearance in the scope claim, which
/// keeps the compiled rule list deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClinicalScopes(IndexSet<ClinicalScope>);

impl ClinicalScopes {
    /// Number of distinct scopes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if no clinical scope was granted.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate scopes in claim order.
    pub fn iter(&self) -> impl Iterator<Item = &ClinicalScope> {
        self.0.iter()
    }

    /// Returns true if the set holds this exact scope.
    #[must_use]
    pub fn contains(&self, scope: &ClinicalScope) -> bool {
        self.0.contains(scope)
    }
}

impl<'a> IntoIterator for &'a ClinicalScopes {
    type Item = &'a ClinicalScope;
    type IntoIter = indexmap::set::Iter<'a, ClinicalScope>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl FromIterator<ClinicalScope> for ClinicalScopes {
    fn from_iter<I: IntoIterator<Item = ClinicalScope>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

// ============================================================================
// Parser
// ============================================================================

/// Parses space-separated scope claims into [`ClinicalScopes`].
///
/// Tokens listed as non-clinical (launch and identity scopes) are skipped;
/// any other token must match the clinical grammar.
#[derive(Debug, Clone)]
pub struct ScopeParser {
    non_clinical: HashSet<String>,
}

impl Default for ScopeParser {
    fn default() -> Self {
        Self::with_non_clinical(STANDARD_NON_CLINICAL_SCOPES.iter().copied())
    }
}

impl ScopeParser {
    /// A parser that accepts clinical scopes only.
    #[must_use]
    pub fn strict() -> Self {
        Self {
            non_clinical: HashSet::new(),
        }
    }

    /// A parser that skips the given non-clinical scope tokens.
    #[must_use]
    pub fn with_non_clinical<I, S>(scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            non_clinical: scopes.into_iter().map(Into::into).collect(),
        }
    }

    /// Parse a scope claim.
    ///
    /// An empty or whitespace-only claim yields an empty set.
    ///
    /// # Errors
    ///
    /// Fails on the first token that is neither non-clinical nor a valid
    /// clinical scope; a malformed token invalidates the whole claim.
    pub fn parse(&self, scope_claim: &str) -> Result<ClinicalScopes, ScopeError> {
        scope_claim
            .split_whitespace()
            .filter(|token| !self.non_clinical.contains(*token))
            .map(ClinicalScope::parse)
            .collect()
    }
}

// ============================================================================
// Tests
// ============================================================================
