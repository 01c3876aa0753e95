//! Search narrowing to authorized compartment instances.
//!
//! Searches are bounded to the compartment instances named by the token's
//! launch context. The policy is strict: any ambiguity rejects the search
//! instead of widening or emptying it silently.

use std::fmt;
use std::sync::Arc;

use indexmap::IndexSet;
use serde::Serialize;
use serde_json::Value;

use crate::compartment::CompartmentChecker;
use crate::config::{NarrowingConfig, SmartAuthConfig};
use crate::error::AuthError;
use crate::smart::scopes::{ScopeParser, SmartOperation};
use crate::token::{JwtTokenDecoder, TokenClaims, TokenDecoder, extract_bearer_token};
use crate::{AuthResult, request::RequestDetails};

const READ_SCOPE_REQUIRED: &str =
    "Read scope is required when performing a narrowing search operation";

/// One compartment instance, e.g. `Patient/123`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct CompartmentRef {
    pub compartment: String,
    pub id: String,
}

impl fmt::Display for CompartmentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.compartment, self.id)
    }
}

/// Compartment instances a search may return results from.
///
/// Keeps the order of first insertion; duplicates are dropped.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct AuthorizedList {
    compartments: IndexSet<CompartmentRef>,
}

impl AuthorizedList {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a compartment instance; returns `false` if already present.
    pub fn add_compartment(&mut self, compartment: impl Into<String>, id: impl Into<String>) -> bool {
        self.compartments.insert(CompartmentRef {
            compartment: compartment.into(),
            id: id.into(),
        })
    }

    pub fn compartments(&self) -> impl Iterator<Item = &CompartmentRef> {
        self.compartments.iter()
    }

    /// `Type/id` references, in insertion order.
    #[must_use]
    pub fn references(&self) -> Vec<String> {
        self.compartments.iter().map(ToString::to_string).collect()
    }

    /// Returns `true` if no compartment is authorized, meaning the search
    /// may return nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.compartments.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.compartments.len()
    }

    /// Returns `true` if `resource` belongs to any authorized compartment.
    #[must_use]
    pub fn permits(&self, resource: &Value, checker: &CompartmentChecker) -> bool {
        self.compartments
            .iter()
            .any(|c| checker.is_in_compartment(&c.compartment, &c.id, resource))
    }

    /// Search parameters that restrict `resource_type` to the authorized
    /// compartments, as `(param, "Type/id")` pairs.
    ///
    /// A search on the compartment type itself narrows by `_id`.
    #[must_use]
    pub fn search_params(
        &self,
        resource_type: &str,
        checker: &CompartmentChecker,
    ) -> Vec<(String, String)> {
        self.compartments
            .iter()
            .flat_map(|c| {
                if c.compartment == resource_type {
                    vec![("_id".to_string(), c.id.clone())]
                } else {
                    checker
                        .search_params(&c.compartment, &c.id, resource_type)
                        .unwrap_or_default()
                }
            })
            .collect()
    }
}

/// Result of narrowing a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "narrowing", content = "compartments", rename_all = "snake_case")]
pub enum NarrowingOutcome {
    /// Not a search, or an exempt operation.
    NotRequired,
    /// Results must be limited to these compartments (possibly none).
    Narrowed(AuthorizedList),
}

impl NarrowingOutcome {
    #[must_use]
    pub fn authorized_list(&self) -> Option<&AuthorizedList> {
        match self {
            Self::NotRequired => None,
            Self::Narrowed(list) => Some(list),
        }
    }
}

/// Derives authorized compartment lists for searches.
#[derive(Clone)]
pub struct SearchNarrowingEngine {
    decoder: Arc<dyn TokenDecoder>,
    parser: ScopeParser,
    config: NarrowingConfig,
}

impl fmt::Debug for SearchNarrowingEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SearchNarrowingEngine")
            .field("parser", &self.parser)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl SearchNarrowingEngine {
    #[must_use]
    pub fn new(decoder: Arc<dyn TokenDecoder>, config: NarrowingConfig) -> Self {
        Self {
            decoder,
            parser: ScopeParser::default(),
            config,
        }
    }

    #[must_use]
    pub fn with_parser(mut self, parser: ScopeParser) -> Self {
        self.parser = parser;
        self
    }

    /// Builds an engine with a JWT decoder and the configured narrowing and
    /// scope settings.
    ///
    /// Returns `None` when `enabled` is off; searches are not narrowed then.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Configuration` if the token key is invalid.
    pub fn from_config(config: &SmartAuthConfig) -> AuthResult<Option<Self>> {
        if !config.enabled {
            tracing::info!("SMART search narrowing disabled");
            return Ok(None);
        }
        let decoder = JwtTokenDecoder::from_config(&config.token)
            .map_err(|e| AuthError::configuration(e.to_string()))?;
        let parser = ScopeParser::with_non_clinical(config.scopes.non_clinical.iter());
        Ok(Some(
            Self::new(Arc::new(decoder), config.narrowing.clone()).with_parser(parser),
        ))
    }

    /// Builds the authorized list for `request`.
    ///
    /// # Errors
    ///
    /// - `AuthenticationRequired` without a bearer token or for a scope with
    ///   no compartment
    /// - `InvalidToken` if the token cannot be decoded
    /// - `Scope` for a malformed scope claim
    /// - `InsufficientScope` for a write-only scope
    /// - `MissingLaunchContext` if a compartment's claim is absent
    pub fn build_authorized_list(&self, request: &RequestDetails) -> AuthResult<NarrowingOutcome> {
        if !self.requires_narrowing(request) {
            return Ok(NarrowingOutcome::NotRequired);
        }

        let token = extract_bearer_token(request).ok_or_else(|| {
            AuthError::authentication_required("a bearer token is required for narrowing searches")
        })?;
        let claims = self.decoder.decode(token).map_err(|e| {
            tracing::warn!(error = %e, "Bearer token rejected during search narrowing");
            AuthError::invalid_token(e.to_string())
        })?;

        self.narrow_for_claims(request, &claims)
    }

    /// Narrows `request` with already decoded claims.
    ///
    /// # Errors
    ///
    /// Same as [`build_authorized_list`](Self::build_authorized_list), minus
    /// the token errors.
    pub fn narrow_for_claims(
        &self,
        request: &RequestDetails,
        claims: &TokenClaims,
    ) -> AuthResult<NarrowingOutcome> {
        if !self.requires_narrowing(request) {
            return Ok(NarrowingOutcome::NotRequired);
        }

        let list = self.authorized_list_for_claims(claims)?;
        tracing::debug!(
            resource = ?request.resource_name,
            compartments = ?list.references(),
            "Search narrowed"
        );
        Ok(NarrowingOutcome::Narrowed(list))
    }

    /// Returns `true` for searches whose operation is not exempt.
    #[must_use]
    pub fn requires_narrowing(&self, request: &RequestDetails) -> bool {
        if let Some(op) = request.operation.as_deref()
            && self.config.is_exempt(op)
        {
            return false;
        }
        request.is_search()
    }

    /// Builds the authorized list from decoded claims.
    ///
    /// # Errors
    ///
    /// Same as [`build_authorized_list`](Self::build_authorized_list), minus
    /// the token errors.
    pub fn authorized_list_for_claims(&self, claims: &TokenClaims) -> AuthResult<AuthorizedList> {
        let scopes = self.parser.parse(&claims.scope())?;

        let mut list = AuthorizedList::new();
        for scope in &scopes {
            let Some(compartment) = scope.compartment() else {
                return Err(AuthError::authentication_required(format!(
                    "scope '{scope}' has no compartment and cannot narrow a search"
                )));
            };
            if scope.operation() == SmartOperation::Write {
                return Err(AuthError::insufficient_scope(READ_SCOPE_REQUIRED));
            }
            let id = claims
                .launch_context(&compartment.to_ascii_lowercase())
                .ok_or_else(|| AuthError::missing_launch_context(compartment))?;
            let compartment_type = scope
                .compartment_type()
                .unwrap_or_else(|| compartment.to_string());
            list.add_compartment(compartment_type, id);
        }
        Ok(list)
    }
}
