//! # octofhir-smart-auth
//!
//! SMART on FHIR clinical scope authorization for the OctoFHIR server.
//!
//! This crate provides:
//! - Parsing of `[compartment/]resource.operation` clinical scopes
//! - Compilation of scopes and launch context into first-match rule lists
//! - Search narrowing to the compartment instances a token authorizes
//! - A reference rule evaluator over FHIR compartment definitions
//!
//! ## Overview
//!
//! A request's bearer token is decoded by a [`TokenDecoder`]. Its scope claim
//! is parsed by the [`ScopeParser`], then either compiled into rules by the
//! [`AuthorizationEngine`] or turned into an [`AuthorizedList`] by the
//! [`SearchNarrowingEngine`]. Both engines are synchronous and share nothing
//! between requests apart from the read-only [`CompartmentRegistry`].
//!
//! ## Modules
//!
//! - [`config`] - Configuration and loader
//! - [`smart`] - SMART clinical scope grammar
//! - [`token`] - Bearer token extraction and JWT decoding
//! - [`compartment`] - Patient, Encounter and Practitioner compartments
//! - [`rules`] - Rule model, per-compartment builders and evaluator
//! - [`engine`] - Rule list compilation
//! - [`narrowing`] - Search narrowing
//! - [`response`] - OperationOutcome rejections

pub mod compartment;
pub mod config;
pub mod engine;
pub mod error;
pub mod narrowing;
pub mod observability;
pub mod request;
pub mod response;
pub mod rules;
pub mod smart;
pub mod token;

pub use compartment::{CompartmentChecker, CompartmentDefinition};
pub use config::{ConfigError, SmartAuthConfig};
pub use engine::AuthorizationEngine;
pub use error::{AuthError, ErrorCategory};
pub use narrowing::{AuthorizedList, CompartmentRef, NarrowingOutcome, SearchNarrowingEngine};
pub use request::{RequestDetails, RequestType};
pub use rules::{
    CompartmentRegistry, CompartmentRuleBuilder, Decision, OperationKind, OperationRequest, Rule,
    RuleEvaluator, StandardCompartmentRuleBuilder,
};
pub use smart::{ClinicalScope, ClinicalScopes, ScopeError, ScopeParser, SmartOperation};
pub use token::{JwtError, JwtTokenDecoder, TokenClaims, TokenDecoder};

/// Type alias for authorization results.
pub type AuthResult<T> = Result<T, AuthError>;

/// Prelude module for convenient imports.
///
/// ```ignore
/// use octofhir_smart_auth::prelude::*;
/// ```
pub mod prelude {
    pub use crate::AuthResult;
    pub use crate::compartment::CompartmentChecker;
    pub use crate::config::SmartAuthConfig;
    pub use crate::engine::AuthorizationEngine;
    pub use crate::error::AuthError;
    pub use crate::narrowing::{AuthorizedList, NarrowingOutcome, SearchNarrowingEngine};
    pub use crate::request::{RequestDetails, RequestType};
    pub use crate::rules::{
        CompartmentRegistry, Decision, OperationRequest, Rule, RuleEvaluator,
    };
    pub use crate::smart::{ClinicalScope, ScopeParser, SmartOperation};
    pub use crate::token::{TokenClaims, TokenDecoder};
}
