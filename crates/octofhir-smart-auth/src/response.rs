//! HTTP rejection responses.
//!
//! `AuthError` renders as a FHIR OperationOutcome. 401 responses carry a
//! `WWW-Authenticate: Bearer` challenge.

use std::fmt;

use axum::{
    Json,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Serialize;

use crate::error::AuthError;

/// Coding system of the OAuth error code attached to each issue.
pub const OAUTH_ERROR_SYSTEM: &str = "https://tools.ietf.org/html/rfc6749";

const FHIR_JSON: &str = "application/fhir+json";

/// Minimal OperationOutcome carrying one issue.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationOutcome {
    resource_type: &'static str,
    pub issue: Vec<OutcomeIssue>,
}

#[derive(Debug, Clone, Serialize)]
pub struct OutcomeIssue {
    pub severity: &'static str,
    pub code: &'static str,
    pub details: CodeableConcept,
    pub diagnostics: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CodeableConcept {
    pub coding: Vec<Coding>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Coding {
    pub system: &'static str,
    pub code: &'static str,
}

impl From<&AuthError> for OperationOutcome {
    fn from(error: &AuthError) -> Self {
        Self {
            resource_type: "OperationOutcome",
            issue: vec![OutcomeIssue {
                severity: "error",
                code: issue_code(error),
                details: CodeableConcept {
                    coding: vec![Coding {
                        system: OAUTH_ERROR_SYSTEM,
                        code: error.oauth_error_code(),
                    }],
                },
                diagnostics: error.to_string(),
            }],
        }
    }
}

/// FHIR issue type for an error.
fn issue_code(error: &AuthError) -> &'static str {
    match error {
        AuthError::Scope(_)
        | AuthError::AuthenticationRequired { .. }
        | AuthError::InvalidToken { .. } => "security",
        AuthError::MissingLaunchContext { .. }
        | AuthError::InsufficientScope { .. }
        | AuthError::AccessDenied { .. } => "forbidden",
        AuthError::Configuration { .. } => "exception",
    }
}

/// Bearer challenge sent with 401 responses.
struct BearerChallenge<'a> {
    error: &'a str,
    description: &'a str,
}

impl fmt::Display for BearerChallenge<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Bearer realm=\"octofhir\", error=\"{}\", error_description=\"{}\"",
            self.error,
            self.description.replace('"', "\\\"")
        )
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let outcome = OperationOutcome::from(&self);

        let mut response = (status, Json(outcome)).into_response();
        let headers = response.headers_mut();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(FHIR_JSON));

        if status == StatusCode::UNAUTHORIZED {
            let description = self.to_string();
            let challenge = BearerChallenge {
                error: self.oauth_error_code(),
                description: &description,
            };
            match HeaderValue::from_str(&challenge.to_string()) {
                Ok(value) => {
                    headers.insert(header::WWW_AUTHENTICATE, value);
                }
                Err(e) => tracing::warn!(error = %e, "Unrepresentable WWW-Authenticate challenge"),
            }
        }

        response
    }
}
