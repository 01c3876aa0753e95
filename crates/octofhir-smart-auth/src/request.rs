//! Request details consumed by the authorization engines.
//!
//! The engines never see the HTTP body; they only need the interaction
//! shape of a FHIR REST call (verb, resource type, id, named operation) and
//! the raw `Authorization` header.

use std::fmt;

use axum::http::{Method, header::AUTHORIZATION, request::Parts};

/// The name of the capability-statement interaction.
pub const METADATA_OPERATION: &str = "metadata";

/// HTTP verb of a FHIR interaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestType {
    Get,
    Head,
    Post,
    Put,
    Patch,
    Delete,
    Options,
}

impl RequestType {
    /// Maps an HTTP method, returning `None` for verbs FHIR does not use.
    #[must_use]
    pub fn from_method(method: &Method) -> Option<Self> {
        match *method {
            Method::GET => Some(Self::Get),
            Method::HEAD => Some(Self::Head),
            Method::POST => Some(Self::Post),
            Method::PUT => Some(Self::Put),
            Method::PATCH => Some(Self::Patch),
            Method::DELETE => Some(Self::Delete),
            Method::OPTIONS => Some(Self::Options),
            _ => None,
        }
    }
}

impl fmt::Display for RequestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Get => "GET",
            Self::Head => "HEAD",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
            Self::Options => "OPTIONS",
        };
        f.write_str(s)
    }
}

/// A FHIR REST request as seen by the authorization layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestDetails {
    /// HTTP verb.
    pub request_type: RequestType,
    /// Target resource type (`Observation` in `/Observation/1`).
    pub resource_name: Option<String>,
    /// Target resource id.
    pub resource_id: Option<String>,
    /// Named operation: `metadata`, `_search`, `$everything`, ...
    pub operation: Option<String>,
    /// Raw `Authorization` header value.
    pub authorization: Option<String>,
}

impl RequestDetails {
    /// Creates a request with no target and no credentials.
    #[must_use]
    pub fn new(request_type: RequestType) -> Self {
        Self {
            request_type,
            resource_name: None,
            resource_id: None,
            operation: None,
            authorization: None,
        }
    }

    /// `GET [base]/metadata`
    #[must_use]
    pub fn metadata() -> Self {
        Self::new(RequestType::Get).with_operation(METADATA_OPERATION)
    }

    /// Sets the target resource type.
    #[must_use]
    pub fn with_resource(mut self, resource_name: impl Into<String>) -> Self {
        self.resource_name = Some(resource_name.into());
        self
    }

    /// Sets the target resource id.
    #[must_use]
    pub fn with_id(mut self, resource_id: impl Into<String>) -> Self {
        self.resource_id = Some(resource_id.into());
        self
    }

    /// Sets the named operation.
    #[must_use]
    pub fn with_operation(mut self, operation: impl Into<String>) -> Self {
        self.operation = Some(operation.into());
        self
    }

    /// Sets the `Authorization` header value.
    #[must_use]
    pub fn with_authorization(mut self, header: impl Into<String>) -> Self {
        self.authorization = Some(header.into());
        self
    }

    /// Shorthand for `Authorization: Bearer <token>`.
    #[must_use]
    pub fn with_bearer(self, token: &str) -> Self {
        self.with_authorization(format!("Bearer {token}"))
    }

    /// Derives request details from HTTP request parts.
    ///
    /// `base_path` is the FHIR base (e.g. `/fhir`); paths outside it yield
    /// no resource target.
    #[must_use]
    pub fn from_parts(parts: &Parts, base_path: &str) -> Option<Self> {
        let request_type = RequestType::from_method(&parts.method)?;
        let mut details = Self::new(request_type);

        details.authorization = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|h| h.to_str().ok())
            .map(ToString::to_string);

        let base = base_path.trim_end_matches('/');
        let rest = match parts.uri.path().strip_prefix(base) {
            Some(rest) if rest.is_empty() || rest.starts_with('/') => rest,
            _ => return Some(details),
        };
        let segments: Vec<&str> = rest.split('/').filter(|s| !s.is_empty()).collect();

        match segments.as_slice() {
            [] => {}
            [op] if is_operation_segment(op) => details.operation = Some((*op).to_string()),
            [resource] => details.resource_name = Some((*resource).to_string()),
            [resource, op] if is_operation_segment(op) => {
                details.resource_name = Some((*resource).to_string());
                details.operation = Some((*op).to_string());
            }
            [resource, id, rest @ ..] => {
                details.resource_name = Some((*resource).to_string());
                details.resource_id = Some((*id).to_string());
                if let Some(op) = rest.iter().find(|s| s.starts_with('$')) {
                    details.operation = Some((*op).to_string());
                }
            }
        }

        Some(details)
    }

    /// Returns true for the capability-statement interaction.
    #[must_use]
    pub fn is_metadata(&self) -> bool {
        self.operation.as_deref() == Some(METADATA_OPERATION)
    }

    /// Returns true for type- or system-level searches.
    #[must_use]
    pub fn is_search(&self) -> bool {
        if self.resource_id.is_some() {
            return false;
        }
        match self.request_type {
            RequestType::Get | RequestType::Head => self.operation.is_none(),
            RequestType::Post => self.operation.as_deref() == Some("_search"),
            _ => false,
        }
    }
}

fn is_operation_segment(segment: &str) -> bool {
    segment == METADATA_OPERATION || segment.starts_with('$') || segment.starts_with('_')
}
