//! Authorization error types.
//!
//! This module defines the errors produced while compiling clinical scopes
//! into rules and while narrowing searches. Every variant is scoped to a
//! single request; nothing here is fatal to the process.

use std::fmt;

use axum::http::StatusCode;

use crate::smart::scopes::ScopeError;

/// Errors that can occur during SMART scope authorization.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// A scope claim could not be parsed.
    #[error(transparent)]
    Scope(#[from] ScopeError),

    /// A compartment scope was granted but the token carries no launch context id.
    #[error("No launch context given for compartment '{compartment}'")]
    MissingLaunchContext {
        /// The compartment whose claim was missing (e.g. `patient`).
        compartment: String,
    },

    /// The request must carry a usable token.
    #[error("Authentication required: {message}")]
    AuthenticationRequired {
        /// Description of why authentication is required.
        message: String,
    },

    /// The token's scopes do not grant the capability the operation needs.
    #[error("Insufficient scope: {message}")]
    InsufficientScope {
        /// Description of the missing capability.
        message: String,
    },

    /// A compiled rule denied the operation.
    #[error("Access denied by rule: {reason}")]
    AccessDenied {
        /// The denying rule's reason.
        reason: String,
    },

    /// The bearer token could not be decoded or verified.
    #[error("Invalid token: {message}")]
    InvalidToken {
        /// Description of why the token is invalid.
        message: String,
    },

    /// The authorization configuration is invalid.
    #[error("Configuration error: {message}")]
    Configuration {
        /// Description of the configuration error.
        message: String,
    },
}

impl AuthError {
    /// Creates a new `MissingLaunchContext` error.
    #[must_use]
    pub fn missing_launch_context(compartment: impl Into<String>) -> Self {
        Self::MissingLaunchContext {
            compartment: compartment.into(),
        }
    }

    /// Creates a new `AuthenticationRequired` error.
    #[must_use]
    pub fn authentication_required(message: impl Into<String>) -> Self {
        Self::AuthenticationRequired {
            message: message.into(),
        }
    }

    /// Creates a new `InsufficientScope` error.
    #[must_use]
    pub fn insufficient_scope(message: impl Into<String>) -> Self {
        Self::InsufficientScope {
            message: message.into(),
        }
    }

    /// Creates a new `AccessDenied` error.
    #[must_use]
    pub fn access_denied(reason: impl Into<String>) -> Self {
        Self::AccessDenied {
            reason: reason.into(),
        }
    }

    /// Creates a new `InvalidToken` error.
    #[must_use]
    pub fn invalid_token(message: impl Into<String>) -> Self {
        Self::InvalidToken {
            message: message.into(),
        }
    }

    /// Creates a new `Configuration` error.
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Returns `true` if the caller must (re)authenticate.
    #[must_use]
    pub fn is_authentication_error(&self) -> bool {
        matches!(
            self,
            Self::Scope(_) | Self::AuthenticationRequired { .. } | Self::InvalidToken { .. }
        )
    }

    /// Returns `true` if the caller is authenticated but not permitted.
    #[must_use]
    pub fn is_authorization_error(&self) -> bool {
        matches!(
            self,
            Self::MissingLaunchContext { .. }
                | Self::InsufficientScope { .. }
                | Self::AccessDenied { .. }
        )
    }

    /// Returns the error category for logging.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Scope(_) => ErrorCategory::Validation,
            Self::MissingLaunchContext { .. } => ErrorCategory::Authorization,
            Self::AuthenticationRequired { .. } => ErrorCategory::Authentication,
            Self::InsufficientScope { .. } | Self::AccessDenied { .. } => {
                ErrorCategory::Authorization
            }
            Self::InvalidToken { .. } => ErrorCategory::Token,
            Self::Configuration { .. } => ErrorCategory::Configuration,
        }
    }

    /// HTTP status used when this error rejects a request.
    ///
    /// Malformed scopes reject narrowing as an authentication failure, the
    /// same way a missing token does.
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Scope(_) | Self::AuthenticationRequired { .. } | Self::InvalidToken { .. } => {
                StatusCode::UNAUTHORIZED
            }
            Self::MissingLaunchContext { .. }
            | Self::InsufficientScope { .. }
            | Self::AccessDenied { .. } => StatusCode::FORBIDDEN,
            Self::Configuration { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns the OAuth 2.0 bearer-token error code for this error.
    #[must_use]
    pub fn oauth_error_code(&self) -> &'static str {
        match self {
            Self::Scope(_) => "invalid_scope",
            Self::MissingLaunchContext { .. } => "access_denied",
            Self::AuthenticationRequired { .. } => "unauthorized",
            Self::InsufficientScope { .. } => "insufficient_scope",
            Self::AccessDenied { .. } => "access_denied",
            Self::InvalidToken { .. } => "invalid_token",
            Self::Configuration { .. } => "server_error",
        }
    }
}

/// Categories of authorization errors for logging and monitoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Identity could not be established.
    Authentication,
    /// Identity established, permission missing.
    Authorization,
    /// Token decoding or verification.
    Token,
    /// Malformed input (scope grammar).
    Validation,
    /// Configuration errors.
    Configuration,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Authentication => write!(f, "authentication"),
            Self::Authorization => write!(f, "authorization"),
            Self::Token => write!(f, "token"),
            Self::Validation => write!(f, "validation"),
            Self::Configuration => write!(f, "configuration"),
        }
    }
}
