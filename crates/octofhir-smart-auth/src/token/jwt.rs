//! JWT bearer token verification.
//!
//! [`JwtTokenDecoder`] verifies access tokens issued by an external
//! authorization server and exposes their claims. Keys are configured
//! statically (HMAC secret or PEM public key); fetching keys from a JWKS
//! endpoint is left to the host.
//!
//! ## Example
//!
//! ```ignore
//! use octofhir_smart_auth::config::TokenConfig;
//! use octofhir_smart_auth::token::{JwtTokenDecoder, TokenDecoder};
//!
//! let decoder = JwtTokenDecoder::from_config(&token_config)?;
//! let claims = decoder.decode(raw_token)?;
//! println!("scopes: {}", claims.scope());
//! ```

use std::fmt;
use std::str::FromStr;

use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use serde_json::{Map, Value};

use super::TokenDecoder;
use super::claims::TokenClaims;
use crate::config::TokenConfig;

// ============================================================================
// Error Types
// ============================================================================

/// Errors that can occur while verifying a JWT.
#[derive(Debug, thiserror::Error)]
pub enum JwtError {
    /// The token could not be decoded.
    #[error("Failed to decode token: {message}")]
    DecodingError {
        /// Description of the decoding error.
        message: String,
    },

    /// The token has expired.
    #[error("Token expired")]
    Expired,

    /// The token signature is invalid.
    #[error("Invalid signature")]
    InvalidSignature,

    /// The token claims are invalid (issuer, audience, required claims).
    #[error("Invalid claims: {message}")]
    InvalidClaims {
        /// Description of why claims are invalid.
        message: String,
    },

    /// Invalid key format or data.
    #[error("Invalid key: {message}")]
    InvalidKey {
        /// Description of why the key is invalid.
        message: String,
    },
}

impl JwtError {
    /// Creates a new `DecodingError`.
    #[must_use]
    pub fn decoding_error(message: impl Into<String>) -> Self {
        Self::DecodingError {
            message: message.into(),
        }
    }

    /// Creates a new `InvalidClaims` error.
    #[must_use]
    pub fn invalid_claims(message: impl Into<String>) -> Self {
        Self::InvalidClaims {
            message: message.into(),
        }
    }

    /// Creates a new `InvalidKey` error.
    #[must_use]
    pub fn invalid_key(message: impl Into<String>) -> Self {
        Self::InvalidKey {
            message: message.into(),
        }
    }

    /// Returns `true` if the token itself failed validation (as opposed to
    /// a misconfigured key).
    #[must_use]
    pub fn is_validation_error(&self) -> bool {
        matches!(
            self,
            Self::Expired | Self::InvalidSignature | Self::InvalidClaims { .. }
        )
    }
}

impl From<jsonwebtoken::errors::Error> for JwtError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        use jsonwebtoken::errors::ErrorKind;

        match err.kind() {
            ErrorKind::ExpiredSignature => Self::Expired,
            ErrorKind::InvalidSignature => Self::InvalidSignature,
            ErrorKind::InvalidToken
            | ErrorKind::InvalidAlgorithm
            | ErrorKind::InvalidAlgorithmName
            | ErrorKind::MissingAlgorithm => Self::decoding_error(err.to_string()),
            ErrorKind::InvalidAudience
            | ErrorKind::InvalidIssuer
            | ErrorKind::InvalidSubject
            | ErrorKind::ImmatureSignature
            | ErrorKind::MissingRequiredClaim(_) => Self::invalid_claims(err.to_string()),
            ErrorKind::InvalidRsaKey(_)
            | ErrorKind::InvalidEcdsaKey
            | ErrorKind::InvalidKeyFormat => Self::invalid_key(err.to_string()),
            _ => Self::decoding_error(err.to_string()),
        }
    }
}

// ============================================================================
// Verification Algorithm
// ============================================================================

/// Algorithms accepted for access-token signatures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VerificationAlgorithm {
    HS256,
    HS384,
    HS512,
    RS256,
    RS384,
    ES256,
    ES384,
}

impl VerificationAlgorithm {
    /// Converts to the `jsonwebtoken` Algorithm type.
    #[must_use]
    pub fn to_jwt_algorithm(self) -> Algorithm {
        match self {
            Self::HS256 => Algorithm::HS256,
            Self::HS384 => Algorithm::HS384,
            Self::HS512 => Algorithm::HS512,
            Self::RS256 => Algorithm::RS256,
            Self::RS384 => Algorithm::RS384,
            Self::ES256 => Algorithm::ES256,
            Self::ES384 => Algorithm::ES384,
        }
    }

    /// Returns the algorithm name as used in JWT headers.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::HS256 => "HS256",
            Self::HS384 => "HS384",
            Self::HS512 => "HS512",
            Self::RS256 => "RS256",
            Self::RS384 => "RS384",
            Self::ES256 => "ES256",
            Self::ES384 => "ES384",
        }
    }

    /// Returns `true` for shared-secret algorithms.
    #[must_use]
    pub fn is_hmac(&self) -> bool {
        matches!(self, Self::HS256 | Self::HS384 | Self::HS512)
    }

    /// Returns `true` if this is an RSA-based algorithm.
    #[must_use]
    pub fn is_rsa(&self) -> bool {
        matches!(self, Self::RS256 | Self::RS384)
    }

    /// Returns `true` if this is an EC-based algorithm.
    #[must_use]
    pub fn is_ec(&self) -> bool {
        matches!(self, Self::ES256 | Self::ES384)
    }
}

impl fmt::Display for VerificationAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for VerificationAlgorithm {
    type Err = JwtError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "HS256" => Ok(Self::HS256),
            "HS384" => Ok(Self::HS384),
            "HS512" => Ok(Self::HS512),
            "RS256" => Ok(Self::RS256),
            "RS384" => Ok(Self::RS384),
            "ES256" => Ok(Self::ES256),
            "ES384" => Ok(Self::ES384),
            other => Err(JwtError::invalid_key(format!(
                "unsupported algorithm '{other}'"
            ))),
        }
    }
}

// ============================================================================
// Decoder
// ============================================================================

/// Verifies JWT access tokens with a statically configured key.
pub struct JwtTokenDecoder {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl fmt::Debug for JwtTokenDecoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JwtTokenDecoder")
            .field("algorithms", &self.validation.algorithms)
            .finish_non_exhaustive()
    }
}

impl JwtTokenDecoder {
    /// Creates a decoder from a key and validation settings.
    #[must_use]
    pub fn new(decoding_key: DecodingKey, validation: Validation) -> Self {
        Self {
            decoding_key,
            validation,
        }
    }

    /// Creates an HMAC decoder for the given shared secret.
    #[must_use]
    pub fn hmac(algorithm: VerificationAlgorithm, secret: &[u8]) -> Self {
        Self::new(
            DecodingKey::from_secret(secret),
            Validation::new(algorithm.to_jwt_algorithm()),
        )
    }

    /// Builds a decoder from token configuration.
    ///
    /// # Errors
    ///
    /// Returns `JwtError::InvalidKey` if the algorithm is unknown or the key
    /// material is missing or malformed.
    pub fn from_config(config: &TokenConfig) -> Result<Self, JwtError> {
        let algorithm: VerificationAlgorithm = config.algorithm.parse()?;

        let decoding_key = if algorithm.is_hmac() {
            let secret = config
                .secret
                .as_deref()
                .filter(|s| !s.is_empty())
                .ok_or_else(|| JwtError::invalid_key("token.secret is required for HMAC"))?;
            DecodingKey::from_secret(secret.as_bytes())
        } else {
            let pem = config
                .public_key_pem
                .as_deref()
                .filter(|s| !s.is_empty())
                .ok_or_else(|| {
                    JwtError::invalid_key(format!("token.public_key_pem is required for {algorithm}"))
                })?;
            if algorithm.is_rsa() {
                DecodingKey::from_rsa_pem(pem.as_bytes())?
            } else {
                DecodingKey::from_ec_pem(pem.as_bytes())?
            }
        };

        let mut validation = Validation::new(algorithm.to_jwt_algorithm());
        validation.leeway = config.leeway.as_secs();
        validation.validate_exp = config.validate_exp;
        if !config.validate_exp {
            validation.required_spec_claims.clear();
        }
        if let Some(ref issuer) = config.issuer {
            validation.set_issuer(&[issuer]);
        }
        if config.audience.is_empty() {
            validation.validate_aud = false;
        } else {
            validation.set_audience(&config.audience);
        }

        tracing::debug!(%algorithm, issuer = ?config.issuer, "JWT decoder configured");

        Ok(Self::new(decoding_key, validation))
    }
}

impl TokenDecoder for JwtTokenDecoder {
    fn decode(&self, token: &str) -> Result<TokenClaims, JwtError> {
        let data = decode::<Map<String, Value>>(token, &self.decoding_key, &self.validation)?;
        Ok(TokenClaims::new(data.claims))
    }
}

// ============================================================================
// Tests
// ============================================================================
