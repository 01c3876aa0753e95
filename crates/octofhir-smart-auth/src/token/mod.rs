//! Bearer token extraction and decoding.
//!
//! Signature verification is delegated to a [`TokenDecoder`]; the engines
//! only ever see the resulting [`TokenClaims`].

pub mod claims;
pub mod jwt;

pub use claims::{SCOPE_CLAIM, TokenClaims};
pub use jwt::{JwtError, JwtTokenDecoder, VerificationAlgorithm};

use crate::request::RequestDetails;

/// Decodes and verifies a raw bearer token.
///
/// Implementations may block (e.g. to refresh signing keys); caching,
/// retries and timeouts are their own concern.
pub trait TokenDecoder: Send + Sync {
    /// Verify `token` and return its claims.
    fn decode(&self, token: &str) -> Result<TokenClaims, JwtError>;
}

/// Reads the bearer credential from the request's `Authorization` header.
///
/// The `Bearer` prefix is matched case-insensitively; an empty credential
/// counts as absent.
#[must_use]
pub fn extract_bearer_token(request: &RequestDetails) -> Option<&str> {
    let header = request.authorization.as_deref()?.trim();
    let (scheme, token) = header.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::RequestType;

    fn with_header(value: &str) -> RequestDetails {
        RequestDetails::new(RequestType::Get).with_authorization(value)
    }

    #[test]
    fn test_extract_bearer_token() {
        assert_eq!(extract_bearer_token(&with_header("Bearer abc.def")), Some("abc.def"));
        assert_eq!(extract_bearer_token(&with_header("bearer  abc ")), Some("abc"));
    }

    #[test]
    fn test_extract_rejects_other_schemes() {
        assert_eq!(extract_bearer_token(&with_header("Basic dXNlcjpwYXNz")), None);
        assert_eq!(extract_bearer_token(&with_header("Bearer")), None);
        assert_eq!(extract_bearer_token(&with_header("Bearer   ")), None);
        assert_eq!(extract_bearer_token(&RequestDetails::new(RequestType::Get)), None);
    }
}
