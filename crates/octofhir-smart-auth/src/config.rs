//! Configuration for SMART scope authorization.
//!
//! All sections default sensibly, so an empty file (or none at all) yields a
//! working configuration apart from token key material.
//!
//! # Example Configuration
//!
//! ```toml
//! enabled = true
//! compartments = ["patient", "encounter", "practitioner"]
//!
//! [token]
//! algorithm = "RS256"
//! public_key_pem = "-----BEGIN PUBLIC KEY-----..."
//! issuer = "https://auth.example.com"
//! audience = ["https://fhir.example.com"]
//! leeway = "60s"
//!
//! [scopes]
//! non_clinical = ["openid", "profile", "fhirUser", "launch", "offline_access"]
//!
//! [narrowing]
//! exempt_operations = ["metadata"]
//!
//! [logging]
//! level = "info"
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::compartment::CompartmentDefinition;
use crate::request::METADATA_OPERATION;
use crate::smart::scopes::STANDARD_NON_CLINICAL_SCOPES;
use crate::token::VerificationAlgorithm;

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmartAuthConfig {
    /// Whether scope-based authorization is enforced.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Access token verification.
    #[serde(default)]
    pub token: TokenConfig,

    /// Scope parsing.
    #[serde(default)]
    pub scopes: ScopeConfig,

    /// Search narrowing.
    #[serde(default)]
    pub narrowing: NarrowingConfig,

    /// Compartments with registered rule builders (lowercase scope prefixes).
    #[serde(default = "default_compartments")]
    pub compartments: Vec<String>,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for SmartAuthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            token: TokenConfig::default(),
            scopes: ScopeConfig::default(),
            narrowing: NarrowingConfig::default(),
            compartments: default_compartments(),
            logging: LoggingConfig::default(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_compartments() -> Vec<String> {
    vec![
        "patient".to_string(),
        "encounter".to_string(),
        "practitioner".to_string(),
    ]
}

/// Access token verification settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenConfig {
    /// Signature algorithm (`HS256`, `RS256`, `ES256`, ...).
    #[serde(default = "default_algorithm")]
    pub algorithm: String,

    /// Shared secret for HMAC algorithms.
    #[serde(default)]
    pub secret: Option<String>,

    /// PEM-encoded public key for RSA and EC algorithms.
    #[serde(default)]
    pub public_key_pem: Option<String>,

    /// Expected `iss` claim.
    #[serde(default)]
    pub issuer: Option<String>,

    /// Accepted `aud` values; empty disables audience validation.
    #[serde(default)]
    pub audience: Vec<String>,

    /// Clock skew tolerance for `exp` and `nbf`.
    #[serde(default = "default_leeway", with = "humantime_serde")]
    pub leeway: Duration,

    /// Whether expired tokens are rejected.
    #[serde(default = "default_true")]
    pub validate_exp: bool,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            algorithm: default_algorithm(),
            secret: None,
            public_key_pem: None,
            issuer: None,
            audience: Vec::new(),
            leeway: default_leeway(),
            validate_exp: true,
        }
    }
}

fn default_algorithm() -> String {
    "HS256".into()
}

fn default_leeway() -> Duration {
    Duration::from_secs(60)
}

/// Scope parsing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScopeConfig {
    /// Scopes skipped before clinical parsing.
    #[serde(default = "default_non_clinical")]
    pub non_clinical: Vec<String>,
}

impl Default for ScopeConfig {
    fn default() -> Self {
        Self {
            non_clinical: default_non_clinical(),
        }
    }
}

fn default_non_clinical() -> Vec<String> {
    STANDARD_NON_CLINICAL_SCOPES
        .iter()
        .map(|s| (*s).to_string())
        .collect()
}

/// Search narrowing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NarrowingConfig {
    /// Operations that are never narrowed.
    #[serde(default = "default_exempt_operations")]
    pub exempt_operations: Vec<String>,
}

impl Default for NarrowingConfig {
    fn default() -> Self {
        Self {
            exempt_operations: default_exempt_operations(),
        }
    }
}

fn default_exempt_operations() -> Vec<String> {
    vec![METADATA_OPERATION.to_string()]
}

impl NarrowingConfig {
    /// Returns `true` if `operation` bypasses narrowing.
    #[must_use]
    pub fn is_exempt(&self, operation: &str) -> bool {
        self.exempt_operations.iter().any(|op| op == operation)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".into()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// An invalid configuration value was provided.
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),

    /// A required configuration value is missing.
    #[error("Missing required configuration: {0}")]
    Missing(String),

    /// The configuration sources could not be read or deserialized.
    #[error("Failed to load configuration: {0}")]
    Load(String),
}

impl SmartAuthConfig {
    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` for an unknown algorithm, log level
    /// or compartment, and `ConfigError::Missing` when no compartment is
    /// listed or enforcement is enabled without key material.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let algorithm: VerificationAlgorithm = self
            .token
            .algorithm
            .parse()
            .map_err(|_| {
                ConfigError::InvalidValue(format!(
                    "token.algorithm '{}' is not supported",
                    self.token.algorithm
                ))
            })?;

        if self.enabled {
            let has_key = if algorithm.is_hmac() {
                self.token.secret.as_deref().is_some_and(|s| !s.is_empty())
            } else {
                self.token
                    .public_key_pem
                    .as_deref()
                    .is_some_and(|s| !s.is_empty())
            };
            if !has_key {
                let field = if algorithm.is_hmac() {
                    "token.secret"
                } else {
                    "token.public_key_pem"
                };
                return Err(ConfigError::Missing(format!("{field} (algorithm {algorithm})")));
            }
        }

        if self.compartments.is_empty() {
            return Err(ConfigError::Missing("compartments".into()));
        }
        for compartment in &self.compartments {
            if CompartmentDefinition::standard(compartment).is_none() {
                return Err(ConfigError::InvalidValue(format!(
                    "compartments contains unknown compartment '{compartment}'"
                )));
            }
        }

        if self.scopes.non_clinical.iter().any(|s| s.trim().is_empty()) {
            return Err(ConfigError::InvalidValue(
                "scopes.non_clinical must not contain empty entries".into(),
            ));
        }

        let lvl = self.logging.level.to_ascii_lowercase();
        let valid_levels = ["trace", "debug", "info", "warn", "error", "off"];
        if !valid_levels.contains(&lvl.as_str()) {
            return Err(ConfigError::InvalidValue(format!(
                "logging.level must be one of {valid_levels:?}"
            )));
        }

        Ok(())
    }
}

pub mod loader {
    use super::{ConfigError, SmartAuthConfig};
    use config::{Config, Environment, File};
    use std::path::PathBuf;

    /// File read when no explicit path is given.
    pub const DEFAULT_CONFIG_FILE: &str = "smart-auth.toml";

    /// Prefix for environment overrides, e.g. `OCTOFHIR_SMART__TOKEN__ISSUER`.
    pub const ENV_PREFIX: &str = "OCTOFHIR_SMART";

    /// Loads and validates configuration from an optional TOML file plus
    /// environment overrides. A missing file is not an error.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Load` if a source cannot be parsed, or the
    /// validation error otherwise.
    pub fn load_config(path: Option<&str>) -> Result<SmartAuthConfig, ConfigError> {
        let mut builder = Config::builder();
        let pathbuf = PathBuf::from(path.unwrap_or(DEFAULT_CONFIG_FILE));
        if pathbuf.exists() {
            builder = builder.add_source(File::from(pathbuf));
        }
        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .try_parsing(true)
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("compartments")
                .with_list_parse_key("token.audience")
                .with_list_parse_key("scopes.non_clinical")
                .with_list_parse_key("narrowing.exempt_operations"),
        );
        let cfg = builder
            .build()
            .map_err(|e| ConfigError::Load(format!("config build error: {e}")))?;
        let merged: SmartAuthConfig = cfg
            .try_deserialize()
            .map_err(|e| ConfigError::Load(format!("config deserialize error: {e}")))?;
        merged.validate()?;

        tracing::debug!(
            enabled = merged.enabled,
            algorithm = %merged.token.algorithm,
            compartments = ?merged.compartments,
            "SMART authorization configuration loaded"
        );
        Ok(merged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_secret() -> SmartAuthConfig {
        SmartAuthConfig {
            token: TokenConfig {
                secret: Some("secret".into()),
                ..TokenConfig::default()
            },
            ..SmartAuthConfig::default()
        }
    }

    #[test]
    fn test_defaults() {
        let config = SmartAuthConfig::default();
        assert!(config.enabled);
        assert_eq!(config.token.algorithm, "HS256");
        assert_eq!(config.token.leeway, Duration::from_secs(60));
        assert_eq!(config.compartments, vec!["patient", "encounter", "practitioner"]);
        assert!(config.narrowing.is_exempt("metadata"));
        assert!(!config.narrowing.is_exempt("$everything"));
        assert!(config.scopes.non_clinical.contains(&"openid".to_string()));
    }

    #[test]
    fn test_validate_requires_key_when_enabled() {
        let err = SmartAuthConfig::default().validate().unwrap_err();
        assert!(matches!(err, ConfigError::Missing(_)));

        let disabled = SmartAuthConfig {
            enabled: false,
            ..SmartAuthConfig::default()
        };
        assert!(disabled.validate().is_ok());
        assert!(with_secret().validate().is_ok());
    }

    #[test]
    fn test_validate_algorithm() {
        let mut config = with_secret();
        config.token.algorithm = "none".into();
        assert!(matches!(
            config.validate().unwrap_err(),
            ConfigError::InvalidValue(_)
        ));

        config.token.algorithm = "RS256".into();
        assert!(matches!(config.validate().unwrap_err(), ConfigError::Missing(_)));
    }

    #[test]
    fn test_validate_compartments_and_level() {
        let mut config = with_secret();
        config.compartments.push("device".into());
        assert!(config.validate().is_err());

        let mut config = with_secret();
        config.logging.level = "loud".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_deserialize_partial_toml() {
        let toml = r#"
            [token]
            secret = "s3cret"
            leeway = "2m"

            [narrowing]
            exempt_operations = ["metadata", "$export"]
        "#;
        let cfg = config::Config::builder()
            .add_source(config::File::from_str(toml, config::FileFormat::Toml))
            .build()
            .unwrap();
        let config: SmartAuthConfig = cfg.try_deserialize().unwrap();
        assert_eq!(config.token.leeway, Duration::from_secs(120));
        assert!(config.narrowing.is_exempt("$export"));
        assert_eq!(config.compartments.len(), 3);
        assert!(config.validate().is_ok());
    }
}
