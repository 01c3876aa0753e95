use std::env;
use std::io::Write;
use std::time::Duration;

use octofhir_smart_auth::config::{ConfigError, loader};
use tempfile::NamedTempFile;

fn write_config(contents: &str) -> NamedTempFile {
    let mut file = tempfile::Builder::new()
        .suffix(".toml")
        .tempfile()
        .unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

#[test]
fn test_load_from_file() {
    let file = write_config(
        r#"
        compartments = ["patient"]

        [token]
        algorithm = "HS512"
        secret = "file-secret"
        issuer = "https://auth.example.com"

        [scopes]
        non_clinical = ["openid", "launch"]

        [narrowing]
        exempt_operations = ["metadata", "$export"]
        "#,
    );

    let config = loader::load_config(file.path().to_str()).unwrap();
    assert_eq!(config.token.algorithm, "HS512");
    assert_eq!(config.token.issuer.as_deref(), Some("https://auth.example.com"));
    assert_eq!(config.compartments, vec!["patient"]);
    assert_eq!(config.scopes.non_clinical, vec!["openid", "launch"]);
    assert!(config.narrowing.is_exempt("$export"));
}

#[test]
fn test_invalid_file_rejected() {
    let file = write_config(
        r#"
        compartments = ["device"]

        [token]
        secret = "s"
        "#,
    );
    let err = loader::load_config(file.path().to_str()).unwrap_err();
    assert!(matches!(err, ConfigError::InvalidValue(_)), "{err}");

    let file = write_config("[token]\nalgorithm = \"RS256\"\n");
    let err = loader::load_config(file.path().to_str()).unwrap_err();
    assert!(matches!(err, ConfigError::Missing(_)), "{err}");
}

#[test]
fn test_malformed_file_is_load_error() {
    let file = write_config("[token\nsecret = ");
    let err = loader::load_config(file.path().to_str()).unwrap_err();
    assert!(matches!(err, ConfigError::Load(_)), "{err}");
}

#[test]
fn test_env_overrides_file() {
    let file = write_config(
        r#"
        [token]
        secret = "file-secret"
        leeway = "30s"
        "#,
    );

    // SAFETY: only this test touches these variables.
    unsafe {
        env::set_var("OCTOFHIR_SMART__TOKEN__LEEWAY", "90s");
        env::set_var(
            "OCTOFHIR_SMART__TOKEN__AUDIENCE",
            "https://fhir.example.com,https://api.example.com",
        );
    }

    let result = loader::load_config(file.path().to_str());

    unsafe {
        env::remove_var("OCTOFHIR_SMART__TOKEN__LEEWAY");
        env::remove_var("OCTOFHIR_SMART__TOKEN__AUDIENCE");
    }

    let config = result.unwrap();
    assert_eq!(config.token.leeway, Duration::from_secs(90));
    assert_eq!(
        config.token.audience,
        vec!["https://fhir.example.com", "https://api.example.com"]
    );
    assert_eq!(config.token.secret.as_deref(), Some("file-secret"));
}
