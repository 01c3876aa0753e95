//! Prints the rules and search narrowing compiled for a set of claims.
//!
//! ```text
//! smart-rules --scope "patient/*.read" --claim patient=123 --path /Observation
//! smart-rules --token "$JWT" --config smart-auth.toml --method PUT --path /Patient/123
//! smart-rules --scope "patient/*.read" --claim patient=123 --path /Observation --log-level debug
//! ```

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use axum::http::{Method, Request};
use clap::Parser;
use serde_json::{Map, Value, json};

use octofhir_smart_auth::config::{SmartAuthConfig, loader};
use octofhir_smart_auth::observability;
use octofhir_smart_auth::prelude::*;
use octofhir_smart_auth::token::JwtError;

#[derive(Parser)]
#[command(name = "smart-rules")]
#[command(about = "Compile SMART clinical scopes into access rules")]
#[command(version)]
struct Cli {
    /// Space-separated scope claim
    #[arg(long, default_value = "")]
    scope: String,

    /// Additional claim as name=value (e.g. patient=123); repeatable
    #[arg(long = "claim", value_name = "NAME=VALUE")]
    claims: Vec<String>,

    /// Encoded access token; verified with the configured key instead of
    /// using --scope and --claim
    #[arg(long, conflicts_with_all = ["scope", "claims"])]
    token: Option<String>,

    /// HTTP method of the request
    #[arg(long, default_value = "GET")]
    method: String,

    /// FHIR path relative to the base, e.g. /Observation or /Patient/123
    #[arg(long, default_value = "/metadata")]
    path: String,

    /// JSON file holding the resource used to evaluate the compiled rules
    #[arg(long)]
    resource: Option<std::path::PathBuf>,

    /// Configuration file (defaults to smart-auth.toml when present)
    #[arg(short, long, env = "OCTOFHIR_SMART_CONFIG")]
    config: Option<String>,

    /// Log level; overrides logging.level from the configuration
    #[arg(long, value_name = "LEVEL")]
    log_level: Option<String>,
}

/// Claims are supplied on the command line, so nothing is ever decoded.
struct CommandLineClaims;

impl TokenDecoder for CommandLineClaims {
    fn decode(&self, _token: &str) -> Result<TokenClaims, JwtError> {
        Err(JwtError::decoding_error("claims are given on the command line"))
    }
}

fn main() {
    if let Err(e) = run() {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    observability::init_tracing_with_level(
        cli.log_level.as_deref().unwrap_or(observability::STARTUP_LEVEL),
    );

    let config = if cli.token.is_some() || cli.config.is_some() {
        loader::load_config(cli.config.as_deref()).context("loading configuration")?
    } else {
        SmartAuthConfig::default()
    };
    if cli.log_level.is_none() {
        observability::apply_logging_level(&config.logging.level);
    }

    if !config.enabled {
        println!("{}", json!({"enabled": false}));
        return Ok(());
    }

    let mut request = parse_request(&cli.method, &cli.path)?;
    let (engine, narrowing, claims) = match cli.token.as_deref() {
        Some(token) => {
            request = request.with_bearer(token);
            let engine = AuthorizationEngine::from_config(&config)?
                .context("scope authorization is disabled")?;
            let narrowing = SearchNarrowingEngine::from_config(&config)?
                .context("search narrowing is disabled")?;
            (engine, narrowing, None)
        }
        None => {
            let decoder: Arc<dyn TokenDecoder> = Arc::new(CommandLineClaims);
            let parser = ScopeParser::with_non_clinical(config.scopes.non_clinical.iter());
            let registry = CompartmentRegistry::from_config(&config)?;
            let engine = AuthorizationEngine::new(Arc::new(registry), decoder.clone())
                .with_parser(parser.clone());
            let narrowing = SearchNarrowingEngine::new(decoder, config.narrowing.clone())
                .with_parser(parser);
            (engine, narrowing, Some(build_claims(&cli.scope, &cli.claims)?))
        }
    };

    let (rules, narrowed) = match &claims {
        Some(claims) => (
            engine.rules_for_claims(&request, claims),
            narrowing.narrow_for_claims(&request, claims),
        ),
        None => (
            engine.build_rule_list(&request),
            narrowing.build_authorized_list(&request),
        ),
    };

    let narrowing = match narrowed {
        Ok(outcome) => serde_json::to_value(outcome)?,
        Err(e) => json!({"error": e.to_string(), "status": e.status_code().as_u16()}),
    };

    let mut output = json!({
        "request": {
            "method": request.request_type.to_string(),
            "resource": request.resource_name,
            "id": request.resource_id,
            "operation": request.operation,
            "search": request.is_search(),
        },
        "rules": rules,
        "narrowing": narrowing,
    });

    if let Some(operation) = OperationRequest::from_request(&request) {
        let operation = match &cli.resource {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .with_context(|| format!("reading {}", path.display()))?;
                let resource: Value = serde_json::from_str(&text)
                    .with_context(|| format!("parsing {}", path.display()))?;
                operation.with_resource(resource)
            }
            None => operation,
        };
        let decision = RuleEvaluator::new().evaluate(&rules, &operation);
        output["decision"] = json!(decision.to_string());
    }

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn parse_request(method: &str, path: &str) -> Result<RequestDetails> {
    let method: Method = method
        .to_ascii_uppercase()
        .parse()
        .with_context(|| format!("invalid method '{method}'"))?;
    let path = if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    };
    let (parts, ()) = Request::builder()
        .method(method.clone())
        .uri(path.as_str())
        .body(())
        .with_context(|| format!("invalid path '{path}'"))?
        .into_parts();

    match RequestDetails::from_parts(&parts, "/") {
        Some(details) => Ok(details),
        None => bail!("unsupported method '{method}'"),
    }
}

fn build_claims(scope: &str, claims: &[String]) -> Result<TokenClaims> {
    let mut map = Map::new();
    map.insert("scope".to_string(), Value::String(scope.to_string()));
    for claim in claims {
        let Some((name, value)) = claim.split_once('=') else {
            bail!("claim '{claim}' must be NAME=VALUE");
        };
        map.insert(name.trim().to_string(), Value::String(value.trim().to_string()));
    }
    Ok(TokenClaims::new(map))
}
