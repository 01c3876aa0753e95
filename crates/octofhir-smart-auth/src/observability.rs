//! Tracing setup for the diagnostic tooling.
//!
//! The subscriber is installed once with a reloadable filter, so the level
//! from the loaded configuration can replace the startup level afterwards.
//! `RUST_LOG`, when set, wins over both.

use std::sync::OnceLock;

use tracing_subscriber::{EnvFilter, Registry, fmt, prelude::*, reload};

/// Level used until configuration has been loaded.
pub const STARTUP_LEVEL: &str = "warn";

static FILTER_HANDLE: OnceLock<reload::Handle<EnvFilter, Registry>> = OnceLock::new();

fn filter_for(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
}

/// Installs the global subscriber writing to stderr; stdout is reserved for
/// command output. Later calls are no-ops.
pub fn init_tracing_with_level(level: &str) {
    let (filter, handle) = reload::Layer::new(filter_for(level));
    if FILTER_HANDLE.set(handle).is_err() {
        return;
    }

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .try_init();
}

/// Swaps the active filter for `level`.
///
/// Returns `false` when no subscriber was installed by
/// [`init_tracing_with_level`] or the swap failed.
pub fn apply_logging_level(level: &str) -> bool {
    let Some(handle) = FILTER_HANDLE.get() else {
        return false;
    };
    match handle.reload(filter_for(level)) {
        Ok(()) => {
            tracing::debug!(level, "Logging level applied");
            true
        }
        Err(e) => {
            eprintln!("failed to apply logging level '{level}': {e}");
            false
        }
    }
}
