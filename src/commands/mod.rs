//! CLI command implementations for coldstore.
//!
//! - [`serve`] - HTTP wire server
//! - [`bench`] - write load generator

pub mod bench;
pub mod serve;

use anyhow::Result;
use coldstore::Settings;
use std::path::Path;
use tracing::warn;

/// Loads settings from `path`, or defaults when no file is given.
pub fn load_settings(path: Option<&Path>) -> Result<Settings> {
    match path {
        Some(path) => Settings::load_from(path),
        None => Ok(Settings::default()),
    }
}

/// Validates settings, logging warnings.
pub fn check_settings(settings: &Settings) -> Result<()> {
    let result = settings.validate()?;
    for warning in &result.warnings {
        warn!("{warning}");
    }
    Ok(())
}

/// Initializes stdout logging. `RUST_LOG` overrides the `info` default.
pub fn init_logging(json: bool) {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer())
            .init();
    }
}
