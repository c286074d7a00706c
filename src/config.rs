//! Configuration for the coldstore gateway.
//!
//! Settings are loaded from an optional TOML file and fall back to
//! defaults suitable for development:
//!
//! - [`Settings`] - Root configuration struct
//! - [`ServerConfig`] - wire server bind address and limits
//! - [`RemoteConfig`] - timeouts and fan-out for remote backends
//!
//! Locators (the URL-shaped strings naming a backend) come from the
//! `[locators]` table first and then from `<env_prefix>_<NAME>`
//! environment variables.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Default environment variable prefix for locators.
pub const DEFAULT_ENV_PREFIX: &str = "COLDSTORE_URL";

/// Default wire server port.
pub const DEFAULT_PORT: u16 = 3049;

/// Per-request timeout of the remote backend.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Upper bound a remote batch call waits for its fanned-out requests.
pub const DEFAULT_BATCH_TIMEOUT_SECS: u64 = 60;

/// In-flight requests allowed per remote backend during batch calls.
pub const DEFAULT_REMOTE_CONCURRENCY: usize = 10;

/// Largest request body the wire server accepts.
pub const DEFAULT_MAX_BODY_BYTES: usize = 64 * 1024 * 1024;

/// Result of configuration validation.
#[derive(Debug, Default)]
pub struct ValidationResult {
    /// Non-fatal warnings that should be logged but don't prevent operation.
    pub warnings: Vec<String>,
}

impl ValidationResult {
    /// Returns true if there are any warnings.
    #[must_use]
    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }
}

/// Root configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Prefix of locator environment variables.
    pub env_prefix: String,
    /// Statically configured locators, keyed by symbolic name.
    pub locators: HashMap<String, String>,
    pub server: ServerConfig,
    pub remote: RemoteConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            env_prefix: DEFAULT_ENV_PREFIX.to_string(),
            locators: HashMap::new(),
            server: ServerConfig::default(),
            remote: RemoteConfig::default(),
        }
    }
}

/// Wire server settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub max_body_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }
}

/// Remote backend settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    pub request_timeout_secs: u64,
    pub batch_timeout_secs: u64,
    pub concurrency: usize,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            batch_timeout_secs: DEFAULT_BATCH_TIMEOUT_SECS,
            concurrency: DEFAULT_REMOTE_CONCURRENCY,
        }
    }
}

impl RemoteConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn batch_timeout(&self) -> Duration {
        Duration::from_secs(self.batch_timeout_secs)
    }
}

impl Settings {
    /// Load settings from the specified TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The file cannot be read (IO error)
    /// - The file contains invalid TOML syntax
    /// - Fields have invalid types
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::from_toml(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Parse settings from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is malformed.
    pub fn from_toml(content: &str) -> Result<Self> {
        let mut settings: Settings = toml::from_str(content)?;
        settings.locators = settings
            .locators
            .into_iter()
            .map(|(name, url)| (name.to_uppercase(), url))
            .collect();
        Ok(settings)
    }

    /// Add a static locator (builder style, mostly for tests and embedding).
    #[must_use]
    pub fn with_locator(mut self, name: &str, locator: impl Into<String>) -> Self {
        self.locators.insert(name.to_uppercase(), locator.into());
        self
    }

    /// Name of the environment variable holding the locator for `name`.
    pub fn env_var_for(&self, name: &str) -> String {
        format!("{}_{}", self.env_prefix, name.to_uppercase())
    }

    /// Resolve the locator string for a symbolic name.
    ///
    /// Static locators win over the environment. Empty values count as
    /// unset.
    pub fn locator_for(&self, name: &str) -> Option<String> {
        let upper = name.to_uppercase();
        if let Some(url) = self.locators.get(&upper)
            && !url.is_empty()
        {
            return Some(url.clone());
        }
        std::env::var(self.env_var_for(&upper))
            .ok()
            .filter(|url| !url.is_empty())
    }

    /// Validate configuration.
    ///
    /// Returns a `ValidationResult` containing any non-fatal warnings.
    ///
    /// # Errors
    ///
    /// Returns an error listing every fatal problem found.
    pub fn validate(&self) -> Result<ValidationResult> {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        if self.env_prefix.is_empty() {
            errors.push("env_prefix cannot be empty".to_string());
        }

        if self.server.port == 0 {
            errors.push("server.port cannot be 0".to_string());
        } else if self.server.port < 1024 {
            warnings.push(format!(
                "server.port {} is a privileged port (< 1024)",
                self.server.port
            ));
        }

        if self.server.max_body_bytes == 0 {
            errors.push("server.max_body_bytes cannot be 0".to_string());
        }

        if self.remote.concurrency == 0 {
            errors.push("remote.concurrency cannot be 0".to_string());
        }
        if self.remote.request_timeout_secs == 0 {
            errors.push("remote.request_timeout_secs cannot be 0".to_string());
        }
        if self.remote.batch_timeout_secs == 0 {
            errors.push("remote.batch_timeout_secs cannot be 0".to_string());
        } else if self.remote.batch_timeout_secs < self.remote.request_timeout_secs {
            warnings.push(format!(
                "remote.batch_timeout_secs ({}) is shorter than request_timeout_secs ({})",
                self.remote.batch_timeout_secs, self.remote.request_timeout_secs
            ));
        }

        for (name, url) in &self.locators {
            if url.is_empty() {
                warnings.push(format!("locator for {name} is empty and will be ignored"));
            }
        }

        if !errors.is_empty() {
            anyhow::bail!("Invalid configuration:\n  {}", errors.join("\n  "));
        }

        Ok(ValidationResult { warnings })
    }
}
