// crates/uapk-gateway-config/src/lib.rs
// ============================================================================
// Module: UAPK Gateway Configuration
// Description: Environment and TOML configuration with validated defaults.
// Purpose: Single source of truth for gateway tunables.
// Dependencies: uapk-gateway-core, serde, toml
// ============================================================================

//! ## Overview
//! Configuration is resolved in three layers: hard defaults, an optional
//! TOML file, then `UAPK_*` environment overrides. Parsing is strict and
//! fail-closed: malformed numbers and out-of-bounds values are errors, never
//! silently clamped.
//! Security posture: config inputs are untrusted.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::env;
use std::fs;
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;
use uapk_gateway_core::ConnectorDefaults;
use uapk_gateway_core::GatewayOptions;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Environment variable for the default daily action budget.
pub const ENV_DEFAULT_DAILY_BUDGET: &str = "UAPK_GATEWAY_DEFAULT_DAILY_BUDGET";
/// Environment variable for the connector timeout in seconds.
pub const ENV_CONNECTOR_TIMEOUT_SECONDS: &str = "UAPK_CONNECTOR_TIMEOUT_SECONDS";
/// Environment variable for the connector response byte cap.
pub const ENV_MAX_CONNECTOR_RESPONSE_BYTES: &str = "UAPK_MAX_CONNECTOR_RESPONSE_BYTES";
/// Environment variable for the comma-separated webhook domain allowlist.
pub const ENV_ALLOWED_WEBHOOK_DOMAINS: &str = "UAPK_ALLOWED_WEBHOOK_DOMAINS";
/// Environment variable for the approval expiry in hours.
pub const ENV_APPROVAL_EXPIRY_HOURS: &str = "UAPK_APPROVAL_EXPIRY_HOURS";
/// Environment variable for the reported policy version label.
pub const ENV_POLICY_VERSION: &str = "UAPK_POLICY_VERSION";

/// Default daily action budget.
const DEFAULT_DAILY_BUDGET: u64 = 1000;
/// Default connector timeout in seconds.
const DEFAULT_CONNECTOR_TIMEOUT_SECONDS: u64 = 30;
/// Default connector response byte cap.
const DEFAULT_MAX_CONNECTOR_RESPONSE_BYTES: usize = 1_000_000;
/// Default approval expiry in hours.
const DEFAULT_APPROVAL_EXPIRY_HOURS: i64 = 24;
/// Default policy version label.
const DEFAULT_POLICY_VERSION: &str = "0.1";

/// Maximum accepted connector timeout in seconds.
const MAX_CONNECTOR_TIMEOUT_SECONDS: u64 = 600;
/// Maximum accepted approval expiry in hours.
const MAX_APPROVAL_EXPIRY_HOURS: i64 = 24 * 30;
/// Maximum configuration file size in bytes.
const MAX_CONFIG_FILE_SIZE: u64 = 1024 * 1024;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file could not be read.
    #[error("failed to read config file: {0}")]
    Io(String),
    /// Config file is too large.
    #[error("config file exceeds size limit ({0} bytes)")]
    TooLarge(u64),
    /// TOML parsing failed.
    #[error("invalid config file: {0}")]
    Parse(String),
    /// An environment variable holds a malformed value.
    #[error("invalid value for {variable}: {message}")]
    InvalidEnv {
        /// Offending environment variable.
        variable: &'static str,
        /// Parse failure description.
        message: String,
    },
    /// A value is outside the accepted bounds.
    #[error("{field} out of bounds: {message}")]
    OutOfBounds {
        /// Offending config field.
        field: &'static str,
        /// Bounds description.
        message: String,
    },
}

// ============================================================================
// SECTION: Config
// ============================================================================

/// Resolved gateway configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayConfig {
    /// Daily action budget applied when a manifest sets none.
    pub default_daily_budget: u64,
    /// Connector timeout in seconds.
    pub connector_timeout_seconds: u64,
    /// Connector response byte cap.
    pub max_connector_response_bytes: usize,
    /// Global webhook domain allowlist.
    pub allowed_webhook_domains: Vec<String>,
    /// Hours until a pending approval expires.
    pub approval_expiry_hours: i64,
    /// Policy version label reported in responses.
    pub policy_version: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            default_daily_budget: DEFAULT_DAILY_BUDGET,
            connector_timeout_seconds: DEFAULT_CONNECTOR_TIMEOUT_SECONDS,
            max_connector_response_bytes: DEFAULT_MAX_CONNECTOR_RESPONSE_BYTES,
            allowed_webhook_domains: Vec::new(),
            approval_expiry_hours: DEFAULT_APPROVAL_EXPIRY_HOURS,
            policy_version: DEFAULT_POLICY_VERSION.to_string(),
        }
    }
}

/// Optional TOML file shape; absent fields keep their current values.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct GatewayConfigFile {
    /// Daily action budget.
    default_daily_budget: Option<u64>,
    /// Connector timeout in seconds.
    connector_timeout_seconds: Option<u64>,
    /// Connector response byte cap.
    max_connector_response_bytes: Option<usize>,
    /// Webhook domain allowlist.
    allowed_webhook_domains: Option<Vec<String>>,
    /// Approval expiry in hours.
    approval_expiry_hours: Option<i64>,
    /// Policy version label.
    policy_version: Option<String>,
}

impl GatewayConfig {
    /// Loads configuration: defaults, then the optional file, then the
    /// environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] on unreadable files, malformed values, or
    /// out-of-bounds settings.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(path) = path {
            config.apply_file(path)?;
        }
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from defaults and the environment only.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] on malformed or out-of-bounds values.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(None)
    }

    /// Maps the configuration onto gateway runtime options.
    #[must_use]
    pub fn gateway_options(&self) -> GatewayOptions {
        GatewayOptions {
            policy_version: self.policy_version.clone(),
            approval_expiry_hours: self.approval_expiry_hours,
            default_daily_budget: self.default_daily_budget,
            connector_defaults: ConnectorDefaults {
                timeout_seconds: self.connector_timeout_seconds,
                max_response_bytes: self.max_connector_response_bytes,
                allowed_domains: self.allowed_webhook_domains.clone(),
            },
        }
    }

    /// Overlays values from a TOML file.
    fn apply_file(&mut self, path: &Path) -> Result<(), ConfigError> {
        let metadata = fs::metadata(path).map_err(|err| ConfigError::Io(err.to_string()))?;
        if metadata.len() > MAX_CONFIG_FILE_SIZE {
            return Err(ConfigError::TooLarge(metadata.len()));
        }
        let text = fs::read_to_string(path).map_err(|err| ConfigError::Io(err.to_string()))?;
        let file: GatewayConfigFile =
            toml::from_str(&text).map_err(|err| ConfigError::Parse(err.to_string()))?;

        if let Some(value) = file.default_daily_budget {
            self.default_daily_budget = value;
        }
        if let Some(value) = file.connector_timeout_seconds {
            self.connector_timeout_seconds = value;
        }
        if let Some(value) = file.max_connector_response_bytes {
            self.max_connector_response_bytes = value;
        }
        if let Some(value) = file.allowed_webhook_domains {
            self.allowed_webhook_domains = value;
        }
        if let Some(value) = file.approval_expiry_hours {
            self.approval_expiry_hours = value;
        }
        if let Some(value) = file.policy_version {
            self.policy_version = value;
        }
        Ok(())
    }

    /// Overlays values from `UAPK_*` environment variables.
    fn apply_env(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = parse_env(ENV_DEFAULT_DAILY_BUDGET)? {
            self.default_daily_budget = value;
        }
        if let Some(value) = parse_env(ENV_CONNECTOR_TIMEOUT_SECONDS)? {
            self.connector_timeout_seconds = value;
        }
        if let Some(value) = parse_env(ENV_MAX_CONNECTOR_RESPONSE_BYTES)? {
            self.max_connector_response_bytes = value;
        }
        if let Ok(value) = env::var(ENV_ALLOWED_WEBHOOK_DOMAINS) {
            self.allowed_webhook_domains = value
                .split(',')
                .map(str::trim)
                .filter(|entry| !entry.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(value) = parse_env(ENV_APPROVAL_EXPIRY_HOURS)? {
            self.approval_expiry_hours = value;
        }
        if let Ok(value) = env::var(ENV_POLICY_VERSION) {
            self.policy_version = value;
        }
        Ok(())
    }

    /// Validates resolved values against hard bounds.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.connector_timeout_seconds == 0
            || self.connector_timeout_seconds > MAX_CONNECTOR_TIMEOUT_SECONDS
        {
            return Err(ConfigError::OutOfBounds {
                field: "connector_timeout_seconds",
                message: format!("must be within 1..={MAX_CONNECTOR_TIMEOUT_SECONDS}"),
            });
        }
        if self.max_connector_response_bytes == 0 {
            return Err(ConfigError::OutOfBounds {
                field: "max_connector_response_bytes",
                message: "must be greater than zero".to_string(),
            });
        }
        if self.approval_expiry_hours <= 0 || self.approval_expiry_hours > MAX_APPROVAL_EXPIRY_HOURS
        {
            return Err(ConfigError::OutOfBounds {
                field: "approval_expiry_hours",
                message: format!("must be within 1..={MAX_APPROVAL_EXPIRY_HOURS}"),
            });
        }
        Ok(())
    }
}

/// Parses an environment variable when present.
fn parse_env<T: std::str::FromStr>(variable: &'static str) -> Result<Option<T>, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match env::var(variable) {
        Ok(value) => value
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|err| ConfigError::InvalidEnv {
                variable,
                message: err.to_string(),
            }),
        Err(_) => Ok(None),
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, reason = "Panic-based assertions are permitted in tests.")]

    use std::io::Write;

    use super::*;

    /// Tests layered resolution from a TOML file.
    #[test]
    fn test_file_overlay() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "default_daily_budget = 50\nallowed_webhook_domains = [\"example.com\"]"
        )
        .unwrap();

        let config = GatewayConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.default_daily_budget, 50);
        assert_eq!(config.allowed_webhook_domains, vec!["example.com".to_string()]);
        assert_eq!(config.connector_timeout_seconds, 30);
    }

    /// Tests that unknown file keys fail closed.
    #[test]
    fn test_unknown_keys_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "surprise_field = true").unwrap();
        assert!(matches!(
            GatewayConfig::load(Some(file.path())),
            Err(ConfigError::Parse(_))
        ));
    }

    /// Tests bound validation for the connector timeout.
    #[test]
    fn test_timeout_bounds() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "connector_timeout_seconds = 0").unwrap();
        assert!(matches!(
            GatewayConfig::load(Some(file.path())),
            Err(ConfigError::OutOfBounds { .. })
        ));
    }

    /// Tests the gateway-options mapping.
    #[test]
    fn test_gateway_options_mapping() {
        let config = GatewayConfig {
            allowed_webhook_domains: vec!["example.com".to_string()],
            ..GatewayConfig::default()
        };
        let options = config.gateway_options();
        assert_eq!(options.default_daily_budget, 1000);
        assert_eq!(options.policy_version, "0.1");
        assert_eq!(
            options.connector_defaults.allowed_domains,
            vec!["example.com".to_string()]
        );
    }
}
