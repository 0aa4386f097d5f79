// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Configuration for the reCAPTCHA checkpoint.
//!
//! Values come from an optional JSON file named by `CHECKPOINT_CONFIG`,
//! overridden by environment variables. Unknown keys in the file are an
//! error so typos fail at startup instead of silently using defaults.

use crate::error::{ConfigError, ConfigResult};
use crate::extract::DEFAULT_TOKEN_FIELD;
use crate::gate::{DEFAULT_ERROR_STATUS, DEFAULT_MAX_BODY_BYTES, DEFAULT_REJECTED_STATUS};
use crate::verifier::{DEFAULT_ENDPOINT, DEFAULT_THRESHOLD, DEFAULT_TIMEOUT};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

/// Environment variable naming the optional JSON configuration file.
pub const CONFIG_PATH_ENV: &str = "CHECKPOINT_CONFIG";

/// Configuration for the checkpoint service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Server bind address (default: 0.0.0.0:8080)
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Attestation lookup and acceptance policy
    #[serde(default)]
    pub verifier: VerifierSettings,

    /// Request gate behaviour
    #[serde(default)]
    pub gate: GateSettings,

    /// Metrics configuration
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Attestation service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VerifierSettings {
    /// Verification endpoint (default: Google siteverify)
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Minimum accepted score, inclusive (default: 0.3)
    #[serde(default = "default_threshold")]
    pub threshold: f64,

    /// Hostnames the token must have been issued for (empty: any)
    #[serde(default)]
    pub allowed_hosts: Vec<String>,

    /// Actions the token must have been issued for (empty: any)
    #[serde(default)]
    pub allowed_actions: Vec<String>,

    /// Lookup timeout in milliseconds (default: 10000)
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Environment variable holding the site secret (default: RECAPTCHA_SECRET)
    #[serde(default = "default_secret_env")]
    pub secret_env: String,
}

/// Gate settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GateSettings {
    /// Form field carrying the token (default: g-recaptcha-response)
    #[serde(default = "default_token_field")]
    pub token_field: String,

    /// Status for rejected tokens (default: 403)
    #[serde(default = "default_rejected_status")]
    pub rejected_status: u16,

    /// Status when the attestation service reports a configuration error (default: 500)
    #[serde(default = "default_error_status")]
    pub error_status: u16,

    /// Largest request body buffered for token extraction (default: 2 MiB)
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,

    /// Read the client IP from X-Forwarded-For / X-Real-IP (default: false)
    #[serde(default)]
    pub trust_forwarded_for: bool,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MetricsConfig {
    /// Enable Prometheus metrics endpoint (default: true)
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Metrics endpoint path (default: /metrics)
    #[serde(default = "default_metrics_path")]
    pub path: String,
}

// Default value functions
fn default_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_endpoint() -> String {
    DEFAULT_ENDPOINT.to_string()
}

fn default_threshold() -> f64 {
    DEFAULT_THRESHOLD
}

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT.as_millis() as u64
}

fn default_secret_env() -> String {
    "RECAPTCHA_SECRET".to_string()
}

fn default_token_field() -> String {
    DEFAULT_TOKEN_FIELD.to_string()
}

fn default_rejected_status() -> u16 {
    DEFAULT_REJECTED_STATUS.as_u16()
}

fn default_error_status() -> u16 {
    DEFAULT_ERROR_STATUS.as_u16()
}

fn default_max_body_bytes() -> usize {
    DEFAULT_MAX_BODY_BYTES
}

fn default_true() -> bool {
    true
}

fn default_metrics_path() -> String {
    "/metrics".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            verifier: VerifierSettings::default(),
            gate: GateSettings::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for VerifierSettings {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            threshold: default_threshold(),
            allowed_hosts: Vec::new(),
            allowed_actions: Vec::new(),
            timeout_ms: default_timeout_ms(),
            secret_env: default_secret_env(),
        }
    }
}

impl Default for GateSettings {
    fn default() -> Self {
        Self {
            token_field: default_token_field(),
            rejected_status: default_rejected_status(),
            error_status: default_error_status(),
            max_body_bytes: default_max_body_bytes(),
            trust_forwarded_for: false,
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            path: default_metrics_path(),
        }
    }
}

impl VerifierSettings {
    /// Get the lookup timeout
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Config {
    /// Load from the file named by `CHECKPOINT_CONFIG` (if set), apply
    /// environment overrides, and validate.
    pub fn load() -> ConfigResult<Self> {
        let mut config = match std::env::var(CONFIG_PATH_ENV) {
            Ok(path) if !path.trim().is_empty() => Self::from_file(path.trim())?,
            _ => Self::default(),
        };
        config.apply_overrides(|var| std::env::var(var).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a JSON configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    /// Apply overrides looked up through `lookup` (normally `std::env::var`).
    ///
    /// List values are comma separated; blank entries are dropped.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> ConfigResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(addr) = lookup("BIND_ADDR") {
            self.bind_addr = addr;
        }
        if let Some(endpoint) = lookup("RECAPTCHA_ENDPOINT") {
            self.verifier.endpoint = endpoint;
        }
        if let Some(value) = lookup("RECAPTCHA_THRESHOLD") {
            self.verifier.threshold = parse_env("RECAPTCHA_THRESHOLD", &value)?;
        }
        if let Some(value) = lookup("RECAPTCHA_ALLOWED_HOSTS") {
            self.verifier.allowed_hosts = split_list(&value);
        }
        if let Some(value) = lookup("RECAPTCHA_ALLOWED_ACTIONS") {
            self.verifier.allowed_actions = split_list(&value);
        }
        if let Some(value) = lookup("RECAPTCHA_TIMEOUT_MS") {
            self.verifier.timeout_ms = parse_env("RECAPTCHA_TIMEOUT_MS", &value)?;
        }
        Ok(())
    }

    /// Check values the builders cannot check on their own.
    ///
    /// Threshold, endpoint and status codes are validated again when the
    /// gate is built.
    pub fn validate(&self) -> ConfigResult<()> {
        self.bind_addr
            .parse::<SocketAddr>()
            .map_err(|_| ConfigError::InvalidBindAddr(self.bind_addr.clone()))?;
        if self.gate.token_field.trim().is_empty() {
            return Err(ConfigError::EmptyTokenField);
        }
        if self.metrics.enabled && !self.metrics.path.starts_with('/') {
            return Err(ConfigError::InvalidMetricsPath(self.metrics.path.clone()));
        }
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(var: &'static str, value: &str) -> ConfigResult<T> {
    value.trim().parse().map_err(|_| ConfigError::InvalidEnv {
        var,
        value: value.to_string(),
    })
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
