// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Error types for the reCAPTCHA checkpoint.
//!
//! An invalid token is not an error: it is reported as `Ok(false)` by the
//! verifier. The errors here are either verification outcomes that change
//! how the gate responds, or construction-time misuse.

use thiserror::Error;

/// Classification of a verification that could not produce a plain verdict.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum VerifyError {
    /// The attestation service could not be reached or its reply could not
    /// be parsed. The gate fails open on this error.
    #[error("unable to look up the status of the token provided")]
    LookupFailure,

    /// The attestation service reported an error other than an expired or
    /// duplicate token (bad secret, malformed request). The gate fails closed.
    #[error("the token response has one or more configuration-related errors")]
    ServerConfig,
}

/// Errors raised by a [`Transport`](crate::transport::Transport).
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("attestation request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("attestation service answered with HTTP {0}")]
    Status(u16),

    #[error("attestation reply exceeds {0} bytes")]
    TooLarge(usize),

    #[error("attestation transport error: {0}")]
    Other(String),
}

/// Construction-time configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("score threshold must be a finite value in [0, 1], got {0}")]
    ThresholdOutOfRange(f64),

    #[error("invalid attestation endpoint {endpoint:?}: {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },

    #[error("{field} must be a 4xx or 5xx status code, got {code}")]
    InvalidStatus { field: &'static str, code: u16 },

    #[error("max_body_bytes must be greater than zero")]
    ZeroBodyLimit,

    #[error("failed to build attestation transport: {0}")]
    Transport(#[source] TransportError),

    #[error("token field name must not be empty")]
    EmptyTokenField,

    #[error("metrics path must start with '/', got {0:?}")]
    InvalidMetricsPath(String),

    #[error("invalid bind address {0:?}")]
    InvalidBindAddr(String),

    #[error("invalid value for {var}: {value:?}")]
    InvalidEnv { var: &'static str, value: String },

    #[error("failed to read configuration file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse configuration file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Result type alias for configuration building.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;
