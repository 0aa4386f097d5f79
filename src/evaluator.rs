// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Attestation response evaluation.
//!
//! Turns a parsed `siteverify` reply into a verdict under the configured
//! [`Policy`]. Error codes are classified first; score, hostname and action
//! are only checked when no blocking error code is present.

use crate::error::VerifyError;
use serde::{Deserialize, Deserializer};
use std::collections::HashSet;
use tracing::debug;

/// Error code the attestation service returns for an expired or replayed
/// token. Reference: <https://developers.google.com/recaptcha/docs/verify>
pub const EXPIRED_OR_DUPLICATE: &str = "timeout-or-duplicate";

/// Reply from the attestation service.
///
/// Missing fields and explicit `null`s both take the field's zero value, so
/// a reply such as `{"hostname":null,"error-codes":["invalid-input-secret"]}`
/// is still classified by its error code.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct AttestationResponse {
    #[serde(default, deserialize_with = "null_as_default")]
    pub success: bool,

    #[serde(default, deserialize_with = "null_as_default")]
    pub score: f64,

    #[serde(default, deserialize_with = "null_as_default")]
    pub action: String,

    #[serde(default, deserialize_with = "null_as_default")]
    pub hostname: String,

    /// Timestamp of the challenge load (ISO 8601). Diagnostic only.
    #[serde(default)]
    pub challenge_ts: Option<String>,

    #[serde(default, rename = "error-codes", deserialize_with = "null_as_default")]
    pub error_codes: Vec<String>,
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Set of permitted values for a response field. Empty means unrestricted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AllowList(HashSet<String>);

impl AllowList {
    /// An allow-list that permits everything.
    pub fn unrestricted() -> Self {
        Self::default()
    }

    pub fn is_unrestricted(&self) -> bool {
        self.0.is_empty()
    }

    /// Whether `value` passes this allow-list.
    pub fn permits(&self, value: &str) -> bool {
        self.0.is_empty() || self.0.contains(value)
    }
}

impl<S: Into<String>> FromIterator<S> for AllowList {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

/// Acceptance policy applied to every attestation response.
#[derive(Debug, Clone, PartialEq)]
pub struct Policy {
    /// Minimum acceptable score, inclusive.
    pub threshold: f64,
    pub allowed_hosts: AllowList,
    pub allowed_actions: AllowList,
}

impl Policy {
    pub fn new(threshold: f64) -> Self {
        Self {
            threshold,
            allowed_hosts: AllowList::unrestricted(),
            allowed_actions: AllowList::unrestricted(),
        }
    }
}

/// Evaluate an attestation response against `policy`.
///
/// Returns `Ok(true)` for an acceptable token, `Ok(false)` for an invalid
/// one, and `Err(VerifyError::ServerConfig)` when the service reports a
/// configuration problem. Only the first error code is inspected.
pub fn evaluate(response: &AttestationResponse, policy: &Policy) -> Result<bool, VerifyError> {
    if let Some(code) = response.error_codes.first() {
        if code == EXPIRED_OR_DUPLICATE {
            debug!(code = %code, "Token expired or already used");
            return Ok(false);
        }
        debug!(codes = ?response.error_codes, "Attestation service reported a configuration error");
        return Err(VerifyError::ServerConfig);
    }

    let score_ok = response.score >= policy.threshold;
    let host_ok = policy.allowed_hosts.permits(&response.hostname);
    let action_ok = policy.allowed_actions.permits(&response.action);

    debug!(
        score = response.score,
        threshold = policy.threshold,
        hostname = %response.hostname,
        action = %response.action,
        score_ok,
        host_ok,
        action_ok,
        "Evaluated attestation response"
    );

    Ok(score_ok && host_ok && action_ok)
}
