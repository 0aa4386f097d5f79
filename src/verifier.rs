// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Token verification against the attestation service.
//!
//! A [`Verifier`] owns the lookup protocol and the acceptance [`Policy`].
//! It is immutable after construction and safe to share between requests.

use crate::error::{ConfigError, ConfigResult, VerifyError};
use crate::evaluator::{evaluate, AllowList, AttestationResponse, Policy};
use crate::transport::{LookupRequest, ReqwestTransport, Transport};
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

/// Public reCAPTCHA verification endpoint.
pub const DEFAULT_ENDPOINT: &str = "https://www.google.com/recaptcha/api/siteverify";

/// Minimum score accepted when none is configured.
pub const DEFAULT_THRESHOLD: f64 = 0.3;

/// Timeout applied to lookups made by the default transport.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Returns the current site secret. Called once per lookup, so a provider
/// backed by a mutable source picks up rotated secrets immediately.
pub type SecretProvider = Arc<dyn Fn() -> String + Send + Sync>;

/// Anything that can turn a token and client IP into a verdict.
///
/// `Ok(true)` accepts, `Ok(false)` rejects, and an error classifies why no
/// plain verdict could be reached.
#[async_trait]
pub trait TokenVerifier: Send + Sync {
    async fn verify(&self, token: &str, client_ip: &str) -> Result<bool, VerifyError>;
}

/// Verifies tokens with a remote attestation service.
pub struct Verifier {
    secret: SecretProvider,
    transport: Arc<dyn Transport>,
    endpoint: String,
    policy: Policy,
}

impl Verifier {
    pub fn builder() -> VerifierBuilder {
        VerifierBuilder::default()
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    fn lookup_request(&self, token: &str, client_ip: &str) -> LookupRequest {
        let mut form = vec![
            ("secret", (self.secret)()),
            ("response", token.to_string()),
        ];
        if !client_ip.is_empty() {
            form.push(("remoteip", client_ip.to_string()));
        }

        LookupRequest {
            endpoint: self.endpoint.clone(),
            form,
        }
    }
}

#[async_trait]
impl TokenVerifier for Verifier {
    async fn verify(&self, token: &str, client_ip: &str) -> Result<bool, VerifyError> {
        let token = token.trim();
        if token.is_empty() {
            debug!("No token supplied, skipping lookup");
            return Ok(false);
        }

        let body = match self.transport.send(self.lookup_request(token, client_ip)).await {
            Ok(body) => body,
            Err(err) => {
                warn!(endpoint = %self.endpoint, error = %err, "Attestation lookup failed");
                return Err(VerifyError::LookupFailure);
            }
        };

        let response: AttestationResponse = match serde_json::from_slice(&body) {
            Ok(response) => response,
            Err(err) => {
                warn!(error = %err, bytes = body.len(), "Malformed attestation response");
                return Err(VerifyError::LookupFailure);
            }
        };

        evaluate(&response, &self.policy)
    }
}

impl fmt::Debug for Verifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Verifier")
            .field("secret", &"[REDACTED]")
            .field("endpoint", &self.endpoint)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

/// Builder for [`Verifier`]. Validation happens in [`build`](Self::build).
pub struct VerifierBuilder {
    secret: SecretProvider,
    transport: Option<Arc<dyn Transport>>,
    endpoint: String,
    threshold: f64,
    allowed_hosts: AllowList,
    allowed_actions: AllowList,
    timeout: Duration,
}

impl Default for VerifierBuilder {
    fn default() -> Self {
        Self {
            secret: Arc::new(String::new),
            transport: None,
            endpoint: DEFAULT_ENDPOINT.to_string(),
            threshold: DEFAULT_THRESHOLD,
            allowed_hosts: AllowList::unrestricted(),
            allowed_actions: AllowList::unrestricted(),
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl VerifierBuilder {
    pub fn secret<F>(mut self, provider: F) -> Self
    where
        F: Fn() -> String + Send + Sync + 'static,
    {
        self.secret = Arc::new(provider);
        self
    }

    /// Use a fixed secret.
    pub fn static_secret(self, secret: impl Into<String>) -> Self {
        let secret = secret.into();
        self.secret(move || secret.clone())
    }

    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn allowed_hosts<I, S>(mut self, hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_hosts = hosts.into_iter().collect();
        self
    }

    pub fn allowed_actions<I, S>(mut self, actions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_actions = actions.into_iter().collect();
        self
    }

    /// Timeout for the default `reqwest` transport. Ignored when a custom
    /// transport is supplied.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn build(self) -> ConfigResult<Verifier> {
        if !self.threshold.is_finite() || !(0.0..=1.0).contains(&self.threshold) {
            return Err(ConfigError::ThresholdOutOfRange(self.threshold));
        }
        validate_endpoint(&self.endpoint)?;

        let transport = match self.transport {
            Some(transport) => transport,
            None => Arc::new(ReqwestTransport::new(self.timeout).map_err(ConfigError::Transport)?),
        };

        Ok(Verifier {
            secret: self.secret,
            transport,
            endpoint: self.endpoint,
            policy: Policy {
                threshold: self.threshold,
                allowed_hosts: self.allowed_hosts,
                allowed_actions: self.allowed_actions,
            },
        })
    }
}

fn validate_endpoint(endpoint: &str) -> ConfigResult<()> {
    let invalid = |reason: &str| ConfigError::InvalidEndpoint {
        endpoint: endpoint.to_string(),
        reason: reason.to_string(),
    };

    let url = Url::parse(endpoint).map_err(|err| invalid(&err.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid("scheme must be http or https"));
    }
    if url.host_str().is_none() {
        return Err(invalid("missing host"));
    }
    Ok(())
}
