// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Builds a ready-to-install [`Gate`] from [`Config`].

use crate::config::{Config, GateSettings, VerifierSettings};
use crate::error::{ConfigError, ConfigResult};
use crate::extract::{form_token, forwarded_client_ip, peer_ip};
use crate::gate::Gate;
use crate::metrics::Metrics;
use crate::transport::Transport;
use crate::verifier::{SecretProvider, TokenVerifier, Verifier};
use axum::http::StatusCode;
use std::sync::{Arc, Once};
use tracing::warn;

/// Secret provider reading `var` from the environment on every lookup.
///
/// A missing variable yields an empty secret; the attestation service then
/// reports `missing-input-secret` and the gate fails closed. The missing
/// variable is logged once per provider.
pub fn env_secret(var: impl Into<String>) -> SecretProvider {
    let var = var.into();
    let warned = Once::new();
    Arc::new(move || match std::env::var(&var) {
        Ok(secret) => secret,
        Err(_) => {
            warned.call_once(|| warn!(var = %var, "Attestation secret is not set"));
            String::new()
        }
    })
}

/// Build a verifier from settings.
///
/// Without an explicit `transport` a `reqwest` transport honouring
/// `settings.timeout_ms` is used.
pub fn verifier_from_settings(
    settings: &VerifierSettings,
    secret: SecretProvider,
    transport: Option<Arc<dyn Transport>>,
) -> ConfigResult<Verifier> {
    let mut builder = Verifier::builder()
        .secret(move || secret())
        .endpoint(settings.endpoint.clone())
        .threshold(settings.threshold)
        .allowed_hosts(settings.allowed_hosts.iter().cloned())
        .allowed_actions(settings.allowed_actions.iter().cloned())
        .timeout(settings.timeout());

    if let Some(transport) = transport {
        builder = builder.transport(transport);
    }

    builder.build()
}

/// Build a gate around `verifier` from settings.
pub fn gate_from_settings(
    settings: &GateSettings,
    verifier: Arc<dyn TokenVerifier>,
    metrics: Option<Metrics>,
) -> ConfigResult<Gate> {
    let client_ip = if settings.trust_forwarded_for {
        forwarded_client_ip()
    } else {
        peer_ip()
    };

    let mut builder = Gate::builder(verifier)
        .token_extractor(form_token(settings.token_field.clone()))
        .client_ip_extractor(client_ip)
        .rejected_status(status("rejected_status", settings.rejected_status)?)
        .error_status(status("error_status", settings.error_status)?)
        .max_body_bytes(settings.max_body_bytes);

    if let Some(metrics) = metrics {
        builder = builder.metrics(metrics);
    }

    builder.build()
}

/// Build the complete gate: verifier, transport and gate settings.
pub fn build_gate(
    config: &Config,
    secret: SecretProvider,
    transport: Option<Arc<dyn Transport>>,
    metrics: Option<Metrics>,
) -> ConfigResult<Gate> {
    config.validate()?;
    let verifier = verifier_from_settings(&config.verifier, secret, transport)?;
    gate_from_settings(&config.gate, Arc::new(verifier), metrics)
}

fn status(field: &'static str, code: u16) -> ConfigResult<StatusCode> {
    StatusCode::from_u16(code).map_err(|_| ConfigError::InvalidStatus { field, code })
}
