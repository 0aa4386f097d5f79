// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! reCAPTCHA Checkpoint
//!
//! Request-gating middleware that verifies a client-supplied reCAPTCHA
//! token with the attestation service before letting a request through:
//!
//! - Token read from the `g-recaptcha-response` form field (pluggable)
//! - Score threshold, hostname and action allow-lists
//! - Expired/duplicate tokens rejected (403 default)
//! - Service-reported configuration errors fail closed (500 default)
//! - Unreachable or malformed lookups fail open

pub mod config;
pub mod error;
pub mod evaluator;
pub mod extract;
pub mod gate;
pub mod metrics;
pub mod transport;
pub mod verifier;
pub mod wireup;

pub use config::Config;
pub use error::{ConfigError, TransportError, VerifyError};
pub use evaluator::{evaluate, AllowList, AttestationResponse, Policy};
pub use gate::{checkpoint, Disposition, Gate, GateBuilder};
pub use metrics::Metrics;
pub use transport::{LookupRequest, ReqwestTransport, Transport, MAX_REPLY_BYTES};
pub use verifier::{SecretProvider, TokenVerifier, Verifier, VerifierBuilder};
