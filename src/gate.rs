// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Request gate middleware.
//!
//! The gate sits in front of application routes. For each request it
//! extracts the token and client IP, asks the verifier for a verdict, and
//! either forwards the request or answers it directly:
//!
//! | Verdict                 | Disposition              |
//! |-------------------------|--------------------------|
//! | `Ok(true)`              | forward                  |
//! | `Err(LookupFailure)`    | forward (fail open)      |
//! | `Err(ServerConfig)`     | error status (fail closed) |
//! | `Ok(false)`             | rejected status          |
//!
//! Install with `axum::middleware::from_fn_with_state(gate, checkpoint)`.

use crate::error::{ConfigError, ConfigResult, VerifyError};
use crate::extract::{
    carries_form_body, form_token, peer_ip, ClientIpExtractor, TokenExtractor, DEFAULT_TOKEN_FIELD,
};
use crate::metrics::Metrics;
use crate::verifier::TokenVerifier;
use axum::{
    body::{self, Body, Bytes},
    extract::State,
    http::{Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Status returned for invalid tokens.
pub const DEFAULT_REJECTED_STATUS: StatusCode = StatusCode::FORBIDDEN;

/// Status returned when the attestation service reports a configuration error.
pub const DEFAULT_ERROR_STATUS: StatusCode = StatusCode::INTERNAL_SERVER_ERROR;

/// Largest form body buffered for token extraction.
pub const DEFAULT_MAX_BODY_BYTES: usize = 2 * 1024 * 1024;

/// What the gate does with a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Pass the request to the next handler.
    Forward,
    /// Answer with the rejected status; the token was not acceptable.
    Reject(StatusCode),
    /// Answer with the error status; verification is misconfigured.
    Fail(StatusCode),
}

impl Disposition {
    /// Map a verifier result onto a disposition.
    pub fn from_verdict(
        verdict: Result<bool, VerifyError>,
        rejected_status: StatusCode,
        error_status: StatusCode,
    ) -> Self {
        match verdict {
            Ok(true) | Err(VerifyError::LookupFailure) => Self::Forward,
            Ok(false) => Self::Reject(rejected_status),
            Err(VerifyError::ServerConfig) => Self::Fail(error_status),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Forward => "forward",
            Self::Reject(_) => "reject",
            Self::Fail(_) => "fail",
        }
    }
}

/// Verification gate. Cheap to clone; all clones share one configuration.
#[derive(Clone)]
pub struct Gate {
    inner: Arc<GateInner>,
}

struct GateInner {
    verifier: Arc<dyn TokenVerifier>,
    token: TokenExtractor,
    client_ip: ClientIpExtractor,
    rejected_status: StatusCode,
    error_status: StatusCode,
    max_body_bytes: usize,
    metrics: Option<Metrics>,
}

impl Gate {
    pub fn builder(verifier: Arc<dyn TokenVerifier>) -> GateBuilder {
        GateBuilder::new(verifier)
    }

    pub fn rejected_status(&self) -> StatusCode {
        self.inner.rejected_status
    }

    pub fn error_status(&self) -> StatusCode {
        self.inner.error_status
    }

    pub fn max_body_bytes(&self) -> usize {
        self.inner.max_body_bytes
    }

    pub fn metrics(&self) -> Option<&Metrics> {
        self.inner.metrics.as_ref()
    }

    /// Decide what to do with a request whose form body, if any, is buffered.
    pub async fn decide(&self, request: &Request<Bytes>) -> Disposition {
        let token = (self.inner.token)(request);
        let client_ip = (self.inner.client_ip)(request);

        let verdict = self.inner.verifier.verify(&token, &client_ip).await;
        let disposition =
            Disposition::from_verdict(verdict, self.inner.rejected_status, self.inner.error_status);

        match (verdict, disposition) {
            (Err(VerifyError::LookupFailure), _) => {
                warn!(client_ip = %client_ip, path = %request.uri().path(), "Token lookup failed, failing open");
            }
            (_, Disposition::Forward) => {
                debug!(client_ip = %client_ip, path = %request.uri().path(), "Token accepted");
            }
            (_, Disposition::Reject(status)) => {
                info!(client_ip = %client_ip, path = %request.uri().path(), status = status.as_u16(), "Token rejected");
            }
            (_, Disposition::Fail(status)) => {
                warn!(client_ip = %client_ip, path = %request.uri().path(), status = status.as_u16(), "Attestation service reported a configuration error");
            }
        }

        if let Some(metrics) = &self.inner.metrics {
            metrics.record_verdict(&verdict);
            metrics.record_disposition(disposition);
        }

        disposition
    }
}

/// Axum middleware running the gate in front of `next`.
///
/// Only form-encoded POST, PUT and PATCH bodies are buffered (up to the
/// gate's limit) so extractors can read form fields; those bytes are handed
/// to `next` unchanged. Any other body is never read here and is forwarded
/// as the unread stream.
pub async fn checkpoint(State(gate): State<Gate>, request: Request<Body>, next: Next) -> Response {
    let (parts, body) = request.into_parts();

    let (request, stream) = if carries_form_body(&parts.method, &parts.headers) {
        match body::to_bytes(body, gate.inner.max_body_bytes).await {
            Ok(bytes) => (Request::from_parts(parts, bytes), None),
            Err(err) => {
                info!(error = %err, limit = gate.inner.max_body_bytes, "Form body rejected");
                return status_response(StatusCode::PAYLOAD_TOO_LARGE);
            }
        }
    } else {
        (Request::from_parts(parts, Bytes::new()), Some(body))
    };

    match gate.decide(&request).await {
        Disposition::Forward => {
            let (parts, bytes) = request.into_parts();
            let body = stream.unwrap_or_else(|| Body::from(bytes));
            next.run(Request::from_parts(parts, body)).await
        }
        Disposition::Reject(status) | Disposition::Fail(status) => status_response(status),
    }
}

/// Plain-text response carrying the status's canonical reason phrase.
fn status_response(status: StatusCode) -> Response {
    (status, status.canonical_reason().unwrap_or_default()).into_response()
}

/// Builder for [`Gate`].
pub struct GateBuilder {
    verifier: Arc<dyn TokenVerifier>,
    token: TokenExtractor,
    client_ip: ClientIpExtractor,
    rejected_status: StatusCode,
    error_status: StatusCode,
    max_body_bytes: usize,
    metrics: Option<Metrics>,
}

impl GateBuilder {
    pub fn new(verifier: Arc<dyn TokenVerifier>) -> Self {
        Self {
            verifier,
            token: form_token(DEFAULT_TOKEN_FIELD),
            client_ip: peer_ip(),
            rejected_status: DEFAULT_REJECTED_STATUS,
            error_status: DEFAULT_ERROR_STATUS,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            metrics: None,
        }
    }

    pub fn token_extractor(mut self, extractor: TokenExtractor) -> Self {
        self.token = extractor;
        self
    }

    pub fn client_ip_extractor(mut self, extractor: ClientIpExtractor) -> Self {
        self.client_ip = extractor;
        self
    }

    pub fn rejected_status(mut self, status: StatusCode) -> Self {
        self.rejected_status = status;
        self
    }

    pub fn error_status(mut self, status: StatusCode) -> Self {
        self.error_status = status;
        self
    }

    pub fn max_body_bytes(mut self, limit: usize) -> Self {
        self.max_body_bytes = limit;
        self
    }

    pub fn metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn build(self) -> ConfigResult<Gate> {
        check_error_status("rejected_status", self.rejected_status)?;
        check_error_status("error_status", self.error_status)?;
        if self.max_body_bytes == 0 {
            return Err(ConfigError::ZeroBodyLimit);
        }

        Ok(Gate {
            inner: Arc::new(GateInner {
                verifier: self.verifier,
                token: self.token,
                client_ip: self.client_ip,
                rejected_status: self.rejected_status,
                error_status: self.error_status,
                max_body_bytes: self.max_body_bytes,
                metrics: self.metrics,
            }),
        })
    }
}

fn check_error_status(field: &'static str, status: StatusCode) -> ConfigResult<()> {
    if status.is_client_error() || status.is_server_error() {
        Ok(())
    } else {
        Err(ConfigError::InvalidStatus {
            field,
            code: status.as_u16(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::extract::ConnectInfo;
    use std::net::SocketAddr;
    use std::sync::Mutex;

    /// Verifier double that records its inputs and returns a fixed verdict.
    struct ScriptedVerifier {
        verdict: Result<bool, VerifyError>,
        seen: Mutex<Vec<(String, String)>>,
    }

    impl ScriptedVerifier {
        fn new(verdict: Result<bool, VerifyError>) -> Arc<Self> {
            Arc::new(Self {
                verdict,
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl TokenVerifier for ScriptedVerifier {
        async fn verify(&self, token: &str, client_ip: &str) -> Result<bool, VerifyError> {
            self.seen
                .lock()
                .unwrap()
                .push((token.to_string(), client_ip.to_string()));
            self.verdict
        }
    }

    fn request() -> Request<Bytes> {
        Request::get("/some-path/").body(Bytes::new()).unwrap()
    }

    #[test]
    fn test_disposition_mapping() {
        let rejected = StatusCode::FORBIDDEN;
        let error = StatusCode::INTERNAL_SERVER_ERROR;

        assert_eq!(Disposition::from_verdict(Ok(true), rejected, error), Disposition::Forward);
        assert_eq!(
            Disposition::from_verdict(Err(VerifyError::LookupFailure), rejected, error),
            Disposition::Forward
        );
        assert_eq!(
            Disposition::from_verdict(Err(VerifyError::ServerConfig), rejected, error),
            Disposition::Fail(error)
        );
        assert_eq!(
            Disposition::from_verdict(Ok(false), rejected, error),
            Disposition::Reject(rejected)
        );
    }

    #[tokio::test]
    async fn test_token_and_client_ip_read_from_request() {
        let verifier = ScriptedVerifier::new(Ok(true));
        let gate = Gate::builder(verifier.clone()).build().unwrap();

        let addr: SocketAddr = "1.2.3.4:4000".parse().unwrap();
        let mut request = Request::get("/some-path/?g-recaptcha-response=my-token")
            .body(Bytes::new())
            .unwrap();
        request.extensions_mut().insert(ConnectInfo(addr));

        assert_eq!(gate.decide(&request).await, Disposition::Forward);
        assert_eq!(
            verifier.seen.lock().unwrap().as_slice(),
            &[("my-token".to_string(), "1.2.3.4".to_string())]
        );
    }

    #[tokio::test]
    async fn test_custom_extractors_and_statuses() {
        let verifier = ScriptedVerifier::new(Ok(false));
        let gate = Gate::builder(verifier.clone())
            .token_extractor(Arc::new(|_: &Request<Bytes>| "fixed-token".to_string()))
            .client_ip_extractor(Arc::new(|_: &Request<Bytes>| "9.9.9.9".to_string()))
            .rejected_status(StatusCode::UNAUTHORIZED)
            .build()
            .unwrap();

        assert_eq!(
            gate.decide(&request()).await,
            Disposition::Reject(StatusCode::UNAUTHORIZED)
        );
        assert_eq!(
            verifier.seen.lock().unwrap().as_slice(),
            &[("fixed-token".to_string(), "9.9.9.9".to_string())]
        );
    }

    #[tokio::test]
    async fn test_decisions_are_counted() {
        let metrics = Metrics::new().unwrap();
        let gate = Gate::builder(ScriptedVerifier::new(Err(VerifyError::ServerConfig)))
            .metrics(metrics.clone())
            .build()
            .unwrap();

        assert_eq!(
            gate.decide(&request()).await,
            Disposition::Fail(StatusCode::INTERNAL_SERVER_ERROR)
        );
        assert_eq!(metrics.disposition_count("fail"), 1);
    }

    #[tokio::test]
    async fn test_status_response_body_is_reason_phrase() {
        let response = status_response(StatusCode::FORBIDDEN);
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(
            response.headers()["content-type"],
            "text/plain; charset=utf-8"
        );

        let body = body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(body.as_ref(), b"Forbidden");
    }

    #[test]
    fn test_builder_rejects_non_error_statuses() {
        let result = Gate::builder(ScriptedVerifier::new(Ok(true)))
            .rejected_status(StatusCode::OK)
            .build();
        assert!(matches!(
            result,
            Err(ConfigError::InvalidStatus { field: "rejected_status", code: 200 })
        ));

        let result = Gate::builder(ScriptedVerifier::new(Ok(true)))
            .error_status(StatusCode::FOUND)
            .build();
        assert!(matches!(
            result,
            Err(ConfigError::InvalidStatus { field: "error_status", code: 302 })
        ));
    }

    #[test]
    fn test_builder_applies_body_limit() {
        let gate = Gate::builder(ScriptedVerifier::new(Ok(true))).build().unwrap();
        assert_eq!(gate.max_body_bytes(), DEFAULT_MAX_BODY_BYTES);

        let gate = Gate::builder(ScriptedVerifier::new(Ok(true)))
            .max_body_bytes(4096)
            .build()
            .unwrap();
        assert_eq!(gate.max_body_bytes(), 4096);
    }

    #[test]
    fn test_builder_rejects_zero_body_limit() {
        let result = Gate::builder(ScriptedVerifier::new(Ok(true)))
            .max_body_bytes(0)
            .build();
        assert!(matches!(result, Err(ConfigError::ZeroBodyLimit)));
    }
}
