// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Outbound transport for attestation lookups.
//!
//! The verifier talks to the attestation service through the [`Transport`]
//! trait so that tests can substitute a double without network access.

use crate::error::TransportError;
use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

/// Largest attestation reply read into memory. Real replies are a few
/// hundred bytes.
pub const MAX_REPLY_BYTES: usize = 64 * 1024;

/// A form-encoded POST to the attestation service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LookupRequest {
    pub endpoint: String,
    pub form: Vec<(&'static str, String)>,
}

impl LookupRequest {
    /// Value of the named form field, if present.
    pub fn field(&self, name: &str) -> Option<&str> {
        self.form
            .iter()
            .find(|(key, _)| *key == name)
            .map(|(_, value)| value.as_str())
    }
}

/// Performs one HTTP round trip and returns the full response body.
///
/// Implementations must not retry. Dropping the returned future cancels
/// the call.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: LookupRequest) -> Result<Vec<u8>, TransportError>;
}

/// [`Transport`] backed by a shared `reqwest` client.
///
/// Replies larger than [`MAX_REPLY_BYTES`] are refused with
/// [`TransportError::TooLarge`].
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Create a transport whose requests time out after `timeout`.
    pub fn new(timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }

    /// Wrap an existing client.
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: LookupRequest) -> Result<Vec<u8>, TransportError> {
        let mut response = self
            .client
            .post(&request.endpoint)
            .form(&request.form)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status(status.as_u16()));
        }

        if response
            .content_length()
            .is_some_and(|len| len > MAX_REPLY_BYTES as u64)
        {
            return Err(TransportError::TooLarge(MAX_REPLY_BYTES));
        }

        let mut body = Vec::new();
        while let Some(chunk) = response.chunk().await? {
            if body.len() + chunk.len() > MAX_REPLY_BYTES {
                return Err(TransportError::TooLarge(MAX_REPLY_BYTES));
            }
            body.extend_from_slice(&chunk);
        }

        debug!(status = status.as_u16(), bytes = body.len(), "Attestation lookup completed");
        Ok(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_request_field() {
        let request = LookupRequest {
            endpoint: "https://attest.example/verify".to_string(),
            form: vec![("secret", "s".to_string()), ("response", "tok".to_string())],
        };

        assert_eq!(request.field("response"), Some("tok"));
        assert_eq!(request.field("remoteip"), None);
    }

    #[tokio::test]
    async fn test_connection_refused_is_transport_error() {
        let transport = ReqwestTransport::new(Duration::from_secs(2)).unwrap();
        let request = LookupRequest {
            // Port 9 (discard) on localhost is closed in test environments.
            endpoint: "http://127.0.0.1:9/siteverify".to_string(),
            form: vec![("response", "tok".to_string())],
        };

        let result = transport.send(request).await;
        assert!(matches!(result, Err(TransportError::Request(_))));
    }
}
