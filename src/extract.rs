// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Token and client-IP extraction strategies.
//!
//! Extractors see the request as `Request<Bytes>`. The gate only buffers
//! bodies that can carry a form field (see [`carries_form_body`]); for every
//! other request the body seen here is empty and the unread stream is
//! forwarded untouched.

use axum::{
    body::Bytes,
    extract::ConnectInfo,
    http::{header, HeaderMap, HeaderName, Method, Request},
};
use std::net::SocketAddr;
use std::sync::Arc;

/// Form field the reCAPTCHA widget submits the token in.
pub const DEFAULT_TOKEN_FIELD: &str = "g-recaptcha-response";

/// Reads the attestation token from a request. Absent tokens are `""`.
pub type TokenExtractor = Arc<dyn Fn(&Request<Bytes>) -> String + Send + Sync>;

/// Reads the client IP from a request. Unknown addresses are `""`.
pub type ClientIpExtractor = Arc<dyn Fn(&Request<Bytes>) -> String + Send + Sync>;

/// Token from a form field.
///
/// For POST, PUT and PATCH requests with a form-encoded body the body is
/// searched first; the query string is the fallback and the only source
/// for other methods.
pub fn form_token(field: impl Into<String>) -> TokenExtractor {
    let field = field.into();
    Arc::new(move |request: &Request<Bytes>| form_value(request, &field).unwrap_or_default())
}

/// Token from a request header, e.g. for API clients that cannot post forms.
pub fn header_token(name: HeaderName) -> TokenExtractor {
    Arc::new(move |request: &Request<Bytes>| {
        request
            .headers()
            .get(&name)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string()
    })
}

/// Client IP from the socket peer address (`ConnectInfo<SocketAddr>`).
pub fn peer_ip() -> ClientIpExtractor {
    Arc::new(|request: &Request<Bytes>| peer_addr(request).unwrap_or_default())
}

/// Client IP for deployments behind a trusted reverse proxy.
///
/// Uses the first `X-Forwarded-For` entry, then `X-Real-IP`, then the peer
/// address.
pub fn forwarded_client_ip() -> ClientIpExtractor {
    Arc::new(|request: &Request<Bytes>| {
        let headers = request.headers();

        if let Some(xff) = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
            if let Some(ip) = xff.split(',').next().map(str::trim).filter(|ip| !ip.is_empty()) {
                return ip.to_string();
            }
        }

        if let Some(ip) = headers
            .get("x-real-ip")
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|ip| !ip.is_empty())
        {
            return ip.to_string();
        }

        peer_addr(request).unwrap_or_default()
    })
}

fn peer_addr(request: &Request<Bytes>) -> Option<String> {
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
}

fn form_value(request: &Request<Bytes>, field: &str) -> Option<String> {
    if carries_form_body(request.method(), request.headers()) {
        if let Some(value) = find_field(request.body(), field) {
            return Some(value);
        }
    }

    request
        .uri()
        .query()
        .and_then(|query| find_field(query.as_bytes(), field))
}

/// Whether a request with this method and headers has a form-encoded body
/// that could hold the token: POST, PUT or PATCH with
/// `application/x-www-form-urlencoded`.
pub fn carries_form_body(method: &Method, headers: &HeaderMap) -> bool {
    if !matches!(*method, Method::POST | Method::PUT | Method::PATCH) {
        return false;
    }

    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|ct| ct.split(';').next().unwrap_or(ct).trim())
        .is_some_and(|ct| ct.eq_ignore_ascii_case("application/x-www-form-urlencoded"))
}

fn find_field(encoded: &[u8], field: &str) -> Option<String> {
    url::form_urlencoded::parse(encoded)
        .find(|(key, _)| key == field)
        .map(|(_, value)| value.into_owned())
}
