// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Test harness for driving the checkpoint middleware end to end.
//!
//! Provides a scripted attestation transport, an inner handler that records
//! what reached it, and helpers for building and sending requests.

#![allow(dead_code)]

use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body, Bytes},
    extract::{ConnectInfo, State},
    http::{HeaderMap, Method, Request, Response, StatusCode},
    routing::any,
    Router,
};
use recaptcha_checkpoint::{checkpoint, Gate, LookupRequest, Transport, TransportError};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tower::ServiceExt;

/// How the scripted transport answers.
#[derive(Debug, Clone)]
pub enum Reply {
    Body(String),
    ConnectionError,
}

/// Attestation transport double. Records every lookup it receives.
pub struct StubTransport {
    reply: Reply,
    requests: Mutex<Vec<LookupRequest>>,
}

impl StubTransport {
    pub fn replying(body: &str) -> Arc<Self> {
        Arc::new(Self {
            reply: Reply::Body(body.to_string()),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn unreachable() -> Arc<Self> {
        Arc::new(Self {
            reply: Reply::ConnectionError,
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn last(&self) -> Option<LookupRequest> {
        self.requests.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl Transport for StubTransport {
    async fn send(&self, request: LookupRequest) -> Result<Vec<u8>, TransportError> {
        self.requests.lock().unwrap().push(request);
        match &self.reply {
            Reply::Body(body) => Ok(body.clone().into_bytes()),
            Reply::ConnectionError => Err(TransportError::Other("connection refused".to_string())),
        }
    }
}

/// A request as seen by the inner handler.
#[derive(Debug, Clone)]
pub struct Forwarded {
    pub method: Method,
    pub uri: String,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub peer: Option<SocketAddr>,
}

/// Records every request that made it past the gate.
#[derive(Default)]
pub struct Inner {
    seen: Mutex<Vec<Forwarded>>,
}

impl Inner {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> usize {
        self.seen.lock().unwrap().len()
    }

    pub fn last(&self) -> Option<Forwarded> {
        self.seen.lock().unwrap().last().cloned()
    }
}

async fn inner_handler(State(inner): State<Arc<Inner>>, request: Request<Body>) -> &'static str {
    let (parts, body) = request.into_parts();
    let body = to_bytes(body, usize::MAX).await.unwrap_or_default();
    let peer = parts
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);

    inner.seen.lock().unwrap().push(Forwarded {
        method: parts.method,
        uri: parts.uri.to_string(),
        headers: parts.headers,
        body,
        peer,
    });
    "inner"
}

/// Router with every path handled by `inner`, behind the gate.
pub fn app(gate: Gate, inner: Arc<Inner>) -> Router {
    Router::new()
        .route("/*path", any(inner_handler))
        .with_state(inner)
        .layer(axum::middleware::from_fn_with_state(gate, checkpoint))
}

/// Attach a peer address the way `into_make_service_with_connect_info` does.
pub fn from_peer(mut request: Request<Body>, peer: &str) -> Request<Body> {
    let addr: SocketAddr = peer.parse().unwrap();
    request.extensions_mut().insert(ConnectInfo(addr));
    request
}

pub fn get(uri: &str) -> Request<Body> {
    Request::get(uri).body(Body::empty()).unwrap()
}

pub fn post_form(uri: &str, body: &str) -> Request<Body> {
    Request::post(uri)
        .header("content-type", "application/x-www-form-urlencoded")
        .body(Body::from(body.to_string()))
        .unwrap()
}

/// Send one request through the router and collect status and body text.
pub async fn send(app: Router, request: Request<Body>) -> (StatusCode, String) {
    let response: Response<Body> = app.oneshot(request).await.unwrap();
    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, String::from_utf8(body.to_vec()).unwrap())
}
