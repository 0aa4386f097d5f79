// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! reCAPTCHA Checkpoint Service
//!
//! Hosts the checkpoint middleware in front of a sample form endpoint.
//! Routes outside the protected group (`/health`, `/metrics`) bypass the
//! gate.
//!
//! ## Configuration
//!
//! Configuration is loaded from a JSON file named by `CHECKPOINT_CONFIG`
//! and/or environment variables:
//!
//! - `BIND_ADDR`: Server bind address (default: 0.0.0.0:8080)
//! - `RECAPTCHA_SECRET`: Site secret, read on every lookup
//! - `RECAPTCHA_THRESHOLD`: Minimum accepted score (default: 0.3)
//! - `RECAPTCHA_ALLOWED_HOSTS`, `RECAPTCHA_ALLOWED_ACTIONS`: comma separated
//! - `RECAPTCHA_ENDPOINT`, `RECAPTCHA_TIMEOUT_MS`

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use recaptcha_checkpoint::{
    checkpoint,
    config::Config,
    metrics::Metrics,
    wireup::{build_gate, env_secret},
};

/// Health check response.
#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    service: &'static str,
    version: &'static str,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        service: "recaptcha-checkpoint",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn metrics_endpoint(State(metrics): State<Metrics>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        metrics.render(),
    )
}

/// Stand-in for application logic; only reached by verified requests.
async fn submit() -> &'static str {
    "Submission accepted"
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer().json())
        .with(
            EnvFilter::builder()
                .with_default_directive(Level::INFO.into())
                .from_env_lossy(),
        )
        .init();

    // Load configuration
    let config = Config::load()?;
    info!(
        bind_addr = %config.bind_addr,
        endpoint = %config.verifier.endpoint,
        threshold = config.verifier.threshold,
        allowed_hosts = ?config.verifier.allowed_hosts,
        allowed_actions = ?config.verifier.allowed_actions,
        "Starting reCAPTCHA checkpoint"
    );

    let metrics = Metrics::new()?;
    let gate = build_gate(
        &config,
        env_secret(config.verifier.secret_env.clone()),
        None,
        config.metrics.enabled.then(|| metrics.clone()),
    )?;

    // Build router
    let protected = Router::new()
        .route("/submit", post(submit).get(submit))
        .layer(axum::middleware::from_fn_with_state(gate, checkpoint));

    let mut app = Router::new()
        .route("/health", get(health))
        .route("/healthz", get(health))
        .merge(protected);

    if config.metrics.enabled {
        app = app.merge(
            Router::new()
                .route(&config.metrics.path, get(metrics_endpoint))
                .with_state(metrics),
        );
    }

    let app = app.layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()));

    // Start server
    let addr: SocketAddr = config.bind_addr.parse()?;
    let listener = TcpListener::bind(addr).await?;
    info!(addr = %addr, "Server listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
