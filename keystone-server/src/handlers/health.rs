//! Health check handlers
//!
//! Provides health and readiness endpoints for monitoring and orchestration.

use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;
use utoipa::ToSchema;

use crate::state::AppState;

/// Health check response
#[derive(Serialize, ToSchema)]
pub struct HealthResponse {
    /// Service status
    pub status: &'static str,
    /// Server version from Cargo.toml
    pub version: &'static str,
    /// Service name
    pub service: &'static str,
    /// Storage backend in use
    pub backend: &'static str,
    /// Verifier in use ("webauthn" or "mock")
    pub verifier: &'static str,
}

/// GET /health - Health check endpoint
///
/// Liveness only; does not touch the store.
#[utoipa::path(
    get,
    path = "/health",
    tag = "Health",
    responses((status = 200, description = "Service is running", body = HealthResponse))
)]
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        service: "keystone-server",
        backend: state.lifecycle.store().backend(),
        verifier: state.verifier.name(),
    })
}

/// Readiness response for Kubernetes
#[derive(Serialize, ToSchema)]
pub struct ReadyResponse {
    /// Whether the service is ready to accept traffic
    pub ready: bool,
    /// Optional message explaining status
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// GET /ready - Kubernetes readiness probe
///
/// Ready once every logical table is resolved and the store answers.
#[utoipa::path(
    get,
    path = "/ready",
    tag = "Health",
    responses(
        (status = 200, description = "Ready to accept traffic", body = ReadyResponse),
        (status = 503, description = "Tables unresolved or store unreachable", body = ReadyResponse)
    )
)]
pub async fn ready(State(state): State<AppState>) -> (StatusCode, Json<ReadyResponse>) {
    let resolver = state.lifecycle.resolver();
    if !resolver.is_initialized() {
        let missing: Vec<String> = resolver.unresolved().iter().map(|t| t.to_string()).collect();
        return not_ready(format!("unresolved tables: {}", missing.join(", ")));
    }

    let ctx = state.context();
    if let Err(e) = ctx
        .run("check_health", state.lifecycle.store().check_health())
        .await
    {
        tracing::warn!(error = %e, "Readiness check failed");
        return not_ready("store unavailable".to_string());
    }

    (
        StatusCode::OK,
        Json(ReadyResponse {
            ready: true,
            message: None,
        }),
    )
}

fn not_ready(message: String) -> (StatusCode, Json<ReadyResponse>) {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(ReadyResponse {
            ready: false,
            message: Some(message),
        }),
    )
}
