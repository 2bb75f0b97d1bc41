// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::collections::BTreeMap;

use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;
use tracing::warn;
use utoipa::ToSchema;

use crate::state::AppState;

/// Health check response with individual component status.
#[derive(Debug, Serialize, ToSchema)]
pub struct ReadyResponse {
    /// Overall health status ("ok" or "degraded").
    pub status: String,
    /// Individual health checks and their results.
    pub checks: HealthChecks,
}

/// Individual health check results.
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthChecks {
    /// Whether the service process is running.
    pub service: String,
    /// Refresh session database.
    pub session_store: String,
    /// Signing keys per external identity provider.
    /// Omitted when no provider is configured.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub identity_providers: BTreeMap<String, String>,
}

/// Simple health check response for liveness probes.
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
}

fn check_session_store(state: &AppState) -> String {
    match state.sessions.ping() {
        Ok(()) => "ok".to_string(),
        Err(e) => {
            warn!(error = %e, "Session store health check failed");
            "unavailable".to_string()
        }
    }
}

/// Run discovery and key fetches for every provider.
async fn check_providers(state: &AppState) -> BTreeMap<String, String> {
    let mut results = BTreeMap::new();
    for provider in state.resolver.external_providers() {
        let status = match provider.ensure_keys().await {
            Ok(()) => "ok".to_string(),
            Err(e) => {
                warn!(provider = %provider.name(), error = %e, "Identity provider unavailable");
                "unavailable".to_string()
            }
        };
        results.insert(provider.name().to_string(), status);
    }
    results
}

/// Health check endpoint handler.
///
/// Returns 200 if all checks pass, 503 if any check fails.
#[utoipa::path(
    get,
    path = "/health",
    tag = "Health",
    responses(
        (status = 200, description = "Service is healthy", body = ReadyResponse),
        (status = 503, description = "Service is unhealthy", body = ReadyResponse)
    )
)]
pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<ReadyResponse>) {
    let session_store = check_session_store(&state);
    let identity_providers = check_providers(&state).await;

    let all_ok = session_store == "ok" && identity_providers.values().all(|s| s == "ok");

    let response = ReadyResponse {
        status: if all_ok { "ok" } else { "degraded" }.to_string(),
        checks: HealthChecks {
            service: "ok".to_string(),
            session_store,
            identity_providers,
        },
    };

    let status = if all_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status, Json(response))
}

/// Liveness probe handler.
///
/// Always returns 200 if the process is running.
/// Does not check dependencies - use readiness for that.
#[utoipa::path(
    get,
    path = "/health/live",
    tag = "Health",
    responses(
        (status = 200, description = "Service is alive", body = HealthResponse)
    )
)]
pub async fn liveness() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

/// Readiness probe handler.
///
/// Returns 200 only if all dependencies are available.
#[utoipa::path(
    get,
    path = "/health/ready",
    tag = "Health",
    responses(
        (status = 200, description = "Service is ready", body = ReadyResponse),
        (status = 503, description = "Service is not ready", body = ReadyResponse)
    )
)]
pub async fn readiness(state: State<AppState>) -> (StatusCode, Json<ReadyResponse>) {
    health(state).await
}
