// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Admin-only API endpoints for session management.
//!
//! These endpoints require the Admin role and provide:
//! - Forced sign-out of a principal (revoke every refresh session)
//! - Purging a principal's session rows entirely

use axum::{
    extract::{Path, State},
    Json,
};
use tracing::info;

use crate::{
    auth::AdminOnly,
    error::ApiError,
    models::SessionsAffectedResponse,
    state::AppState,
    storage::PrincipalId,
};

/// Revoke every refresh session of a principal.
#[utoipa::path(
    delete,
    path = "/api/admin/principals/{id}/sessions",
    tag = "Admin",
    params(("id" = i64, Path, description = "Principal id")),
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Sessions revoked", body = SessionsAffectedResponse),
        (status = 401, description = "Not authenticated"),
        (status = 403, description = "Not authorized (admin required)")
    )
)]
pub async fn revoke_principal_sessions(
    AdminOnly(admin): AdminOnly,
    State(state): State<AppState>,
    Path(id): Path<PrincipalId>,
) -> Result<Json<SessionsAffectedResponse>, ApiError> {
    let affected = state.sessions.revoke_all_for_principal(id)?;
    info!(admin_id = admin.id, principal_id = id, affected, "Admin revoked sessions");
    Ok(Json(SessionsAffectedResponse {
        principal_id: id,
        affected,
    }))
}

/// Delete every refresh session row of a principal, revoked or not.
#[utoipa::path(
    delete,
    path = "/api/admin/principals/{id}/sessions/purge",
    tag = "Admin",
    params(("id" = i64, Path, description = "Principal id")),
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Sessions deleted", body = SessionsAffectedResponse),
        (status = 401, description = "Not authenticated"),
        (status = 403, description = "Not authorized (admin required)")
    )
)]
pub async fn purge_principal_sessions(
    AdminOnly(admin): AdminOnly,
    State(state): State<AppState>,
    Path(id): Path<PrincipalId>,
) -> Result<Json<SessionsAffectedResponse>, ApiError> {
    let affected = state.sessions.delete_all_for_principal(id)?;
    info!(admin_id = admin.id, principal_id = id, affected, "Admin purged sessions");
    Ok(Json(SessionsAffectedResponse {
        principal_id: id,
        affected,
    }))
}
