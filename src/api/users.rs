// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! User endpoints.

use axum::{extract::State, Json};

use crate::{
    auth::CurrentPrincipal,
    error::ApiError,
    models::{SessionSummary, SessionsResponse, UserSummary},
    state::AppState,
};

/// Get the current authenticated principal.
#[utoipa::path(
    get,
    path = "/api/users/me",
    tag = "Users",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "User information", body = UserSummary),
        (status = 401, description = "Unauthorized - invalid or missing token"),
        (status = 403, description = "Account disabled"),
    )
)]
pub async fn get_current_user(CurrentPrincipal(principal): CurrentPrincipal) -> Json<UserSummary> {
    Json(UserSummary::from(&principal))
}

/// List the caller's active refresh sessions.
///
/// Token values are never returned.
#[utoipa::path(
    get,
    path = "/api/users/me/sessions",
    tag = "Users",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Active sessions, oldest first", body = SessionsResponse),
        (status = 401, description = "Unauthorized - invalid or missing token"),
    )
)]
pub async fn list_my_sessions(
    CurrentPrincipal(principal): CurrentPrincipal,
    State(state): State<AppState>,
) -> Result<Json<SessionsResponse>, ApiError> {
    let sessions = state
        .sessions
        .active_for_principal(principal.id)?
        .iter()
        .map(SessionSummary::from)
        .collect();
    Ok(Json(SessionsResponse { sessions }))
}
