// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Session endpoints under `/api/auth`.
//!
//! These paths are on the public allow-list; the gate does not run for them.
//! `external/exchange` reads its bearer credential itself.

use axum::{
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    Json,
};

use crate::{
    auth::middleware::bearer_token,
    error::ApiError,
    models::{
        ForgotPasswordRequest, LoginRequest, LoginResponse, LogoutRequest, MessageResponse,
        RefreshRequest, RegisterRequest, ResetPasswordRequest, ResetTokenStatus, TokenQuery,
    },
    state::AppState,
};

/// Exchange username and password for an access credential and a refresh session.
#[utoipa::path(
    post,
    path = "/api/auth/login",
    tag = "Auth",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Credentials issued", body = LoginResponse),
        (status = 401, description = "Invalid username or password"),
        (status = 403, description = "Account disabled"),
        (status = 429, description = "Too many login attempts")
    )
)]
pub async fn login(
    State(state): State<AppState>,
    Json(request): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, ApiError> {
    let response = state
        .session_service
        .login(&request.username, &request.password)?;
    Ok(Json(response))
}

/// Obtain a new access credential from a refresh session.
#[utoipa::path(
    post,
    path = "/api/auth/refresh",
    tag = "Auth",
    request_body = RefreshRequest,
    responses(
        (status = 200, description = "Access credential refreshed", body = LoginResponse),
        (status = 400, description = "Refresh token expired or revoked"),
        (status = 404, description = "Refresh token not found")
    )
)]
pub async fn refresh(
    State(state): State<AppState>,
    Json(request): Json<RefreshRequest>,
) -> Result<Json<LoginResponse>, ApiError> {
    Ok(Json(state.session_service.refresh(&request.refresh_token)?))
}

/// Revoke the presented refresh session.
#[utoipa::path(
    post,
    path = "/api/auth/logout",
    tag = "Auth",
    request_body = LogoutRequest,
    responses(
        (status = 200, description = "Logged out", body = MessageResponse)
    )
)]
pub async fn logout(
    State(state): State<AppState>,
    Json(request): Json<LogoutRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    state.session_service.logout(&request.refresh_token)?;
    Ok(Json(MessageResponse::new("Logged out")))
}

/// Trade an external identity provider credential for local credentials.
#[utoipa::path(
    post,
    path = "/api/auth/external/exchange",
    tag = "Auth",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Credentials issued", body = LoginResponse),
        (status = 401, description = "Credential invalid, or no matching local account"),
        (status = 403, description = "Account disabled")
    )
)]
pub async fn exchange_external(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<LoginResponse>, ApiError> {
    let credential = bearer_token(&headers)?;
    Ok(Json(state.session_service.exchange_external(credential).await?))
}

/// Request a password-reset link.
///
/// Always answers 202 so the response does not reveal registered addresses.
#[utoipa::path(
    post,
    path = "/api/auth/forgot-password",
    tag = "Auth",
    request_body = ForgotPasswordRequest,
    responses(
        (status = 202, description = "Reset link sent if the address is registered", body = MessageResponse),
        (status = 429, description = "Too many reset requests")
    )
)]
pub async fn forgot_password(
    State(state): State<AppState>,
    Json(request): Json<ForgotPasswordRequest>,
) -> Result<(StatusCode, Json<MessageResponse>), ApiError> {
    state.session_service.forgot_password(request.email.trim())?;
    Ok((
        StatusCode::ACCEPTED,
        Json(MessageResponse::new(
            "If the address is registered, a reset link has been sent",
        )),
    ))
}

/// Check a password-reset credential.
#[utoipa::path(
    get,
    path = "/api/auth/reset-password/verify",
    tag = "Auth",
    params(TokenQuery),
    responses(
        (status = 200, description = "Reset credential is valid", body = ResetTokenStatus),
        (status = 400, description = "Reset credential invalid or expired")
    )
)]
pub async fn verify_reset_token(
    State(state): State<AppState>,
    Query(query): Query<TokenQuery>,
) -> Result<Json<ResetTokenStatus>, ApiError> {
    let principal = state.session_service.verify_reset_token(&query.token)?;
    Ok(Json(ResetTokenStatus {
        valid: true,
        principal_id: principal.id,
    }))
}

/// Set a new password with a reset credential.
///
/// Every refresh session of the principal is revoked.
#[utoipa::path(
    put,
    path = "/api/auth/reset-password",
    tag = "Auth",
    request_body = ResetPasswordRequest,
    responses(
        (status = 200, description = "Password changed", body = MessageResponse),
        (status = 400, description = "Reset credential invalid or expired, or password too short")
    )
)]
pub async fn reset_password(
    State(state): State<AppState>,
    Json(request): Json<ResetPasswordRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    state
        .session_service
        .reset_password(&request.token, &request.new_password)?;
    Ok(Json(MessageResponse::new("Password changed")))
}

/// Register a new account and mail its verification link.
#[utoipa::path(
    post,
    path = "/api/auth/register",
    tag = "Auth",
    request_body = RegisterRequest,
    responses(
        (status = 202, description = "Account created, verification link sent", body = MessageResponse),
        (status = 400, description = "Invalid username, email or password"),
        (status = 409, description = "Username or email already registered"),
        (status = 429, description = "Too many registrations")
    )
)]
pub async fn register(
    State(state): State<AppState>,
    Json(request): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<MessageResponse>), ApiError> {
    state.session_service.register(request.into())?;
    Ok((
        StatusCode::ACCEPTED,
        Json(MessageResponse::new("Verification link sent")),
    ))
}

/// Activate an account from its verification link.
#[utoipa::path(
    get,
    path = "/api/auth/register/verify",
    tag = "Auth",
    params(TokenQuery),
    responses(
        (status = 200, description = "Account activated", body = MessageResponse),
        (status = 400, description = "Verification link invalid or expired")
    )
)]
pub async fn verify_registration(
    State(state): State<AppState>,
    Query(query): Query<TokenQuery>,
) -> Result<Json<MessageResponse>, ApiError> {
    state.session_service.verify_registration(&query.token)?;
    Ok(Json(MessageResponse::new("Account verified")))
}
