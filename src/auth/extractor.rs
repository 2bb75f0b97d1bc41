// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Axum extractors over the authentication gate's marker.
//!
//! The gate only attaches an identity. These extractors are where endpoints
//! decide what they need:
//!
//! ```rust,ignore
//! async fn my_handler(Auth(user): Auth) -> impl IntoResponse {
//!     // user is AuthenticatedUser
//! }
//! ```

use std::convert::Infallible;

use axum::{extract::FromRequestParts, http::request::Parts};

use super::middleware::AuthFailure;
use super::{AuthError, AuthenticatedUser, Role};
use crate::state::AppState;
use crate::storage::{Principal, PrincipalDirectory};

/// Requires an authenticated caller.
///
/// Rejects with the reason the gate recorded, or `MissingAuthHeader`.
pub struct Auth(pub AuthenticatedUser);

impl<S: Send + Sync> FromRequestParts<S> for Auth {
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        if let Some(user) = parts.extensions.get::<AuthenticatedUser>().cloned() {
            return Ok(Auth(user));
        }
        Err(parts
            .extensions
            .get::<AuthFailure>()
            .map(|AuthFailure(e)| e.clone())
            .unwrap_or(AuthError::MissingAuthHeader))
    }
}

/// Caller identity if any; never rejects.
pub struct OptionalAuth(pub Option<AuthenticatedUser>);

impl<S: Send + Sync> FromRequestParts<S> for OptionalAuth {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(OptionalAuth(parts.extensions.get::<AuthenticatedUser>().cloned()))
    }
}

/// Look the authenticated caller up in the principal directory.
///
/// Local credentials resolve by id; external ones by their provider-verified
/// `email` claim.
pub fn resolve_principal(
    directory: &dyn PrincipalDirectory,
    user: &AuthenticatedUser,
) -> Result<Principal, AuthError> {
    let principal = match user.local_principal_id() {
        Some(id) => directory.find_by_id(id),
        None => directory.find_by_email(user.verified_email()?),
    }
    .ok_or(AuthError::UnknownPrincipal)?;

    if !principal.active {
        return Err(AuthError::AccountDisabled);
    }
    Ok(principal)
}

/// Authenticated caller resolved to an active principal record.
pub struct CurrentPrincipal(pub Principal);

impl FromRequestParts<AppState> for CurrentPrincipal {
    type Rejection = AuthError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let Auth(user) = Auth::from_request_parts(parts, state).await?;
        resolve_principal(state.directory.as_ref(), &user).map(CurrentPrincipal)
    }
}

/// Requires an active principal with the admin role.
pub struct AdminOnly(pub Principal);

impl FromRequestParts<AppState> for AdminOnly {
    type Rejection = AuthError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let CurrentPrincipal(principal) = CurrentPrincipal::from_request_parts(parts, state).await?;
        if !principal.role.has_privilege(Role::Admin) {
            return Err(AuthError::InsufficientPermissions);
        }
        Ok(AdminOnly(principal))
    }
}
