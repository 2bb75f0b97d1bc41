// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Authentication errors.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

/// Authentication error type.
///
/// Produced while resolving and verifying bearer credentials. The gate
/// records the failure on the request instead of rejecting, and the `Auth`
/// extractor turns it into a response when an endpoint requires a principal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// No authorization header present
    MissingAuthHeader,
    /// Invalid authorization header format
    InvalidAuthHeader,
    /// Token is malformed
    MalformedToken,
    /// Token signature is invalid
    InvalidSignature,
    /// Token has expired
    TokenExpired,
    /// Token `typ` does not match the expected use
    TypeMismatch,
    /// Token issuer is not one of the configured trust authorities
    UnknownIssuer,
    /// Token audience is invalid
    InvalidAudience,
    /// Provider discovery document could not be fetched
    DiscoveryError(String),
    /// JWKS fetch failed
    JwksFetchError(String),
    /// No matching key in JWKS
    NoMatchingKey,
    /// Username/password pair rejected
    InvalidCredentials,
    /// Principal exists but is disabled
    AccountDisabled,
    /// External credential maps to no local principal
    UnknownPrincipal,
    /// External credential carries an email the provider has not verified
    UnverifiedEmail,
    /// Internal error
    InternalError(String),
    /// Insufficient permissions
    InsufficientPermissions,
}

#[derive(Serialize)]
struct AuthErrorBody {
    error: String,
    error_code: String,
}

impl AuthError {
    /// Get the error code for this error.
    pub fn error_code(&self) -> &'static str {
        match self {
            AuthError::MissingAuthHeader => "missing_auth_header",
            AuthError::InvalidAuthHeader => "invalid_auth_header",
            AuthError::MalformedToken => "malformed_token",
            AuthError::InvalidSignature => "invalid_signature",
            AuthError::TokenExpired => "token_expired",
            AuthError::TypeMismatch => "type_mismatch",
            AuthError::UnknownIssuer => "unknown_issuer",
            AuthError::InvalidAudience => "invalid_audience",
            AuthError::DiscoveryError(_) => "discovery_error",
            AuthError::JwksFetchError(_) => "jwks_fetch_error",
            AuthError::NoMatchingKey => "no_matching_key",
            AuthError::InvalidCredentials => "invalid_credentials",
            AuthError::AccountDisabled => "account_disabled",
            AuthError::UnknownPrincipal => "unknown_principal",
            AuthError::UnverifiedEmail => "unverified_email",
            AuthError::InternalError(_) => "internal_error",
            AuthError::InsufficientPermissions => "insufficient_permissions",
        }
    }

    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            AuthError::MissingAuthHeader
            | AuthError::InvalidAuthHeader
            | AuthError::MalformedToken
            | AuthError::InvalidSignature
            | AuthError::TokenExpired
            | AuthError::TypeMismatch
            | AuthError::UnknownIssuer
            | AuthError::InvalidAudience
            | AuthError::NoMatchingKey
            | AuthError::InvalidCredentials
            | AuthError::UnknownPrincipal
            | AuthError::UnverifiedEmail => StatusCode::UNAUTHORIZED,
            AuthError::AccountDisabled | AuthError::InsufficientPermissions => {
                StatusCode::FORBIDDEN
            }
            AuthError::DiscoveryError(_)
            | AuthError::JwksFetchError(_)
            | AuthError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl std::fmt::Display for AuthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthError::MissingAuthHeader => write!(f, "Authorization header is required"),
            AuthError::InvalidAuthHeader => {
                write!(f, "Invalid authorization header format (expected 'Bearer <token>')")
            }
            AuthError::MalformedToken => write!(f, "Token is malformed"),
            AuthError::InvalidSignature => write!(f, "Token signature is invalid"),
            AuthError::TokenExpired => write!(f, "Token has expired"),
            AuthError::TypeMismatch => write!(f, "Token type is not valid for this use"),
            AuthError::UnknownIssuer => write!(f, "Token issuer is not trusted"),
            AuthError::InvalidAudience => write!(f, "Token audience is invalid"),
            AuthError::DiscoveryError(msg) => {
                write!(f, "Failed to load provider discovery document: {msg}")
            }
            AuthError::JwksFetchError(msg) => write!(f, "Failed to fetch JWKS: {msg}"),
            AuthError::NoMatchingKey => write!(f, "No matching key found in JWKS"),
            AuthError::InvalidCredentials => write!(f, "Invalid username or password"),
            AuthError::AccountDisabled => write!(f, "Account is disabled"),
            AuthError::UnknownPrincipal => write!(f, "No account is linked to this identity"),
            AuthError::UnverifiedEmail => {
                write!(f, "Identity provider has not verified this email address")
            }
            AuthError::InternalError(msg) => write!(f, "Internal authentication error: {msg}"),
            AuthError::InsufficientPermissions => {
                write!(f, "Insufficient permissions for this operation")
            }
        }
    }
}

impl std::error::Error for AuthError {}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(AuthErrorBody {
            error: self.to_string(),
            error_code: self.error_code().to_string(),
        });
        (status, body).into_response()
    }
}
