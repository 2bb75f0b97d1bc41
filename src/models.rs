// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # API Data Models
//!
//! Request and response bodies of the REST API. All types derive `Serialize`
//! and/or `Deserialize` plus `ToSchema` for OpenAPI documentation.
//!
//! Field names are camelCase on the wire (`accessToken`, `refreshToken`, ...).
//! Refresh-token values appear only in login/refresh responses and in the
//! requests that present them back; session listings never include them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::auth::Role;
use crate::storage::{NewPrincipal, Principal, PrincipalId, RefreshCredential};

// =============================================================================
// Authentication
// =============================================================================

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

/// Tokens issued on login, refresh and external exchange.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub access_token: String,
    /// Opaque refresh-session value
    pub refresh_token: String,
    /// Always `Bearer`
    pub token_type: String,
    /// Access-token lifetime in seconds
    pub expires_in: i64,
    pub user: UserSummary,
}

impl LoginResponse {
    pub fn bearer(
        access_token: String,
        refresh_token: String,
        expires_in: i64,
        user: UserSummary,
    ) -> Self {
        Self {
            access_token,
            refresh_token,
            token_type: "Bearer".to_string(),
            expires_in,
            user,
        }
    }
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest {
    pub refresh_token: String,
}

/// Revokes exactly the presented refresh token.
#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct LogoutRequest {
    pub refresh_token: String,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct ForgotPasswordRequest {
    pub email: String,
}

/// `?token=` of reset and registration links.
#[derive(Debug, Clone, Deserialize, utoipa::IntoParams)]
pub struct TokenQuery {
    pub token: String,
}

/// Consumes a password-reset credential.
#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResetPasswordRequest {
    pub token: String,
    pub new_password: String,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub full_name: Option<String>,
}

impl From<RegisterRequest> for NewPrincipal {
    fn from(request: RegisterRequest) -> Self {
        Self {
            username: request.username.trim().to_string(),
            email: request.email.trim().to_string(),
            full_name: request.full_name.filter(|name| !name.trim().is_empty()),
            password: request.password,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResetTokenStatus {
    pub valid: bool,
    pub principal_id: PrincipalId,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

// =============================================================================
// Principals and sessions
// =============================================================================

/// Public view of a principal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UserSummary {
    pub id: PrincipalId,
    pub username: String,
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    pub role: Role,
}

impl From<&Principal> for UserSummary {
    fn from(principal: &Principal) -> Self {
        Self {
            id: principal.id,
            username: principal.username.clone(),
            email: principal.email.clone(),
            full_name: principal.full_name.clone(),
            avatar_url: principal.avatar_url.clone(),
            role: principal.role,
        }
    }
}

/// Active refresh session, without its token value.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub id: u64,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_used_at: Option<DateTime<Utc>>,
}

impl From<&RefreshCredential> for SessionSummary {
    fn from(credential: &RefreshCredential) -> Self {
        Self {
            id: credential.id,
            created_at: credential.created_at,
            expires_at: credential.expires_at,
            last_used_at: credential.last_used_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SessionsResponse {
    pub sessions: Vec<SessionSummary>,
}

/// Result of an administrative session operation.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SessionsAffectedResponse {
    pub principal_id: PrincipalId,
    pub affected: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn login_response_uses_camel_case() {
        let response = LoginResponse::bearer(
            "a.b.c".to_string(),
            "opaque".to_string(),
            900,
            UserSummary {
                id: 1,
                username: "alice".to_string(),
                email: "alice@example.com".to_string(),
                full_name: None,
                avatar_url: None,
                role: Role::User,
            },
        );
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["accessToken"], "a.b.c");
        assert_eq!(json["refreshToken"], "opaque");
        assert_eq!(json["tokenType"], "Bearer");
        assert_eq!(json["expiresIn"], 900);
        assert_eq!(json["user"]["username"], "alice");
        assert!(json["user"].get("fullName").is_none());
    }

    #[test]
    fn logout_request_reads_refresh_token() {
        let req: LogoutRequest = serde_json::from_str(r#"{"refreshToken":"abc"}"#).unwrap();
        assert_eq!(req.refresh_token, "abc");
    }

    #[test]
    fn register_request_is_trimmed() {
        let request: RegisterRequest = serde_json::from_str(
            r#"{"username":" carol ","email":"carol@example.com ","password":"pw","fullName":"  "}"#,
        )
        .unwrap();
        let new = NewPrincipal::from(request);
        assert_eq!(new.username, "carol");
        assert_eq!(new.email, "carol@example.com");
        assert!(new.full_name.is_none());
    }

    #[test]
    fn session_summary_hides_token() {
        let now = Utc::now();
        let credential = RefreshCredential {
            id: 3,
            token: "secret-value".to_string(),
            owner_id: 1,
            expires_at: now,
            revoked: false,
            created_at: now,
            last_used_at: None,
        };
        let json = serde_json::to_string(&SessionSummary::from(&credential)).unwrap();
        assert!(!json.contains("secret-value"));
    }
}
