// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Credential claims and authenticated principal representation.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use utoipa::ToSchema;

use super::AuthError;

/// Discriminator carried in the `typ` header of every locally issued credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    /// Short-lived credential presented on protected requests
    Access,
    /// Signed long-lived credential (kept for API parity; sessions use opaque values)
    Refresh,
    /// One-off credential carrying caller-supplied claims (password reset links)
    Payload,
}

impl TokenKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenKind::Access => "access",
            TokenKind::Refresh => "refresh",
            TokenKind::Payload => "payload",
        }
    }

    /// Parse the `typ` header value. Unknown values yield `None`.
    pub fn parse(s: &str) -> Option<TokenKind> {
        match s {
            "access" => Some(TokenKind::Access),
            "refresh" => Some(TokenKind::Refresh),
            "payload" => Some(TokenKind::Payload),
            _ => None,
        }
    }
}

impl std::fmt::Display for TokenKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Claims of a locally issued credential.
///
/// `extra` holds caller-supplied claims of payload credentials (e.g.
/// `purpose`) and the principal role of access credentials.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    /// Issuer (configured issuer string)
    pub iss: String,
    /// Subject (principal id as string)
    pub sub: String,
    /// Issued at (Unix seconds)
    pub iat: i64,
    /// Expiration (Unix seconds)
    pub exp: i64,
    /// Additional claims
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Claims {
    /// Look up an extra claim as a string.
    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.extra.get(name).and_then(Value::as_str)
    }
}

/// Claims of a credential signed by an external identity provider.
///
/// Only the fields this service consumes are modelled.
#[derive(Debug, Clone, Deserialize)]
pub struct ExternalClaims {
    pub sub: String,
    pub iss: String,
    #[serde(default)]
    pub exp: i64,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub email_verified: Option<bool>,
}

/// Which trust authority vouched for the request's credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Authority {
    /// Signed by this service
    Local,
    /// Signed by an external identity provider
    External { provider: String },
}

/// Principal-identity marker attached to the request by the authentication gate.
///
/// No roles are resolved at this point; downstream checks look the principal
/// up when they need more than the identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct AuthenticatedUser {
    /// Subject claim: local principal id, or the provider's subject for external credentials
    pub user_id: String,

    /// Authority that signed the credential
    pub authority: Authority,

    /// Email claim (external credentials only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    /// Provider asserted `email_verified: true`
    #[serde(default)]
    pub email_verified: bool,

    /// Original issuer (not serialized)
    #[serde(skip)]
    pub issuer: String,

    /// Token expiration (Unix timestamp, not serialized)
    #[serde(skip)]
    pub expires_at: i64,
}

impl AuthenticatedUser {
    /// Create from locally issued access claims.
    pub fn from_local(claims: Claims) -> Self {
        Self {
            user_id: claims.sub,
            authority: Authority::Local,
            email: None,
            email_verified: false,
            issuer: claims.iss,
            expires_at: claims.exp,
        }
    }

    /// Create from verified external provider claims.
    pub fn from_external(provider: &str, claims: ExternalClaims) -> Self {
        Self {
            user_id: claims.sub,
            authority: Authority::External {
                provider: provider.to_string(),
            },
            email: claims.email,
            email_verified: claims.email_verified == Some(true),
            issuer: claims.iss,
            expires_at: claims.exp,
        }
    }

    pub fn is_local(&self) -> bool {
        self.authority == Authority::Local
    }

    /// Email usable for linking to a local principal.
    ///
    /// An absent or `false` `email_verified` claim fails with `UnverifiedEmail`.
    pub fn verified_email(&self) -> Result<&str, AuthError> {
        let email = self.email.as_deref().ok_or(AuthError::UnknownPrincipal)?;
        if !self.email_verified {
            return Err(AuthError::UnverifiedEmail);
        }
        Ok(email)
    }

    /// Local principal id, if the credential was issued by this service.
    pub fn local_principal_id(&self) -> Option<i64> {
        if self.is_local() {
            self.user_id.parse().ok()
        } else {
            None
        }
    }
}
