// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Session lifecycle orchestration.
//!
//! Composes the principal directory, the token issuer and the refresh store:
//!
//! - login: check password, issue access credential + refresh session
//! - refresh: stamp (or rotate) the refresh session, issue a new access credential
//! - logout: revoke exactly the presented refresh session
//! - external exchange: trade a provider credential for local tokens
//! - password reset: mail a short-lived `payload` credential, check it, and
//!   consume it to set a new password
//! - registration: create an inactive principal and mail a `payload`
//!   credential that activates it

use std::sync::Arc;

use chrono::Duration;
use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::auth::{AuthError, Claims, IssuerResolver, TokenIssuer, TokenKind, Verification};
use crate::models::{LoginResponse, UserSummary};
use crate::storage::{
    DirectoryError, NewPrincipal, Principal, PrincipalDirectory, PrincipalId, RefreshCredential,
    RefreshTokenStore, SessionStoreError,
};

/// `purpose` claim of password-reset credentials.
pub const RESET_PASSWORD_PURPOSE: &str = "reset-password";

/// `purpose` claim of registration credentials.
pub const VERIFY_EMAIL_PURPOSE: &str = "verify-email";

pub const MIN_PASSWORD_LEN: usize = 8;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Store(#[from] SessionStoreError),

    #[error(transparent)]
    Directory(#[from] DirectoryError),

    #[error("Password reset link is invalid or has expired")]
    InvalidResetToken,

    #[error("Verification link is invalid or has expired")]
    InvalidVerificationToken,

    #[error("{0}")]
    InvalidInput(&'static str),
}

/// Delivers account links. Transactional mail lives outside this service.
pub trait LinkMailer: Send + Sync {
    fn send_password_reset(&self, principal: &Principal, link: &str);

    fn send_registration(&self, principal: &Principal, link: &str);
}

/// Mailer that only records the hand-off in the log.
#[derive(Debug, Default)]
pub struct LogMailer;

impl LinkMailer for LogMailer {
    fn send_password_reset(&self, principal: &Principal, _link: &str) {
        // the link embeds a live credential and is never logged
        info!(principal_id = principal.id, "Password reset link ready for delivery");
    }

    fn send_registration(&self, principal: &Principal, _link: &str) {
        info!(principal_id = principal.id, "Registration link ready for delivery");
    }
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Replace the refresh token on every refresh instead of reusing it
    pub rotate_refresh_tokens: bool,
    /// Front-end page receiving `?token=...`
    pub reset_url: String,
    pub reset_ttl: Duration,
    /// Endpoint receiving `?token=...` of registration links
    pub registration_url: String,
    pub registration_ttl: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            rotate_refresh_tokens: false,
            reset_url: "http://localhost:3000/reset-password".to_string(),
            reset_ttl: Duration::minutes(15),
            registration_url: "http://localhost:8080/api/auth/register/verify".to_string(),
            registration_ttl: Duration::hours(1),
        }
    }
}

pub struct SessionService {
    issuer: Arc<TokenIssuer>,
    sessions: Arc<RefreshTokenStore>,
    resolver: Arc<IssuerResolver>,
    directory: Arc<dyn PrincipalDirectory>,
    mailer: Arc<dyn LinkMailer>,
    config: SessionConfig,
}

impl SessionService {
    pub fn new(
        issuer: Arc<TokenIssuer>,
        sessions: Arc<RefreshTokenStore>,
        resolver: Arc<IssuerResolver>,
        directory: Arc<dyn PrincipalDirectory>,
        mailer: Arc<dyn LinkMailer>,
        config: SessionConfig,
    ) -> Self {
        Self {
            issuer,
            sessions,
            resolver,
            directory,
            mailer,
            config,
        }
    }

    fn respond(&self, principal: &Principal, access: String, refresh: &RefreshCredential) -> LoginResponse {
        LoginResponse::bearer(
            access,
            refresh.token.clone(),
            self.issuer.access_ttl().num_seconds(),
            UserSummary::from(principal),
        )
    }

    /// Issue an access credential and a new refresh session.
    pub fn issue_tokens(&self, principal: &Principal) -> Result<LoginResponse, SessionError> {
        let access = self.issuer.issue_access(principal)?;
        let refresh = self.sessions.create(principal.id)?;
        Ok(self.respond(principal, access, &refresh))
    }

    /// Password login.
    pub fn login(&self, username: &str, password: &str) -> Result<LoginResponse, SessionError> {
        let Some(principal) = self.directory.find_by_username(username) else {
            info!("Login rejected: unknown username");
            return Err(AuthError::InvalidCredentials.into());
        };
        if !self.directory.verify_credential(&principal, password) {
            info!(principal_id = principal.id, "Login rejected: bad password");
            return Err(AuthError::InvalidCredentials.into());
        }
        if !principal.active {
            info!(principal_id = principal.id, "Login rejected: account disabled");
            return Err(AuthError::AccountDisabled.into());
        }

        let response = self.issue_tokens(&principal)?;
        info!(principal_id = principal.id, "Login succeeded");
        Ok(response)
    }

    /// Exchange a refresh session for a new access credential.
    pub fn refresh(&self, refresh_token: &str) -> Result<LoginResponse, SessionError> {
        let credential = if self.config.rotate_refresh_tokens {
            self.sessions.rotate(refresh_token)?
        } else {
            self.sessions.touch(refresh_token)?
        };

        let principal = self
            .directory
            .find_by_id(credential.owner_id)
            .ok_or(AuthError::UnknownPrincipal)?;
        if !principal.active {
            self.sessions.revoke_one(&credential.token)?;
            return Err(AuthError::AccountDisabled.into());
        }

        let access = self.issuer.issue_access(&principal)?;
        info!(
            principal_id = principal.id,
            session_id = credential.id,
            "Access token refreshed"
        );
        Ok(self.respond(&principal, access, &credential))
    }

    /// Revoke the presented refresh session. Unknown tokens are not an error.
    pub fn logout(&self, refresh_token: &str) -> Result<(), SessionError> {
        match self.sessions.revoke_one(refresh_token) {
            Ok(credential) => {
                info!(
                    principal_id = credential.owner_id,
                    session_id = credential.id,
                    "Logged out"
                );
                Ok(())
            }
            Err(SessionStoreError::NotFound) => {
                warn!("Logout with unknown refresh token");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Trade an external provider credential for local tokens.
    ///
    /// The provider's `email` claim selects the local principal, and only
    /// when the provider marks it `email_verified`.
    pub async fn exchange_external(&self, credential: &str) -> Result<LoginResponse, SessionError> {
        let user = self.resolver.authenticate_external(credential).await?;
        let email = user.verified_email().inspect_err(|_| {
            warn!(authority = ?user.authority, "External credential without verified email");
        })?;
        let principal = self
            .directory
            .find_by_email(email)
            .ok_or(AuthError::UnknownPrincipal)?;
        if !principal.active {
            return Err(AuthError::AccountDisabled.into());
        }

        let response = self.issue_tokens(&principal)?;
        info!(
            principal_id = principal.id,
            authority = ?user.authority,
            "External credential exchanged"
        );
        Ok(response)
    }

    /// Mail a password-reset link if `email` belongs to a principal.
    ///
    /// Unknown addresses succeed silently so the endpoint does not reveal
    /// which addresses are registered.
    pub fn forgot_password(&self, email: &str) -> Result<(), SessionError> {
        let Some(principal) = self.directory.find_by_email(email) else {
            info!("Password reset requested for unknown address");
            return Ok(());
        };

        let mut extra = Map::new();
        extra.insert("purpose".to_string(), Value::from(RESET_PASSWORD_PURPOSE));
        let token = self
            .issuer
            .issue_payload(&principal, extra, self.config.reset_ttl)?;

        let link = format!("{}?token={}", self.config.reset_url, token);
        self.mailer.send_password_reset(&principal, &link);
        Ok(())
    }

    /// Claims of a valid `payload` credential minted for `purpose`.
    fn payload_claims(&self, token: &str, purpose: &str) -> Option<(PrincipalId, Claims)> {
        let Verification::Valid(claims) = self.issuer.validate(token, Some(TokenKind::Payload))
        else {
            return None;
        };
        if claims.get_str("purpose") != Some(purpose) {
            return None;
        }
        let id = claims.sub.parse().ok()?;
        Some((id, claims))
    }

    /// Check a password-reset credential and return its principal.
    pub fn verify_reset_token(&self, token: &str) -> Result<Principal, SessionError> {
        self.payload_claims(token, RESET_PASSWORD_PURPOSE)
            .and_then(|(id, _)| self.directory.find_by_id(id))
            .filter(|principal| principal.active)
            .ok_or(SessionError::InvalidResetToken)
    }

    /// Set a new password with a reset credential and end every session of
    /// the principal.
    pub fn reset_password(&self, token: &str, new_password: &str) -> Result<(), SessionError> {
        check_password(new_password)?;
        let principal = self.verify_reset_token(token)?;

        self.directory.set_credential(principal.id, new_password)?;
        let revoked = self.sessions.revoke_all_for_principal(principal.id)?;
        info!(principal_id = principal.id, revoked, "Password reset");
        Ok(())
    }

    /// Create an inactive principal and mail its activation link.
    pub fn register(&self, new: NewPrincipal) -> Result<Principal, SessionError> {
        if new.username.trim().is_empty() {
            return Err(SessionError::InvalidInput("Username is required"));
        }
        if !new.email.contains('@') {
            return Err(SessionError::InvalidInput("Email address is invalid"));
        }
        check_password(&new.password)?;

        let principal = self.directory.register(new)?;

        let mut extra = Map::new();
        extra.insert("purpose".to_string(), Value::from(VERIFY_EMAIL_PURPOSE));
        extra.insert("email".to_string(), Value::from(principal.email.clone()));
        let token = self
            .issuer
            .issue_payload(&principal, extra, self.config.registration_ttl)?;

        let link = format!("{}?token={}", self.config.registration_url, token);
        self.mailer.send_registration(&principal, &link);
        info!(principal_id = principal.id, "Principal registered, awaiting verification");
        Ok(principal)
    }

    /// Activate the principal a registration credential was minted for.
    ///
    /// The credential's `email` claim must still match the principal.
    pub fn verify_registration(&self, token: &str) -> Result<Principal, SessionError> {
        let (id, claims) = self
            .payload_claims(token, VERIFY_EMAIL_PURPOSE)
            .ok_or(SessionError::InvalidVerificationToken)?;
        let principal = self
            .directory
            .find_by_id(id)
            .filter(|principal| claims.get_str("email") == Some(principal.email.as_str()))
            .ok_or(SessionError::InvalidVerificationToken)?;

        let principal = self.directory.activate(principal.id)?;
        info!(principal_id = principal.id, "Registration verified");
        Ok(principal)
    }
}

fn check_password(password: &str) -> Result<(), SessionError> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(SessionError::InvalidInput(
            "Password must be at least 8 characters",
        ));
    }
    Ok(())
}
