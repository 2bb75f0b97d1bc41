// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Routing of bearer credentials to the authority that signed them.
//!
//! The unverified `iss` claim selects one of a closed set of trust
//! authorities. The selected authority then performs the real verification.
//! An `iss` that names no configured authority fails closed with
//! [`AuthError::UnknownIssuer`].

use std::sync::Arc;

use jsonwebtoken::dangerous::insecure_decode;
use serde::Deserialize;
use tracing::debug;

use super::claims::{AuthenticatedUser, TokenKind};
use super::error::AuthError;
use super::oidc::OidcProvider;
use super::token::TokenIssuer;

#[derive(Deserialize)]
struct UnverifiedIssuer {
    #[serde(default)]
    iss: Option<String>,
}

/// A verifier able to vouch for credentials carrying its issuer string.
#[derive(Debug, Clone)]
pub enum TrustAuthority {
    /// HMAC credentials signed by this service
    Local(Arc<TokenIssuer>),
    /// Credentials signed by an external OpenID Connect provider
    External(Arc<OidcProvider>),
}

impl TrustAuthority {
    pub fn issuer(&self) -> &str {
        match self {
            TrustAuthority::Local(issuer) => issuer.issuer(),
            TrustAuthority::External(provider) => provider.issuer(),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            TrustAuthority::Local(_) => "local",
            TrustAuthority::External(provider) => provider.name(),
        }
    }

    fn matches(&self, iss: &str) -> bool {
        match self {
            TrustAuthority::Local(issuer) => issuer.issuer() == iss,
            TrustAuthority::External(provider) => provider.matches(iss),
        }
    }

    /// Verify `token` as an access credential of this authority.
    pub async fn authenticate(&self, token: &str) -> Result<AuthenticatedUser, AuthError> {
        match self {
            TrustAuthority::Local(issuer) => issuer
                .validate(token, Some(TokenKind::Access))
                .into_result()
                .map(AuthenticatedUser::from_local),
            TrustAuthority::External(provider) => provider.verify(token).await,
        }
    }
}

/// Selects the trust authority for an inbound credential.
#[derive(Debug, Clone)]
pub struct IssuerResolver {
    authorities: Vec<TrustAuthority>,
}

impl IssuerResolver {
    pub fn new(local: Arc<TokenIssuer>) -> Self {
        Self {
            authorities: vec![TrustAuthority::Local(local)],
        }
    }

    pub fn with_provider(mut self, provider: Arc<OidcProvider>) -> Self {
        self.authorities.push(TrustAuthority::External(provider));
        self
    }

    pub fn authorities(&self) -> &[TrustAuthority] {
        &self.authorities
    }

    pub fn external_providers(&self) -> impl Iterator<Item = &Arc<OidcProvider>> {
        self.authorities.iter().filter_map(|authority| match authority {
            TrustAuthority::External(provider) => Some(provider),
            TrustAuthority::Local(_) => None,
        })
    }

    /// Pick the authority named by the credential's unverified `iss`.
    pub fn resolve(&self, token: &str) -> Result<&TrustAuthority, AuthError> {
        let unverified = insecure_decode::<UnverifiedIssuer>(token)
            .map_err(|_| AuthError::MalformedToken)?;
        let iss = unverified.claims.iss.ok_or(AuthError::UnknownIssuer)?;

        self.authorities
            .iter()
            .find(|authority| authority.matches(&iss))
            .ok_or_else(|| {
                debug!(iss = %iss, "No trust authority for issuer");
                AuthError::UnknownIssuer
            })
    }

    /// Resolve and verify a bearer credential.
    pub async fn authenticate(&self, token: &str) -> Result<AuthenticatedUser, AuthError> {
        self.resolve(token)?.authenticate(token).await
    }

    /// Like [`authenticate`](Self::authenticate), but only external authorities qualify.
    pub async fn authenticate_external(&self, token: &str) -> Result<AuthenticatedUser, AuthError> {
        match self.resolve(token)? {
            TrustAuthority::External(provider) => provider.verify(token).await,
            TrustAuthority::Local(_) => Err(AuthError::UnknownIssuer),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::claims::Authority;
    use crate::auth::oidc::fixtures;
    use crate::auth::Role;
    use crate::clock::ManualClock;
    use crate::storage::Principal;
    use chrono::Duration;

    fn local_issuer() -> Arc<TokenIssuer> {
        Arc::new(TokenIssuer::new(
            "local",
            b"0123456789abcdef0123456789abcdef",
            Duration::minutes(15),
            Duration::days(7),
            Arc::new(ManualClock::new(chrono::Utc::now())),
        ))
    }

    fn principal() -> Principal {
        Principal {
            id: 11,
            username: "alice".to_string(),
            email: "alice@example.com".to_string(),
            full_name: None,
            avatar_url: None,
            role: Role::User,
            active: true,
            credential_hash: String::new(),
        }
    }

    fn resolver() -> (IssuerResolver, Arc<TokenIssuer>) {
        let local = local_issuer();
        let resolver =
            IssuerResolver::new(local.clone()).with_provider(Arc::new(fixtures::provider()));
        (resolver, local)
    }

    #[tokio::test]
    async fn local_issuer_routes_to_hmac_verifier() {
        let (resolver, local) = resolver();
        let token = local.issue_access(&principal()).unwrap();

        assert!(matches!(
            resolver.resolve(&token).unwrap(),
            TrustAuthority::Local(_)
        ));
        let user = resolver.authenticate(&token).await.unwrap();
        assert_eq!(user.authority, Authority::Local);
        assert_eq!(user.local_principal_id(), Some(11));
    }

    #[tokio::test]
    async fn external_issuer_routes_to_provider() {
        let (resolver, _) = resolver();
        let token = fixtures::sign(&fixtures::claims("alice@example.com"));

        let authority = resolver.resolve(&token).unwrap();
        assert_eq!(authority.name(), "example");
        let user = resolver.authenticate(&token).await.unwrap();
        assert!(!user.is_local());
    }

    #[tokio::test]
    async fn unknown_issuer_is_rejected() {
        let (resolver, _) = resolver();
        let mut claims = fixtures::claims("alice@example.com");
        claims["iss"] = "https://unknown.example.org".into();
        let token = fixtures::sign(&claims);

        assert_eq!(resolver.resolve(&token).err(), Some(AuthError::UnknownIssuer));
        assert_eq!(
            resolver.authenticate(&token).await.err(),
            Some(AuthError::UnknownIssuer)
        );
    }

    #[tokio::test]
    async fn local_refresh_credential_is_not_an_access_credential() {
        let (resolver, local) = resolver();
        let token = local.issue_refresh(&principal()).unwrap();
        assert_eq!(
            resolver.authenticate(&token).await.err(),
            Some(AuthError::TypeMismatch)
        );
    }

    #[tokio::test]
    async fn external_only_refuses_local_credentials() {
        let (resolver, local) = resolver();
        let token = local.issue_access(&principal()).unwrap();
        assert_eq!(
            resolver.authenticate_external(&token).await.err(),
            Some(AuthError::UnknownIssuer)
        );
    }

    #[test]
    fn garbage_is_malformed() {
        let (resolver, _) = resolver();
        assert_eq!(resolver.resolve("nope").err(), Some(AuthError::MalformedToken));
    }
}
