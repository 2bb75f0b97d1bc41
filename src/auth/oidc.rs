// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! External OpenID Connect identity providers.
//!
//! A provider is configured with its issuer URL. The JWKS location is taken
//! from the issuer's discovery document
//! (`{issuer}/.well-known/openid-configuration`), fetched once on first use.

use std::time::Duration;

use jsonwebtoken::{decode, decode_header, errors::ErrorKind, Validation};
use serde::Deserialize;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use super::claims::{AuthenticatedUser, ExternalClaims};
use super::error::AuthError;
use super::jwks::JwksManager;

/// Clock skew tolerance (60 seconds).
const CLOCK_SKEW_LEEWAY: u64 = 60;

/// Subset of the discovery document this service reads.
#[derive(Debug, Deserialize)]
struct DiscoveryDocument {
    issuer: String,
    jwks_uri: String,
}

/// Static settings of one provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderConfig {
    /// Short name used in logs and the `Authority` marker (e.g. `google`)
    pub name: String,
    pub issuer: String,
    /// Expected `aud`; audience is not checked when absent
    pub audience: Option<String>,
}

/// Build the HTTP client used for discovery and JWKS fetches.
pub fn http_client() -> Result<reqwest::Client, AuthError> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .build()
        .map_err(|e| AuthError::InternalError(format!("failed to build HTTP client: {e}")))
}

fn normalize_issuer(issuer: &str) -> &str {
    issuer.trim_end_matches('/')
}

/// Verifier for credentials signed by one external provider.
pub struct OidcProvider {
    config: ProviderConfig,
    client: Option<reqwest::Client>,
    jwks: OnceCell<JwksManager>,
}

impl OidcProvider {
    /// Provider whose keys are located through discovery.
    pub fn new(config: ProviderConfig, client: reqwest::Client) -> Self {
        Self {
            config,
            client: Some(client),
            jwks: OnceCell::new(),
        }
    }

    /// Provider with an already known key source.
    pub fn with_jwks(config: ProviderConfig, jwks: JwksManager) -> Self {
        Self {
            config,
            client: None,
            jwks: OnceCell::new_with(Some(jwks)),
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn issuer(&self) -> &str {
        &self.config.issuer
    }

    /// True if `iss` names this provider (trailing slashes ignored).
    pub fn matches(&self, iss: &str) -> bool {
        normalize_issuer(iss) == normalize_issuer(&self.config.issuer)
    }

    /// True once discovery has completed.
    pub fn is_discovered(&self) -> bool {
        self.jwks.initialized()
    }

    async fn discover(&self) -> Result<JwksManager, AuthError> {
        let Some(client) = &self.client else {
            return Err(AuthError::DiscoveryError(format!(
                "provider {} has no key source",
                self.config.name
            )));
        };
        let url = format!(
            "{}/.well-known/openid-configuration",
            normalize_issuer(&self.config.issuer)
        );
        let response = client
            .get(&url)
            .send()
            .await
            .map_err(|e| AuthError::DiscoveryError(e.to_string()))?;

        if !response.status().is_success() {
            return Err(AuthError::DiscoveryError(format!(
                "HTTP {} from {url}",
                response.status()
            )));
        }

        let document: DiscoveryDocument = response
            .json()
            .await
            .map_err(|e| AuthError::DiscoveryError(e.to_string()))?;

        if !self.matches(&document.issuer) {
            return Err(AuthError::DiscoveryError(format!(
                "discovery document issuer {} does not match {}",
                document.issuer, self.config.issuer
            )));
        }

        info!(
            provider = %self.config.name,
            jwks_uri = %document.jwks_uri,
            "Loaded provider discovery document"
        );
        Ok(JwksManager::new(document.jwks_uri, client.clone()))
    }

    async fn jwks(&self) -> Result<&JwksManager, AuthError> {
        self.jwks.get_or_try_init(|| self.discover()).await
    }

    /// Run discovery if needed and make sure signing keys are cached.
    pub async fn ensure_keys(&self) -> Result<(), AuthError> {
        let jwks = self.jwks().await?;
        if !jwks.is_cached().await {
            jwks.refresh().await?;
        }
        Ok(())
    }

    /// Verify signature, issuer, audience and expiry of a provider credential.
    pub async fn verify(&self, token: &str) -> Result<AuthenticatedUser, AuthError> {
        let header = decode_header(token).map_err(|_| AuthError::MalformedToken)?;
        let (decoding_key, algorithm) = self.jwks().await?.decoding_key(header.kid.as_deref()).await?;

        let mut validation = Validation::new(algorithm);
        validation.set_issuer(&[&self.config.issuer]);
        validation.set_required_spec_claims(&["exp", "sub", "iss"]);
        validation.leeway = CLOCK_SKEW_LEEWAY;
        match &self.config.audience {
            Some(aud) => validation.set_audience(&[aud]),
            None => validation.validate_aud = false,
        }

        let data = decode::<ExternalClaims>(token, &decoding_key, &validation).map_err(|e| {
            debug!(provider = %self.config.name, error = %e, "External credential rejected");
            match e.kind() {
                ErrorKind::ExpiredSignature => AuthError::TokenExpired,
                ErrorKind::InvalidSignature | ErrorKind::InvalidAlgorithm => {
                    AuthError::InvalidSignature
                }
                ErrorKind::InvalidIssuer => AuthError::UnknownIssuer,
                ErrorKind::InvalidAudience => AuthError::InvalidAudience,
                _ => AuthError::MalformedToken,
            }
        })?;

        Ok(AuthenticatedUser::from_external(&self.config.name, data.claims))
    }
}

impl std::fmt::Debug for OidcProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OidcProvider")
            .field("config", &self.config)
            .field("discovered", &self.is_discovered())
            .finish_non_exhaustive()
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures;
    use super::*;
    use crate::auth::claims::Authority;

    #[tokio::test]
    async fn verifies_provider_credential() {
        let provider = fixtures::provider();
        let token = fixtures::sign(&fixtures::claims("alice@example.com"));

        let user = provider.verify(&token).await.unwrap();
        assert_eq!(user.user_id, "external-subject-1");
        assert_eq!(user.email.as_deref(), Some("alice@example.com"));
        assert_eq!(
            user.authority,
            Authority::External {
                provider: "example".to_string()
            }
        );
    }

    #[tokio::test]
    async fn rejects_wrong_audience() {
        let provider = fixtures::provider();
        let mut claims = fixtures::claims("alice@example.com");
        claims["aud"] = "someone-else".into();

        let err = provider.verify(&fixtures::sign(&claims)).await.unwrap_err();
        assert_eq!(err, AuthError::InvalidAudience);
    }

    #[tokio::test]
    async fn rejects_expired_credential() {
        let provider = fixtures::provider();
        let mut claims = fixtures::claims("alice@example.com");
        claims["exp"] = (jsonwebtoken::get_current_timestamp() - 3600).into();

        let err = provider.verify(&fixtures::sign(&claims)).await.unwrap_err();
        assert_eq!(err, AuthError::TokenExpired);
    }

    #[tokio::test]
    async fn rejects_tampered_credential() {
        let provider = fixtures::provider();
        let token = fixtures::sign(&fixtures::claims("alice@example.com"));
        let other = fixtures::sign(&fixtures::claims("mallory@example.com"));

        let parts: Vec<&str> = token.split('.').collect();
        let other_parts: Vec<&str> = other.split('.').collect();
        let spliced = format!("{}.{}.{}", parts[0], other_parts[1], parts[2]);

        let err = provider.verify(&spliced).await.unwrap_err();
        assert_eq!(err, AuthError::InvalidSignature);
    }

    #[tokio::test]
    async fn rejects_garbage() {
        let provider = fixtures::provider();
        assert_eq!(
            provider.verify("garbage").await.unwrap_err(),
            AuthError::MalformedToken
        );
    }

    #[test]
    fn issuer_match_ignores_trailing_slash() {
        let provider = fixtures::provider();
        assert!(provider.matches("https://idp.example.com/"));
        assert!(!provider.matches("https://evil.example.com"));
        assert!(provider.is_discovered());
    }
}
