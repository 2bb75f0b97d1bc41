// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! JWKS (JSON Web Key Set) fetching and caching for external identity providers.
//!
//! - Keys are cached with a configurable TTL
//! - A `kid` missing from the cached set triggers one forced refetch, so
//!   provider key rotation is picked up without waiting for the TTL
//! - Remote fetches are at least `min_refetch_interval` apart; callers inside
//!   that interval get the cached set, so unknown `kid`s cannot drive one
//!   outbound request per inbound request
//! - Only asymmetric keys (RSA, EC) are accepted; a published symmetric key
//!   would let anyone mint credentials

use std::sync::Arc;
use std::time::{Duration, Instant};

use jsonwebtoken::jwk::{AlgorithmParameters, Jwk, JwkSet, KeyAlgorithm};
use jsonwebtoken::{Algorithm, DecodingKey};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

use super::error::AuthError;

/// Default JWKS cache TTL (5 minutes).
const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(300);

/// Default minimum spacing of remote fetch attempts.
const DEFAULT_MIN_REFETCH_INTERVAL: Duration = Duration::from_secs(30);

struct CacheEntry {
    jwks: JwkSet,
    fetched_at: Instant,
}

/// Where keys come from.
#[derive(Clone)]
enum KeySource {
    Remote {
        jwks_url: String,
        client: reqwest::Client,
    },
    /// Fixed key set (pre-provisioned keys, tests)
    Static,
}

/// JWKS manager with caching.
#[derive(Clone)]
pub struct JwksManager {
    source: KeySource,
    cache_ttl: Duration,
    min_refetch_interval: Duration,
    cache: Arc<RwLock<Option<CacheEntry>>>,
    /// Start of the last remote fetch, successful or not
    last_attempt: Arc<Mutex<Option<Instant>>>,
}

impl JwksManager {
    /// Manager fetching from `jwks_url` with the given HTTP client.
    pub fn new(jwks_url: impl Into<String>, client: reqwest::Client) -> Self {
        Self {
            source: KeySource::Remote {
                jwks_url: jwks_url.into(),
                client,
            },
            cache_ttl: DEFAULT_CACHE_TTL,
            min_refetch_interval: DEFAULT_MIN_REFETCH_INTERVAL,
            cache: Arc::new(RwLock::new(None)),
            last_attempt: Arc::new(Mutex::new(None)),
        }
    }

    /// Manager serving a fixed key set; never fetches.
    pub fn from_static(jwks: JwkSet) -> Self {
        Self {
            source: KeySource::Static,
            cache_ttl: Duration::MAX,
            min_refetch_interval: DEFAULT_MIN_REFETCH_INTERVAL,
            cache: Arc::new(RwLock::new(Some(CacheEntry {
                jwks,
                fetched_at: Instant::now(),
            }))),
            last_attempt: Arc::new(Mutex::new(None)),
        }
    }

    /// Create with custom cache TTL.
    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        if matches!(self.source, KeySource::Remote { .. }) {
            self.cache_ttl = ttl;
        }
        self
    }

    /// Change the minimum spacing of remote fetch attempts.
    pub fn with_min_refetch_interval(mut self, interval: Duration) -> Self {
        self.min_refetch_interval = interval;
        self
    }

    pub fn jwks_url(&self) -> Option<&str> {
        match &self.source {
            KeySource::Remote { jwks_url, .. } => Some(jwks_url),
            KeySource::Static => None,
        }
    }

    /// Fetch JWKS (with caching).
    async fn get_jwks(&self) -> Result<JwkSet, AuthError> {
        {
            let cache = self.cache.read().await;
            if let Some(entry) = &*cache {
                if entry.fetched_at.elapsed() < self.cache_ttl {
                    return Ok(entry.jwks.clone());
                }
            }
        }
        self.refresh().await
    }

    async fn fetch_jwks(&self) -> Result<Option<JwkSet>, AuthError> {
        let KeySource::Remote { jwks_url, client } = &self.source else {
            return Ok(None);
        };

        let response = client
            .get(jwks_url)
            .send()
            .await
            .map_err(|e| AuthError::JwksFetchError(e.to_string()))?;

        if !response.status().is_success() {
            return Err(AuthError::JwksFetchError(format!(
                "HTTP {} from JWKS endpoint",
                response.status()
            )));
        }

        let jwks: JwkSet = response
            .json()
            .await
            .map_err(|e| AuthError::JwksFetchError(e.to_string()))?;

        info!(url = %jwks_url, keys = jwks.keys.len(), "Fetched JWKS");
        Ok(Some(jwks))
    }

    /// Reserve a remote fetch. `false` while the previous attempt is recent.
    async fn claim_fetch(&self) -> bool {
        let mut last = self.last_attempt.lock().await;
        if last.as_ref().is_some_and(|at| at.elapsed() < self.min_refetch_interval) {
            return false;
        }
        *last = Some(Instant::now());
        true
    }

    async fn cached(&self) -> Option<JwkSet> {
        self.cache.read().await.as_ref().map(|entry| entry.jwks.clone())
    }

    /// Force refresh the JWKS cache and return the current set.
    ///
    /// Inside the refetch interval the cached set is returned unchanged.
    pub async fn refresh(&self) -> Result<JwkSet, AuthError> {
        if !self.claim_fetch().await {
            debug!("JWKS refetch throttled, serving cached set");
            return self
                .cached()
                .await
                .ok_or_else(|| AuthError::JwksFetchError("refetch throttled".to_string()));
        }

        match self.fetch_jwks().await? {
            Some(jwks) => {
                let mut cache = self.cache.write().await;
                *cache = Some(CacheEntry {
                    jwks: jwks.clone(),
                    fetched_at: Instant::now(),
                });
                Ok(jwks)
            }
            None => self.cached().await.ok_or(AuthError::NoMatchingKey),
        }
    }

    /// Decoding key for a credential header's `kid`.
    ///
    /// Without a `kid` the first usable key is returned.
    pub async fn decoding_key(&self, kid: Option<&str>) -> Result<(DecodingKey, Algorithm), AuthError> {
        let jwks = self.get_jwks().await?;

        let Some(kid) = kid else {
            return jwks
                .keys
                .iter()
                .find_map(|jwk| jwk_to_decoding_key(jwk).ok())
                .ok_or(AuthError::NoMatchingKey);
        };

        if let Some(jwk) = find_kid(&jwks, kid) {
            return jwk_to_decoding_key(jwk);
        }

        debug!(kid, "Unknown kid, refetching JWKS");
        let jwks = self.refresh().await?;
        let jwk = find_kid(&jwks, kid).ok_or(AuthError::NoMatchingKey)?;
        jwk_to_decoding_key(jwk)
    }

    /// Check if JWKS is currently cached and valid.
    pub async fn is_cached(&self) -> bool {
        let cache = self.cache.read().await;
        match &*cache {
            Some(entry) => entry.fetched_at.elapsed() < self.cache_ttl,
            None => false,
        }
    }
}

fn find_kid<'a>(jwks: &'a JwkSet, kid: &str) -> Option<&'a Jwk> {
    jwks.keys
        .iter()
        .find(|k| k.common.key_id.as_deref() == Some(kid))
}

/// Convert a JWK to a DecodingKey.
fn jwk_to_decoding_key(jwk: &Jwk) -> Result<(DecodingKey, Algorithm), AuthError> {
    match &jwk.algorithm {
        AlgorithmParameters::RSA(rsa) => {
            let key = DecodingKey::from_rsa_components(&rsa.n, &rsa.e)
                .map_err(|e| AuthError::InternalError(format!("Failed to create RSA key: {e}")))?;

            let alg = match jwk.common.key_algorithm {
                Some(KeyAlgorithm::RS384) => Algorithm::RS384,
                Some(KeyAlgorithm::RS512) => Algorithm::RS512,
                Some(KeyAlgorithm::PS256) => Algorithm::PS256,
                Some(KeyAlgorithm::PS384) => Algorithm::PS384,
                Some(KeyAlgorithm::PS512) => Algorithm::PS512,
                _ => Algorithm::RS256,
            };
            Ok((key, alg))
        }
        AlgorithmParameters::EllipticCurve(ec) => {
            let key = DecodingKey::from_ec_components(&ec.x, &ec.y)
                .map_err(|e| AuthError::InternalError(format!("Failed to create EC key: {e}")))?;

            let alg = match jwk.common.key_algorithm {
                Some(KeyAlgorithm::ES384) => Algorithm::ES384,
                _ => Algorithm::ES256,
            };
            Ok((key, alg))
        }
        _ => Err(AuthError::NoMatchingKey),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::oidc::fixtures;

    #[test]
    fn remote_manager_keeps_url() {
        let manager = JwksManager::new(
            "https://idp.example.com/.well-known/jwks.json",
            reqwest::Client::new(),
        );
        assert_eq!(
            manager.jwks_url(),
            Some("https://idp.example.com/.well-known/jwks.json")
        );
    }

    #[test]
    fn custom_cache_ttl() {
        let manager = JwksManager::new("https://example.com/jwks", reqwest::Client::new())
            .with_cache_ttl(Duration::from_secs(60));
        assert_eq!(manager.cache_ttl, Duration::from_secs(60));
    }

    #[tokio::test]
    async fn remote_cache_initially_empty() {
        let manager = JwksManager::new("https://example.com/jwks", reqwest::Client::new());
        assert!(!manager.is_cached().await);
    }

    #[tokio::test]
    async fn static_set_resolves_kid() {
        let manager = JwksManager::from_static(fixtures::jwks());
        assert!(manager.is_cached().await);

        let (_, alg) = manager.decoding_key(Some(fixtures::KID)).await.unwrap();
        assert_eq!(alg, Algorithm::ES256);

        let (_, alg) = manager.decoding_key(None).await.unwrap();
        assert_eq!(alg, Algorithm::ES256);
    }

    #[tokio::test]
    async fn unknown_kid_is_no_matching_key() {
        let manager = JwksManager::from_static(fixtures::jwks());
        assert_eq!(
            manager.decoding_key(Some("rotated-away")).await.err(),
            Some(AuthError::NoMatchingKey)
        );
    }

    /// Remote manager whose endpoint refuses connections, seeded with a fresh key set.
    async fn unreachable_with_keys(min_refetch_interval: Duration) -> JwksManager {
        let manager = JwksManager::new("http://127.0.0.1:1/jwks", reqwest::Client::new())
            .with_min_refetch_interval(min_refetch_interval);
        *manager.cache.write().await = Some(CacheEntry {
            jwks: fixtures::jwks(),
            fetched_at: Instant::now(),
        });
        manager
    }

    #[tokio::test]
    async fn unknown_kid_refetch_is_throttled() {
        let manager = unreachable_with_keys(Duration::from_secs(60)).await;

        // first miss goes to the network
        assert!(matches!(
            manager.decoding_key(Some("forged-1")).await,
            Err(AuthError::JwksFetchError(_))
        ));
        // later misses inside the interval are answered from the cache
        for kid in ["forged-2", "forged-3", "forged-4"] {
            assert_eq!(
                manager.decoding_key(Some(kid)).await.err(),
                Some(AuthError::NoMatchingKey)
            );
        }
        assert!(manager.decoding_key(Some(fixtures::KID)).await.is_ok());
    }

    #[tokio::test]
    async fn refetch_resumes_after_interval() {
        let manager = unreachable_with_keys(Duration::ZERO).await;
        for kid in ["forged-1", "forged-2"] {
            assert!(matches!(
                manager.decoding_key(Some(kid)).await,
                Err(AuthError::JwksFetchError(_))
            ));
        }
    }

    #[tokio::test]
    async fn symmetric_keys_are_refused() {
        let jwks: JwkSet = serde_json::from_value(serde_json::json!({
            "keys": [{ "kty": "oct", "kid": "hmac", "k": "c2VjcmV0", "alg": "HS256" }]
        }))
        .unwrap();
        let manager = JwksManager::from_static(jwks);
        assert_eq!(
            manager.decoding_key(Some("hmac")).await.err(),
            Some(AuthError::NoMatchingKey)
        );
    }
}
