// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Shared application state.
//!
//! Everything here is behind an `Arc`; cloning the state per request is cheap.

use std::sync::Arc;

use tracing::{info, warn};

use crate::auth::oidc::http_client;
use crate::auth::{
    AuthError, AuthenticationGate, IssuerResolver, OidcProvider, PublicPaths, TokenIssuer,
};
use crate::clock::Clock;
use crate::config::{ConfigError, Settings};
use crate::rate_limit::RateLimiter;
use crate::session::{LinkMailer, LogMailer, SessionConfig, SessionService};
use crate::storage::{
    CredentialHasher, DirectoryError, InMemoryDirectory, PrincipalDirectory, RefreshTokenStore,
    SessionPolicy, SessionStoreError,
};

/// Failures while assembling the state at startup.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("session store: {0}")]
    Store(#[from] SessionStoreError),

    #[error("principal directory: {0}")]
    Directory(#[from] DirectoryError),

    #[error("identity providers: {0}")]
    Providers(#[from] AuthError),

    #[error("data directory: {0}")]
    DataDir(#[from] std::io::Error),
}

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub clock: Arc<dyn Clock>,
    pub issuer: Arc<TokenIssuer>,
    pub sessions: Arc<RefreshTokenStore>,
    pub limiter: Arc<RateLimiter>,
    pub resolver: Arc<IssuerResolver>,
    pub directory: Arc<dyn PrincipalDirectory>,
    pub session_service: Arc<SessionService>,
    pub gate: AuthenticationGate,
}

impl AppState {
    /// Assemble the state from already-built parts.
    pub fn new(
        settings: Settings,
        sessions: RefreshTokenStore,
        directory: Arc<dyn PrincipalDirectory>,
        providers: Vec<OidcProvider>,
        mailer: Arc<dyn LinkMailer>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let issuer = Arc::new(TokenIssuer::new(
            settings.jwt_issuer.clone(),
            &settings.jwt_secret,
            settings.access_ttl,
            settings.refresh_ttl,
            clock.clone(),
        ));
        let resolver = Arc::new(
            providers
                .into_iter()
                .fold(IssuerResolver::new(issuer.clone()), |resolver, provider| {
                    resolver.with_provider(Arc::new(provider))
                }),
        );
        let public_paths = settings
            .public_paths
            .clone()
            .map(PublicPaths::new)
            .unwrap_or_default();
        let gate = AuthenticationGate::new(resolver.clone(), public_paths);

        let sessions = Arc::new(sessions);
        let session_service = Arc::new(SessionService::new(
            issuer.clone(),
            sessions.clone(),
            resolver.clone(),
            directory.clone(),
            mailer,
            SessionConfig {
                rotate_refresh_tokens: settings.rotate_refresh_tokens,
                reset_url: settings.reset_password_url.clone(),
                registration_url: settings.registration_verify_url.clone(),
                ..SessionConfig::default()
            },
        ));

        Self {
            settings: Arc::new(settings),
            limiter: Arc::new(RateLimiter::new(clock.clone())),
            clock,
            issuer,
            sessions,
            resolver,
            directory,
            session_service,
            gate,
        }
    }

    /// Open the session database, load principals and configure providers.
    pub fn from_settings(settings: Settings, clock: Arc<dyn Clock>) -> Result<Self, StartupError> {
        std::fs::create_dir_all(&settings.data_dir)?;
        let policy = SessionPolicy {
            ttl: settings.refresh_ttl,
            max_per_principal: settings.max_sessions_per_principal,
        };
        let sessions = RefreshTokenStore::open(&settings.session_db_path(), policy, clock.clone())?;

        let hasher = CredentialHasher::new(settings.password_pepper.as_bytes());
        let directory = match &settings.principals_file {
            Some(path) => InMemoryDirectory::from_file(path, hasher)?,
            None => {
                warn!("No principals file configured; starting with an empty directory");
                InMemoryDirectory::new(hasher)
            }
        };
        info!(principals = directory.len(), "Principal directory loaded");

        let providers = if settings.oidc_providers.is_empty() {
            Vec::new()
        } else {
            let client = http_client()?;
            settings
                .oidc_providers
                .iter()
                .cloned()
                .map(|config| {
                    info!(provider = %config.name, issuer = %config.issuer, "External identity provider configured");
                    OidcProvider::new(config, client.clone())
                })
                .collect()
        };

        Ok(Self::new(
            settings,
            sessions,
            Arc::new(directory),
            providers,
            Arc::new(LogMailer),
            clock,
        ))
    }
}
