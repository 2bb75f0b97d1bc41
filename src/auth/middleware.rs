// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Authentication gate.
//!
//! Runs once per request, in front of every route:
//!
//! 1. Paths on the public allow-list skip the gate entirely
//! 2. The bearer credential is routed through the [`IssuerResolver`]
//! 3. On success an [`AuthenticatedUser`] marker is attached to the request
//!
//! The gate never rejects. A missing or invalid credential leaves the request
//! unauthenticated (with an [`AuthFailure`] note for diagnostics) and the
//! endpoint's extractor decides whether that is acceptable.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{header::AUTHORIZATION, Extensions, HeaderMap},
    middleware::Next,
    response::Response,
};
use tracing::debug;

use super::resolver::IssuerResolver;
use super::{AuthError, AuthenticatedUser};

/// Paths served without authentication unless configured otherwise.
pub const DEFAULT_PUBLIC_PATHS: &[&str] = &[
    "/",
    "/api/auth",
    "/oauth2",
    "/api/public",
    "/health",
    "/docs",
    "/api-doc",
    "/favicon.ico",
];

/// Why the gate left a request unauthenticated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthFailure(pub AuthError);

/// Allow-list of path prefixes that bypass the gate.
///
/// An entry matches itself and anything below it (`/health` matches
/// `/health/live` but not `/healthz`). `/` matches only the root.
#[derive(Debug, Clone)]
pub struct PublicPaths {
    entries: Vec<String>,
}

impl PublicPaths {
    pub fn new<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            entries: entries.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_public(&self, path: &str) -> bool {
        self.entries.iter().any(|entry| {
            if entry == "/" {
                return path == "/";
            }
            let entry = entry.trim_end_matches('/');
            path == entry
                || path
                    .strip_prefix(entry)
                    .is_some_and(|rest| rest.starts_with('/'))
        })
    }
}

impl Default for PublicPaths {
    fn default() -> Self {
        Self::new(DEFAULT_PUBLIC_PATHS.iter().copied())
    }
}

/// Middleware state for the gate.
#[derive(Clone)]
pub struct AuthenticationGate {
    resolver: Arc<IssuerResolver>,
    public_paths: Arc<PublicPaths>,
}

impl AuthenticationGate {
    pub fn new(resolver: Arc<IssuerResolver>, public_paths: PublicPaths) -> Self {
        Self {
            resolver,
            public_paths: Arc::new(public_paths),
        }
    }

    pub fn public_paths(&self) -> &PublicPaths {
        &self.public_paths
    }
}

/// Extract the credential from `Authorization: Bearer <token>`.
pub fn bearer_token(headers: &HeaderMap) -> Result<&str, AuthError> {
    let header = headers
        .get(AUTHORIZATION)
        .ok_or(AuthError::MissingAuthHeader)?
        .to_str()
        .map_err(|_| AuthError::InvalidAuthHeader)?;

    let token = header
        .strip_prefix("Bearer ")
        .map(str::trim)
        .ok_or(AuthError::InvalidAuthHeader)?;
    if token.is_empty() {
        return Err(AuthError::InvalidAuthHeader);
    }
    Ok(token)
}

/// Authentication gate middleware.
///
/// Install with `axum::middleware::from_fn_with_state(gate, authentication_gate)`.
pub async fn authentication_gate(
    State(gate): State<AuthenticationGate>,
    mut request: Request,
    next: Next,
) -> Response {
    if gate.public_paths.is_public(request.uri().path()) {
        return next.run(request).await;
    }

    let outcome = match bearer_token(request.headers()) {
        Ok(token) => gate.resolver.authenticate(token).await,
        Err(e) => Err(e),
    };

    match outcome {
        Ok(user) => {
            debug!(user_id = %user.user_id, "Request authenticated");
            request.extensions_mut().insert(user);
        }
        Err(e) => {
            if e != AuthError::MissingAuthHeader {
                debug!(
                    path = %request.uri().path(),
                    error_code = e.error_code(),
                    "Credential rejected, continuing unauthenticated"
                );
            }
            request.extensions_mut().insert(AuthFailure(e));
        }
    }

    next.run(request).await
}

/// Principal attached by the gate, if any.
pub fn current_user(extensions: &Extensions) -> Option<&AuthenticatedUser> {
    extensions.get::<AuthenticatedUser>()
}

/// Subject of the principal attached by the gate, if any.
pub fn current_principal_id(extensions: &Extensions) -> Option<String> {
    current_user(extensions).map(|user| user.user_id.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{Role, TokenIssuer};
    use crate::clock::ManualClock;
    use crate::storage::Principal;
    use axum::{
        body::{to_bytes, Body},
        middleware::from_fn_with_state,
        routing::get,
        Router,
    };
    use chrono::{Duration, Utc};
    use tower::ServiceExt;

    fn issuer(clock: &ManualClock) -> Arc<TokenIssuer> {
        Arc::new(TokenIssuer::new(
            "local",
            b"0123456789abcdef0123456789abcdef",
            Duration::minutes(15),
            Duration::days(7),
            Arc::new(clock.clone()),
        ))
    }

    fn principal() -> Principal {
        Principal {
            id: 5,
            username: "alice".to_string(),
            email: "alice@example.com".to_string(),
            full_name: None,
            avatar_url: None,
            role: Role::User,
            active: true,
            credential_hash: String::new(),
        }
    }

    async fn whoami(request: Request) -> String {
        let extensions = request.extensions();
        match (current_principal_id(extensions), extensions.get::<AuthFailure>()) {
            (Some(id), _) => format!("user:{id}"),
            (None, Some(AuthFailure(e))) => format!("anonymous:{}", e.error_code()),
            (None, None) => "anonymous".to_string(),
        }
    }

    fn app(issuer: Arc<TokenIssuer>) -> Router {
        let gate = AuthenticationGate::new(
            Arc::new(IssuerResolver::new(issuer)),
            PublicPaths::default(),
        );
        Router::new()
            .route("/api/things", get(whoami))
            .route("/api/auth/login", get(whoami))
            .layer(from_fn_with_state(gate, authentication_gate))
    }

    async fn call(app: Router, path: &str, token: Option<&str>) -> String {
        let mut builder = Request::builder().uri(path);
        if let Some(token) = token {
            builder = builder.header(AUTHORIZATION, format!("Bearer {token}"));
        }
        let response = app.oneshot(builder.body(Body::empty()).unwrap()).await.unwrap();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(body.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn valid_access_token_attaches_principal() {
        let clock = ManualClock::new(Utc::now());
        let issuer = issuer(&clock);
        let token = issuer.issue_access(&principal()).unwrap();

        assert_eq!(call(app(issuer), "/api/things", Some(&token)).await, "user:5");
    }

    #[tokio::test]
    async fn missing_credential_passes_through() {
        let clock = ManualClock::new(Utc::now());
        assert_eq!(
            call(app(issuer(&clock)), "/api/things", None).await,
            "anonymous:missing_auth_header"
        );
    }

    #[tokio::test]
    async fn invalid_credentials_pass_through_unauthenticated() {
        let clock = ManualClock::new(Utc::now());
        let issuer = issuer(&clock);
        let refresh = issuer.issue_refresh(&principal()).unwrap();
        let access = issuer.issue_access(&principal()).unwrap();

        assert_eq!(
            call(app(issuer.clone()), "/api/things", Some("garbage")).await,
            "anonymous:malformed_token"
        );
        assert_eq!(
            call(app(issuer.clone()), "/api/things", Some(&refresh)).await,
            "anonymous:type_mismatch"
        );

        clock.advance(Duration::minutes(15));
        assert_eq!(
            call(app(issuer), "/api/things", Some(&access)).await,
            "anonymous:token_expired"
        );
    }

    #[tokio::test]
    async fn public_paths_skip_the_gate() {
        let clock = ManualClock::new(Utc::now());
        let issuer = issuer(&clock);
        let token = issuer.issue_access(&principal()).unwrap();

        assert_eq!(
            call(app(issuer), "/api/auth/login", Some(&token)).await,
            "anonymous"
        );
    }

    #[test]
    fn public_path_matching() {
        let paths = PublicPaths::default();
        assert!(paths.is_public("/"));
        assert!(paths.is_public("/health"));
        assert!(paths.is_public("/health/ready"));
        assert!(paths.is_public("/api/auth/refresh"));
        assert!(!paths.is_public("/healthz"));
        assert!(!paths.is_public("/api/users/me"));
        assert!(!paths.is_public("/api/authx"));
    }

    #[test]
    fn bearer_parsing() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer_token(&headers), Err(AuthError::MissingAuthHeader));

        headers.insert(AUTHORIZATION, "Basic abc".parse().unwrap());
        assert_eq!(bearer_token(&headers), Err(AuthError::InvalidAuthHeader));

        headers.insert(AUTHORIZATION, "Bearer  ".parse().unwrap());
        assert_eq!(bearer_token(&headers), Err(AuthError::InvalidAuthHeader));

        headers.insert(AUTHORIZATION, "Bearer abc.def.ghi".parse().unwrap());
        assert_eq!(bearer_token(&headers), Ok("abc.def.ghi"));
    }
}
