// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Rate-limit middleware.
//!
//! Wrap a route with a [`RateLimitGuard`] at registration time:
//!
//! ```rust,ignore
//! .route(
//!     "/api/auth/login",
//!     post(login).route_layer(axum::middleware::from_fn_with_state(
//!         RateLimitGuard::new(limiter.clone(), RateLimitPolicy::per_minute(10, "Too many login attempts")),
//!         enforce_rate_limit,
//!     )),
//! )
//! ```

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{ConnectInfo, Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::Duration;
use tracing::warn;

use super::{client_identity, rate_key, RateLimiter};
use crate::error::ApiError;

/// Budget applied to one route.
#[derive(Debug, Clone)]
pub struct RateLimitPolicy {
    pub max_requests: u32,
    pub window: Duration,
    /// Body of the 429 response
    pub message: String,
}

impl RateLimitPolicy {
    pub fn new(max_requests: u32, window: Duration, message: impl Into<String>) -> Self {
        Self {
            max_requests,
            window,
            message: message.into(),
        }
    }

    pub fn per_minute(max_requests: u32, message: impl Into<String>) -> Self {
        Self::new(max_requests, Duration::minutes(1), message)
    }
}

/// Middleware state: the shared limiter plus this route's policy.
#[derive(Clone)]
pub struct RateLimitGuard {
    limiter: Arc<RateLimiter>,
    policy: Arc<RateLimitPolicy>,
}

impl RateLimitGuard {
    pub fn new(limiter: Arc<RateLimiter>, policy: RateLimitPolicy) -> Self {
        Self {
            limiter,
            policy: Arc::new(policy),
        }
    }
}

/// Refuse the request with 429 once the client's budget is spent.
pub async fn enforce_rate_limit(
    State(guard): State<RateLimitGuard>,
    request: Request,
    next: Next,
) -> Response {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let identity = client_identity(request.headers(), peer);
    let key = rate_key(&identity, guard.policy.window);

    if !guard
        .limiter
        .allow(&key, guard.policy.max_requests, guard.policy.window)
    {
        warn!(
            client = %identity,
            path = %request.uri().path(),
            max_requests = guard.policy.max_requests,
            "Rate limit exceeded"
        );
        return ApiError::too_many_requests(guard.policy.message.clone()).into_response();
    }

    next.run(request).await
}
