// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{
    middleware::from_fn_with_state,
    routing::{delete, get, post, put},
    Router,
};
use chrono::Duration;
use tower::ServiceBuilder;
use tower_http::{
    cors::CorsLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use utoipa::{
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi,
};
use utoipa_swagger_ui::SwaggerUi;

use crate::{
    auth::{authentication_gate, Role},
    models::{
        ForgotPasswordRequest, LoginRequest, LoginResponse, LogoutRequest, MessageResponse,
        RefreshRequest, RegisterRequest, ResetPasswordRequest, ResetTokenStatus, SessionSummary,
        SessionsAffectedResponse, SessionsResponse, UserSummary,
    },
    rate_limit::{enforce_rate_limit, RateLimitGuard, RateLimitPolicy},
    state::AppState,
};

pub mod admin;
pub mod auth;
pub mod health;
pub mod users;

pub const LOGIN_RATE_LIMIT: u32 = 10;
pub const PASSWORD_RESET_RATE_LIMIT: u32 = 3;
/// Registrations per client per hour.
pub const REGISTER_RATE_LIMIT: u32 = 5;

pub fn router(state: AppState) -> Router {
    let login_guard = RateLimitGuard::new(
        state.limiter.clone(),
        RateLimitPolicy::per_minute(
            LOGIN_RATE_LIMIT,
            "Too many login attempts. Please try again later.",
        ),
    );
    let reset_guard = RateLimitGuard::new(
        state.limiter.clone(),
        RateLimitPolicy::new(
            PASSWORD_RESET_RATE_LIMIT,
            Duration::minutes(15),
            "Too many password reset requests. Please try again later.",
        ),
    );
    let register_guard = RateLimitGuard::new(
        state.limiter.clone(),
        RateLimitPolicy::new(
            REGISTER_RATE_LIMIT,
            Duration::hours(1),
            "Too many registrations. Please try again later.",
        ),
    );

    let auth_routes = Router::new()
        .route(
            "/login",
            post(auth::login).route_layer(from_fn_with_state(login_guard, enforce_rate_limit)),
        )
        .route("/refresh", post(auth::refresh))
        .route("/logout", post(auth::logout))
        .route("/external/exchange", post(auth::exchange_external))
        .route(
            "/forgot-password",
            post(auth::forgot_password)
                .route_layer(from_fn_with_state(reset_guard, enforce_rate_limit)),
        )
        .route("/reset-password", put(auth::reset_password))
        .route("/reset-password/verify", get(auth::verify_reset_token))
        .route(
            "/register",
            post(auth::register).route_layer(from_fn_with_state(register_guard, enforce_rate_limit)),
        )
        .route("/register/verify", get(auth::verify_registration));

    let api_routes = Router::new()
        .nest("/api/auth", auth_routes)
        .route("/api/users/me", get(users::get_current_user))
        .route("/api/users/me/sessions", get(users::list_my_sessions))
        .route(
            "/api/admin/principals/{id}/sessions",
            delete(admin::revoke_principal_sessions),
        )
        .route(
            "/api/admin/principals/{id}/sessions/purge",
            delete(admin::purge_principal_sessions),
        )
        .route("/health", get(health::health))
        .route("/health/live", get(health::liveness))
        .route("/health/ready", get(health::readiness))
        .with_state(state.clone());

    Router::new()
        .merge(api_routes)
        .merge(SwaggerUi::new("/docs").url("/api-doc/openapi.json", ApiDoc::openapi()))
        .layer(from_fn_with_state(state.gate.clone(), authentication_gate))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                .layer(TraceLayer::new_for_http())
                .layer(PropagateRequestIdLayer::x_request_id())
                .layer(CorsLayer::permissive()),
        )
}

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        auth::login,
        auth::refresh,
        auth::logout,
        auth::exchange_external,
        auth::forgot_password,
        auth::verify_reset_token,
        auth::reset_password,
        auth::register,
        auth::verify_registration,
        users::get_current_user,
        users::list_my_sessions,
        admin::revoke_principal_sessions,
        admin::purge_principal_sessions,
        health::health,
        health::liveness,
        health::readiness
    ),
    components(
        schemas(
            LoginRequest,
            LoginResponse,
            RefreshRequest,
            LogoutRequest,
            ForgotPasswordRequest,
            ResetPasswordRequest,
            RegisterRequest,
            ResetTokenStatus,
            MessageResponse,
            UserSummary,
            SessionSummary,
            SessionsResponse,
            SessionsAffectedResponse,
            Role,
            health::ReadyResponse,
            health::HealthChecks,
            health::HealthResponse
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Auth", description = "Login, refresh, logout, registration and password reset"),
        (name = "Users", description = "Current principal"),
        (name = "Admin", description = "Session administration"),
        (name = "Health", description = "Liveness and readiness probes")
    )
)]
struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use axum::{
        body::{to_bytes, Body},
        http::{header, Request, StatusCode},
        response::Response,
    };
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use crate::clock::{Clock, ManualClock};
    use crate::config::Settings;
    use crate::session::{LogMailer, RESET_PASSWORD_PURPOSE, VERIFY_EMAIL_PURPOSE};
    use crate::storage::{CredentialHasher, InMemoryDirectory, RefreshTokenStore, SessionPolicy};

    fn test_state() -> (AppState, ManualClock) {
        let clock = ManualClock::new(chrono::Utc::now());
        let shared: Arc<dyn Clock> = Arc::new(clock.clone());

        let mut directory = InMemoryDirectory::new(CredentialHasher::new("pepper"));
        directory.insert_with_password(1, "alice", "alice@example.com", "s3cret", Role::User);
        directory.insert_with_password(2, "root", "root@example.com", "toor", Role::Admin);

        let state = AppState::new(
            Settings::for_tests(),
            RefreshTokenStore::in_memory(SessionPolicy::default(), shared.clone()).unwrap(),
            Arc::new(directory),
            Vec::new(),
            Arc::new(LogMailer),
            shared,
        );
        (state, clock)
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::post(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .header("x-forwarded-for", "203.0.113.7")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn put_json(uri: &str, body: Value) -> Request<Body> {
        Request::put(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    /// Payload credential as mailed by the reset and registration flows.
    fn link_token(state: &AppState, principal_id: i64, claims: Value) -> String {
        let principal = state.directory.find_by_id(principal_id).unwrap();
        let serde_json::Value::Object(extra) = claims else {
            panic!("claims must be an object");
        };
        state
            .issuer
            .issue_payload(&principal, extra, Duration::minutes(15))
            .unwrap()
    }

    fn with_bearer(method: &str, uri: &str, token: &str) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header(header::AUTHORIZATION, format!("Bearer {token}"))
            .body(Body::empty())
            .unwrap()
    }

    async fn json_body(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn login(app: &Router, username: &str, password: &str) -> Value {
        let response = app
            .clone()
            .oneshot(post_json(
                "/api/auth/login",
                json!({"username": username, "password": password}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        json_body(response).await
    }

    #[tokio::test]
    async fn liveness_is_public() {
        let (state, _) = test_state();
        let response = router(state)
            .oneshot(Request::get("/health/live").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key("x-request-id"));
    }

    #[tokio::test]
    async fn health_reports_session_store() {
        let (state, _) = test_state();
        let response = router(state)
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["checks"]["session_store"], "ok");
    }

    #[tokio::test]
    async fn login_then_me() {
        let (state, _) = test_state();
        let app = router(state);
        let tokens = login(&app, "alice", "s3cret").await;
        assert_eq!(tokens["tokenType"], "Bearer");

        let access = tokens["accessToken"].as_str().unwrap();
        let response = app
            .clone()
            .oneshot(with_bearer("GET", "/api/users/me", access))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["username"], "alice");
    }

    #[tokio::test]
    async fn protected_route_without_credential_is_unauthorized() {
        let (state, _) = test_state();
        let response = router(state)
            .oneshot(Request::get("/api/users/me").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(json_body(response).await["error_code"], "missing_auth_header");
    }

    #[tokio::test]
    async fn expired_access_credential_is_unauthorized() {
        let (state, clock) = test_state();
        let app = router(state);
        let tokens = login(&app, "alice", "s3cret").await;

        clock.advance(Duration::minutes(15));
        let response = app
            .oneshot(with_bearer(
                "GET",
                "/api/users/me",
                tokens["accessToken"].as_str().unwrap(),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn login_is_rate_limited_per_client() {
        let (state, clock) = test_state();
        let app = router(state);

        for _ in 0..LOGIN_RATE_LIMIT {
            let response = app
                .clone()
                .oneshot(post_json(
                    "/api/auth/login",
                    json!({"username": "alice", "password": "wrong"}),
                ))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        }

        let limited = app
            .clone()
            .oneshot(post_json(
                "/api/auth/login",
                json!({"username": "alice", "password": "s3cret"}),
            ))
            .await
            .unwrap();
        assert_eq!(limited.status(), StatusCode::TOO_MANY_REQUESTS);

        clock.advance(Duration::minutes(1));
        login(&app, "alice", "s3cret").await;
    }

    #[tokio::test]
    async fn forgot_password_is_rate_limited() {
        let (state, _) = test_state();
        let app = router(state);
        let body = json!({"email": "alice@example.com"});

        for _ in 0..PASSWORD_RESET_RATE_LIMIT {
            let response = app
                .clone()
                .oneshot(post_json("/api/auth/forgot-password", body.clone()))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::ACCEPTED);
        }
        let response = app
            .oneshot(post_json("/api/auth/forgot-password", body))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[tokio::test]
    async fn reset_password_replaces_credential() {
        let (state, _) = test_state();
        let token = link_token(&state, 1, json!({"purpose": RESET_PASSWORD_PURPOSE}));
        let app = router(state);
        let before = login(&app, "alice", "s3cret").await;

        let rejected = app
            .clone()
            .oneshot(put_json(
                "/api/auth/reset-password",
                json!({"token": before["accessToken"], "newPassword": "brand-new-secret"}),
            ))
            .await
            .unwrap();
        assert_eq!(rejected.status(), StatusCode::BAD_REQUEST);

        let response = app
            .clone()
            .oneshot(put_json(
                "/api/auth/reset-password",
                json!({"token": token, "newPassword": "brand-new-secret"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let old = app
            .clone()
            .oneshot(post_json(
                "/api/auth/login",
                json!({"username": "alice", "password": "s3cret"}),
            ))
            .await
            .unwrap();
        assert_eq!(old.status(), StatusCode::UNAUTHORIZED);
        login(&app, "alice", "brand-new-secret").await;

        let stale = app
            .oneshot(post_json(
                "/api/auth/refresh",
                json!({"refreshToken": before["refreshToken"]}),
            ))
            .await
            .unwrap();
        assert_eq!(stale.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn registration_needs_verification_before_login() {
        let (state, _) = test_state();
        let app = router(state.clone());
        let body = json!({
            "username": "carol",
            "email": "carol@example.com",
            "password": "long enough pw"
        });

        let response = app
            .clone()
            .oneshot(post_json("/api/auth/register", body.clone()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);

        let duplicate = app
            .clone()
            .oneshot(post_json("/api/auth/register", body))
            .await
            .unwrap();
        assert_eq!(duplicate.status(), StatusCode::CONFLICT);

        let carol = state.directory.find_by_username("carol").unwrap();
        let inactive = app
            .clone()
            .oneshot(post_json(
                "/api/auth/login",
                json!({"username": "carol", "password": "long enough pw"}),
            ))
            .await
            .unwrap();
        assert_eq!(inactive.status(), StatusCode::FORBIDDEN);

        let token = link_token(
            &state,
            carol.id,
            json!({"purpose": VERIFY_EMAIL_PURPOSE, "email": "carol@example.com"}),
        );
        let verified = app
            .clone()
            .oneshot(
                Request::get(format!("/api/auth/register/verify?token={token}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(verified.status(), StatusCode::OK);

        let tokens = login(&app, "carol", "long enough pw").await;
        assert_eq!(tokens["user"]["role"], "user");
    }

    #[tokio::test]
    async fn registration_is_rate_limited() {
        let (state, _) = test_state();
        let app = router(state);

        for n in 0..REGISTER_RATE_LIMIT {
            let response = app
                .clone()
                .oneshot(post_json(
                    "/api/auth/register",
                    json!({
                        "username": format!("user{n}"),
                        "email": format!("user{n}@example.com"),
                        "password": "long enough pw"
                    }),
                ))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::ACCEPTED);
        }
        let response = app
            .oneshot(post_json(
                "/api/auth/register",
                json!({"username": "late", "email": "late@example.com", "password": "long enough pw"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[tokio::test]
    async fn refresh_of_unknown_token_is_not_found() {
        let (state, _) = test_state();
        let response = router(state)
            .oneshot(post_json(
                "/api/auth/refresh",
                json!({"refreshToken": "never-issued"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn admin_routes_require_admin_role() {
        let (state, _) = test_state();
        let sessions = state.sessions.clone();
        let app = router(state);

        let alice = login(&app, "alice", "s3cret").await;
        let forbidden = app
            .clone()
            .oneshot(with_bearer(
                "DELETE",
                "/api/admin/principals/1/sessions",
                alice["accessToken"].as_str().unwrap(),
            ))
            .await
            .unwrap();
        assert_eq!(forbidden.status(), StatusCode::FORBIDDEN);

        let admin = login(&app, "root", "toor").await;
        let response = app
            .clone()
            .oneshot(with_bearer(
                "DELETE",
                "/api/admin/principals/1/sessions",
                admin["accessToken"].as_str().unwrap(),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["principalId"], 1);
        assert_eq!(body["affected"], 1);
        assert_eq!(sessions.count_active(1).unwrap(), 0);

        let purged = app
            .oneshot(with_bearer(
                "DELETE",
                "/api/admin/principals/1/sessions/purge",
                admin["accessToken"].as_str().unwrap(),
            ))
            .await
            .unwrap();
        assert_eq!(json_body(purged).await["affected"], 1);
    }

    #[tokio::test]
    async fn session_listing_hides_token_values() {
        let (state, _) = test_state();
        let app = router(state);
        let tokens = login(&app, "alice", "s3cret").await;
        login(&app, "alice", "s3cret").await;

        let response = app
            .oneshot(with_bearer(
                "GET",
                "/api/users/me/sessions",
                tokens["accessToken"].as_str().unwrap(),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["sessions"].as_array().unwrap().len(), 2);
        let refresh = tokens["refreshToken"].as_str().unwrap();
        assert!(!body.to_string().contains(refresh));
    }

    #[tokio::test]
    async fn openapi_document_is_served() {
        let (state, _) = test_state();
        let response = router(state)
            .oneshot(Request::get("/api-doc/openapi.json").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let doc = json_body(response).await;
        assert!(doc["paths"]["/api/auth/login"].is_object());
    }
}
