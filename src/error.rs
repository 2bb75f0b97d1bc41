// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tracing::error;

use crate::auth::AuthError;
use crate::session::SessionError;
use crate::storage::{DirectoryError, SessionStoreError};

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, message)
    }

    pub fn too_many_requests(message: impl Into<String>) -> Self {
        Self::new(StatusCode::TOO_MANY_REQUESTS, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(ErrorBody {
            error: self.message,
        });
        (self.status, body).into_response()
    }
}

impl From<SessionStoreError> for ApiError {
    fn from(err: SessionStoreError) -> Self {
        match err {
            SessionStoreError::NotFound => ApiError::not_found("Refresh token not found"),
            SessionStoreError::Expired => ApiError::bad_request("Refresh token expired"),
            SessionStoreError::Revoked => ApiError::bad_request("Refresh token revoked"),
            other => {
                error!(error = %other, "Session store failure");
                ApiError::internal("Session storage unavailable")
            }
        }
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        if err.status_code().is_server_error() {
            error!(error = %err, "Authentication backend failure");
        }
        ApiError::new(err.status_code(), err.to_string())
    }
}

impl From<DirectoryError> for ApiError {
    fn from(err: DirectoryError) -> Self {
        match err {
            DirectoryError::UsernameTaken | DirectoryError::EmailTaken => {
                ApiError::conflict(err.to_string())
            }
            DirectoryError::NotFound(_) => ApiError::not_found("Principal not found"),
            other => {
                error!(error = %other, "Principal directory failure");
                ApiError::internal("Principal directory unavailable")
            }
        }
    }
}

impl From<SessionError> for ApiError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::Auth(auth) => auth.into(),
            SessionError::Store(store) => store.into(),
            SessionError::Directory(directory) => directory.into(),
            SessionError::InvalidResetToken
            | SessionError::InvalidVerificationToken
            | SessionError::InvalidInput(_) => ApiError::bad_request(err.to_string()),
        }
    }
}
