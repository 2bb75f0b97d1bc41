// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Grading Auth Server - Authentication & Session Lifecycle Service
//!
//! Issues HS256 access credentials, keeps revocable refresh sessions in an
//! embedded database, throttles sensitive endpoints and routes bearer
//! credentials to the trust authority that signed them.
//!
//! ## Modules
//!
//! - `api` - HTTP API handlers (Axum)
//! - `auth` - Credential issuance, issuer routing and the authentication gate
//! - `rate_limit` - Fixed-window request throttling
//! - `session` - Login / refresh / logout / password-reset orchestration
//! - `storage` - Refresh sessions (redb) and the principal directory
//! - `sweeper` - Periodic cleanup of expired sessions and idle rate windows

pub mod api;
pub mod auth;
pub mod clock;
pub mod config;
pub mod error;
pub mod models;
pub mod rate_limit;
pub mod session;
pub mod state;
pub mod storage;
pub mod sweeper;
pub mod tls;
