// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Authentication Module
//!
//! Credential issuance, verification and per-request authentication.
//!
//! ## Auth Flow
//!
//! 1. Login issues an HS256 access credential (`typ = access`) signed with
//!    the shared secret, plus an opaque refresh session
//! 2. Clients send `Authorization: Bearer <credential>`
//! 3. The authentication gate:
//!    - reads the unverified `iss` to pick a trust authority
//!      (this service, or an external OpenID Connect provider)
//!    - lets that authority verify signature, type and expiry
//!    - attaches the subject as an `AuthenticatedUser` marker
//! 4. Endpoints use the `Auth` / `CurrentPrincipal` / `AdminOnly` extractors
//!
//! ## Security
//!
//! - The gate never rejects; endpoints reject through their extractors
//! - External keys come from HTTPS discovery + JWKS, cached with a TTL
//! - Clock skew tolerance is 60 seconds for external credentials, none for local ones

pub mod claims;
pub mod error;
pub mod extractor;
pub mod jwks;
pub mod middleware;
pub mod oidc;
pub mod resolver;
pub mod roles;
pub mod token;

pub use claims::{Authority, AuthenticatedUser, Claims, TokenKind};
pub use error::AuthError;
pub use extractor::{AdminOnly, Auth, CurrentPrincipal, OptionalAuth};
pub use jwks::JwksManager;
pub use middleware::{
    authentication_gate, current_principal_id, AuthenticationGate, PublicPaths,
};
pub use oidc::{OidcProvider, ProviderConfig};
pub use resolver::{IssuerResolver, TrustAuthority};
pub use roles::Role;
pub use token::{TokenIssuer, Verification};
