// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Storage Module
//!
//! - `refresh_tokens`: durable refresh sessions in an embedded redb file
//!   (`{DATA_DIR}/sessions.redb`)
//! - `principals`: view of the external user store
//!
//! Access credentials are never persisted.

pub mod principals;
pub mod refresh_tokens;

pub use principals::{
    CredentialHasher, DirectoryError, InMemoryDirectory, NewPrincipal, Principal,
    PrincipalDirectory, PrincipalId, PrincipalSeed,
};
pub use refresh_tokens::{
    RefreshCredential, RefreshTokenStore, SessionPolicy, SessionResult, SessionStoreError,
};
