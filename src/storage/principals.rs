// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Principal lookup.
//!
//! Principals are owned by an external user store, reached through the
//! [`PrincipalDirectory`] trait. Token and session handling only read it; the
//! registration and password-reset flows also write through it (new inactive
//! principal, activation, credential change). [`InMemoryDirectory`] is a
//! seedable implementation used for development and tests.
//!
//! Credential hashing sits behind [`CredentialHasher`]; the HMAC-SHA256 +
//! pepper scheme here is a stand-in for whatever the real user store uses.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use base64ct::{Base64, Encoding};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tracing::info;

use crate::auth::Role;

type HmacSha256 = Hmac<Sha256>;

/// Identifier of a principal in the user store.
pub type PrincipalId = i64;

/// Identity record as exposed by the user store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub id: PrincipalId,
    pub username: String,
    pub email: String,
    pub full_name: Option<String>,
    pub avatar_url: Option<String>,
    pub role: Role,
    pub active: bool,
    pub credential_hash: String,
}

/// Self-service registration input.
#[derive(Debug, Clone)]
pub struct NewPrincipal {
    pub username: String,
    pub email: String,
    pub full_name: Option<String>,
    pub password: String,
}

/// View of the user store.
pub trait PrincipalDirectory: Send + Sync {
    fn find_by_id(&self, id: PrincipalId) -> Option<Principal>;

    fn find_by_email(&self, email: &str) -> Option<Principal>;

    fn find_by_username(&self, username: &str) -> Option<Principal>;

    fn exists_by_username(&self, username: &str) -> bool {
        self.find_by_username(username).is_some()
    }

    fn exists_by_email(&self, email: &str) -> bool {
        self.find_by_email(email).is_some()
    }

    /// Check a plaintext password against the principal's stored hash.
    fn verify_credential(&self, principal: &Principal, password: &str) -> bool;

    /// Create an inactive `User` principal. Username and email must be unused.
    fn register(&self, new: NewPrincipal) -> Result<Principal, DirectoryError>;

    /// Mark a principal active.
    fn activate(&self, id: PrincipalId) -> Result<Principal, DirectoryError>;

    /// Replace a principal's password.
    fn set_credential(&self, id: PrincipalId, password: &str) -> Result<(), DirectoryError>;
}

#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    #[error("failed to read principals file: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid principals file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("principal {0} has neither credential_hash nor password")]
    MissingCredential(PrincipalId),

    #[error("duplicate principal id {0}")]
    DuplicateId(PrincipalId),

    #[error("principal {0} not found")]
    NotFound(PrincipalId),

    #[error("username is already taken")]
    UsernameTaken,

    #[error("email is already registered")]
    EmailTaken,
}

/// Keyed credential hasher (HMAC-SHA256, base64 output).
#[derive(Clone)]
pub struct CredentialHasher {
    pepper: Vec<u8>,
}

impl CredentialHasher {
    pub fn new(pepper: impl Into<Vec<u8>>) -> Self {
        Self {
            pepper: pepper.into(),
        }
    }

    fn mac(&self) -> HmacSha256 {
        // HMAC accepts keys of any length
        match <HmacSha256 as Mac>::new_from_slice(&self.pepper) {
            Ok(mac) => mac,
            Err(_) => unreachable!("HMAC-SHA256 accepts keys of any length"),
        }
    }

    pub fn hash(&self, password: &str) -> String {
        let mut mac = self.mac();
        mac.update(password.as_bytes());
        Base64::encode_string(&mac.finalize().into_bytes())
    }

    /// Constant-time comparison against a stored hash.
    pub fn verify(&self, password: &str, stored: &str) -> bool {
        let Ok(expected) = Base64::decode_vec(stored) else {
            return false;
        };
        let mut mac = self.mac();
        mac.update(password.as_bytes());
        mac.verify_slice(&expected).is_ok()
    }
}

/// Entry of the JSON seed file.
#[derive(Debug, Deserialize, Serialize)]
pub struct PrincipalSeed {
    pub id: PrincipalId,
    pub username: String,
    pub email: String,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub role: Role,
    #[serde(default = "default_active")]
    pub active: bool,
    #[serde(default)]
    pub credential_hash: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

fn default_active() -> bool {
    true
}

type PrincipalMap = HashMap<PrincipalId, Principal>;

/// In-memory principal directory.
pub struct InMemoryDirectory {
    principals: RwLock<PrincipalMap>,
    hasher: CredentialHasher,
}

impl InMemoryDirectory {
    pub fn new(hasher: CredentialHasher) -> Self {
        Self {
            principals: RwLock::new(HashMap::new()),
            hasher,
        }
    }

    // a panicking writer cannot leave a half-written map entry behind
    fn read(&self) -> RwLockReadGuard<'_, PrincipalMap> {
        self.principals.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, PrincipalMap> {
        self.principals.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn map_mut(&mut self) -> &mut PrincipalMap {
        self.principals.get_mut().unwrap_or_else(PoisonError::into_inner)
    }

    /// Load principals from a JSON array of [`PrincipalSeed`].
    pub fn from_file(path: &Path, hasher: CredentialHasher) -> Result<Self, DirectoryError> {
        let data = std::fs::read_to_string(path)?;
        let seeds: Vec<PrincipalSeed> = serde_json::from_str(&data)?;
        let mut directory = Self::new(hasher);
        for seed in seeds {
            directory.insert_seed(seed)?;
        }
        info!(
            path = %path.display(),
            count = directory.len(),
            "Loaded principal directory"
        );
        Ok(directory)
    }

    pub fn insert_seed(&mut self, seed: PrincipalSeed) -> Result<(), DirectoryError> {
        let credential_hash = match (seed.credential_hash, seed.password) {
            (Some(hash), _) => hash,
            (None, Some(password)) => self.hasher.hash(&password),
            (None, None) => return Err(DirectoryError::MissingCredential(seed.id)),
        };
        let principals = self.map_mut();
        if principals.contains_key(&seed.id) {
            return Err(DirectoryError::DuplicateId(seed.id));
        }
        principals.insert(
            seed.id,
            Principal {
                id: seed.id,
                username: seed.username,
                email: seed.email,
                full_name: seed.full_name,
                avatar_url: seed.avatar_url,
                role: seed.role,
                active: seed.active,
                credential_hash,
            },
        );
        Ok(())
    }

    /// Insert a principal with a plaintext password (hashed on the way in).
    pub fn insert_with_password(
        &mut self,
        id: PrincipalId,
        username: &str,
        email: &str,
        password: &str,
        role: Role,
    ) -> Principal {
        let principal = Principal {
            id,
            username: username.to_string(),
            email: email.to_string(),
            full_name: None,
            avatar_url: None,
            role,
            active: true,
            credential_hash: self.hasher.hash(password),
        };
        self.map_mut().insert(id, principal.clone());
        principal
    }

    pub fn set_active(&mut self, id: PrincipalId, active: bool) {
        if let Some(principal) = self.map_mut().get_mut(&id) {
            principal.active = active;
        }
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}

impl PrincipalDirectory for InMemoryDirectory {
    fn find_by_id(&self, id: PrincipalId) -> Option<Principal> {
        self.read().get(&id).cloned()
    }

    fn find_by_email(&self, email: &str) -> Option<Principal> {
        self.read()
            .values()
            .find(|p| p.email.eq_ignore_ascii_case(email))
            .cloned()
    }

    fn find_by_username(&self, username: &str) -> Option<Principal> {
        self.read()
            .values()
            .find(|p| p.username == username)
            .cloned()
    }

    fn verify_credential(&self, principal: &Principal, password: &str) -> bool {
        self.hasher.verify(password, &principal.credential_hash)
    }

    fn register(&self, new: NewPrincipal) -> Result<Principal, DirectoryError> {
        let credential_hash = self.hasher.hash(&new.password);
        let mut principals = self.write();
        if principals.values().any(|p| p.username == new.username) {
            return Err(DirectoryError::UsernameTaken);
        }
        if principals
            .values()
            .any(|p| p.email.eq_ignore_ascii_case(&new.email))
        {
            return Err(DirectoryError::EmailTaken);
        }

        let id = principals.keys().max().map_or(1, |max| max + 1);
        let principal = Principal {
            id,
            username: new.username,
            email: new.email,
            full_name: new.full_name,
            avatar_url: None,
            role: Role::User,
            active: false,
            credential_hash,
        };
        principals.insert(id, principal.clone());
        Ok(principal)
    }

    fn activate(&self, id: PrincipalId) -> Result<Principal, DirectoryError> {
        let mut principals = self.write();
        let principal = principals.get_mut(&id).ok_or(DirectoryError::NotFound(id))?;
        principal.active = true;
        Ok(principal.clone())
    }

    fn set_credential(&self, id: PrincipalId, password: &str) -> Result<(), DirectoryError> {
        let credential_hash = self.hasher.hash(password);
        let mut principals = self.write();
        let principal = principals.get_mut(&id).ok_or(DirectoryError::NotFound(id))?;
        principal.credential_hash = credential_hash;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn directory() -> InMemoryDirectory {
        let mut dir = InMemoryDirectory::new(CredentialHasher::new("pepper"));
        dir.insert_with_password(1, "alice", "alice@example.com", "s3cret", Role::Admin);
        dir.insert_with_password(2, "bob", "bob@example.com", "hunter2", Role::User);
        dir
    }

    #[test]
    fn lookups_by_id_email_and_username() {
        let dir = directory();
        assert_eq!(dir.find_by_id(1).unwrap().username, "alice");
        assert_eq!(dir.find_by_email("BOB@example.com").unwrap().id, 2);
        assert!(dir.exists_by_username("alice"));
        assert!(!dir.exists_by_username("carol"));
        assert!(dir.find_by_id(99).is_none());
    }

    #[test]
    fn verify_credential_accepts_only_matching_password() {
        let dir = directory();
        let alice = dir.find_by_id(1).unwrap();
        assert!(dir.verify_credential(&alice, "s3cret"));
        assert!(!dir.verify_credential(&alice, "hunter2"));
    }

    fn carol() -> NewPrincipal {
        NewPrincipal {
            username: "carol".to_string(),
            email: "carol@example.com".to_string(),
            full_name: Some("Carol".to_string()),
            password: "correct horse".to_string(),
        }
    }

    #[test]
    fn register_creates_inactive_user_with_next_id() {
        let dir = directory();
        let carol = dir.register(carol()).unwrap();
        assert_eq!(carol.id, 3);
        assert_eq!(carol.role, Role::User);
        assert!(!carol.active);
        assert!(dir.verify_credential(&carol, "correct horse"));

        assert!(dir.activate(3).unwrap().active);
        assert!(dir.find_by_id(3).unwrap().active);
    }

    #[test]
    fn register_refuses_taken_username_or_email() {
        let dir = directory();
        let mut taken_name = carol();
        taken_name.username = "alice".to_string();
        assert!(matches!(
            dir.register(taken_name),
            Err(DirectoryError::UsernameTaken)
        ));

        let mut taken_email = carol();
        taken_email.email = "BOB@example.com".to_string();
        assert!(matches!(dir.register(taken_email), Err(DirectoryError::EmailTaken)));
        assert_eq!(dir.len(), 2);
    }

    #[test]
    fn set_credential_replaces_password() {
        let dir = directory();
        dir.set_credential(2, "new-password").unwrap();
        let bob = dir.find_by_id(2).unwrap();
        assert!(dir.verify_credential(&bob, "new-password"));
        assert!(!dir.verify_credential(&bob, "hunter2"));
        assert!(matches!(
            dir.set_credential(99, "x"),
            Err(DirectoryError::NotFound(99))
        ));
    }

    #[test]
    fn hasher_rejects_garbage_hash() {
        let hasher = CredentialHasher::new("pepper");
        assert!(!hasher.verify("anything", "not base64!!"));
    }

    #[test]
    fn different_pepper_changes_hash() {
        let a = CredentialHasher::new("one").hash("pw");
        let b = CredentialHasher::new("two").hash("pw");
        assert_ne!(a, b);
    }

    #[test]
    fn from_file_hashes_plaintext_seeds() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"[{{"id":7,"username":"carol","email":"carol@example.com","role":"admin","password":"pw"}}]"#
        )
        .unwrap();

        let dir = InMemoryDirectory::from_file(file.path(), CredentialHasher::new("p")).unwrap();
        let carol = dir.find_by_username("carol").unwrap();
        assert_eq!(carol.role, Role::Admin);
        assert!(carol.active);
        assert!(dir.verify_credential(&carol, "pw"));
    }

    #[test]
    fn seed_without_credential_is_rejected() {
        let mut dir = InMemoryDirectory::new(CredentialHasher::new("p"));
        let seed: PrincipalSeed =
            serde_json::from_str(r#"{"id":3,"username":"x","email":"x@example.com"}"#).unwrap();
        assert!(matches!(
            dir.insert_seed(seed),
            Err(DirectoryError::MissingCredential(3))
        ));
    }
}
