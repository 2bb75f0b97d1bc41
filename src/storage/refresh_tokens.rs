// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Durable refresh-session store backed by redb (pure Rust, ACID).
//!
//! ## Table Layout
//!
//! - `refresh_sessions`: token value → serialized RefreshCredential
//! - `owner_sessions`: composite key (owner_id_be|token) → token value
//! - `session_meta`: key → u64 (`next_id` counter)
//!
//! Every mutation runs in a single redb write transaction. redb serializes
//! writers, so the count / revoke / insert sequence of [`RefreshTokenStore::create`]
//! is atomic with respect to concurrent logins of the same principal.
//!
//! Token values are opaque (`<uuid>-<unix_millis>`), not signed credentials,
//! and are never written to logs.

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use redb::{Database, ReadableDatabase, ReadableTable, Table, TableDefinition};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::principals::PrincipalId;
use crate::clock::Clock;

// =============================================================================
// Table Definitions
// =============================================================================

/// Primary table: token value → serialized RefreshCredential (JSON bytes).
const SESSIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("refresh_sessions");

/// Index: `owner_id (i64 BE) | token` → token value.
const OWNER_INDEX: TableDefinition<&[u8], &str> = TableDefinition::new("owner_sessions");

/// Counters: key → u64.
const META: TableDefinition<&str, u64> = TableDefinition::new("session_meta");

const NEXT_ID_KEY: &str = "next_id";

/// Rows removed per write transaction during a sweep.
const SWEEP_BATCH: usize = 256;

// =============================================================================
// Error Type
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum SessionStoreError {
    #[error("refresh token not found")]
    NotFound,

    #[error("refresh token expired")]
    Expired,

    #[error("refresh token revoked")]
    Revoked,

    #[error("redb error: {0}")]
    Redb(#[from] redb::Error),

    #[error("redb database error: {0}")]
    RedbDatabase(#[from] redb::DatabaseError),

    #[error("redb transaction error: {0}")]
    RedbTransaction(#[from] redb::TransactionError),

    #[error("redb table error: {0}")]
    RedbTable(#[from] redb::TableError),

    #[error("redb storage error: {0}")]
    RedbStorage(#[from] redb::StorageError),

    #[error("redb commit error: {0}")]
    RedbCommit(#[from] redb::CommitError),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl SessionStoreError {
    /// Domain outcomes (as opposed to storage failures).
    pub fn is_domain(&self) -> bool {
        matches!(
            self,
            SessionStoreError::NotFound | SessionStoreError::Expired | SessionStoreError::Revoked
        )
    }
}

pub type SessionResult<T> = Result<T, SessionStoreError>;

// =============================================================================
// Model
// =============================================================================

/// Persisted refresh session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshCredential {
    pub id: u64,
    pub token: String,
    pub owner_id: PrincipalId,
    pub expires_at: DateTime<Utc>,
    pub revoked: bool,
    pub created_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
}

impl RefreshCredential {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    /// Neither revoked nor expired.
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        !self.revoked && !self.is_expired(now)
    }
}

/// Lifetime and cap applied to new sessions.
#[derive(Debug, Clone, Copy)]
pub struct SessionPolicy {
    pub ttl: Duration,
    pub max_per_principal: usize,
}

impl Default for SessionPolicy {
    fn default() -> Self {
        Self {
            ttl: Duration::days(7),
            max_per_principal: 5,
        }
    }
}

// =============================================================================
// Key Helpers
// =============================================================================

fn owner_prefix(owner: PrincipalId) -> [u8; 8] {
    owner.to_be_bytes()
}

fn make_index_key(owner: PrincipalId, token: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(8 + token.len());
    key.extend_from_slice(&owner_prefix(owner));
    key.extend_from_slice(token.as_bytes());
    key
}

/// Upper bound for an owner range scan. Token values are ASCII, so a
/// trailing 0xFF sorts after every key with this prefix.
fn make_prefix_end(owner: PrincipalId) -> Vec<u8> {
    let mut end = Vec::with_capacity(9);
    end.extend_from_slice(&owner_prefix(owner));
    end.push(0xFF);
    end
}

fn new_token_value(now: DateTime<Utc>) -> String {
    format!("{}-{}", Uuid::new_v4(), now.timestamp_millis())
}

// =============================================================================
// Transaction-scoped table set
// =============================================================================

struct Tables<'txn> {
    sessions: Table<'txn, &'static str, &'static [u8]>,
    index: Table<'txn, &'static [u8], &'static str>,
    meta: Table<'txn, &'static str, u64>,
}

impl Tables<'_> {
    fn load(&self, token: &str) -> SessionResult<Option<RefreshCredential>> {
        match self.sessions.get(token)? {
            Some(value) => Ok(Some(serde_json::from_slice(value.value())?)),
            None => Ok(None),
        }
    }

    fn store(&mut self, credential: &RefreshCredential) -> SessionResult<()> {
        let json = serde_json::to_vec(credential)?;
        self.sessions
            .insert(credential.token.as_str(), json.as_slice())?;
        Ok(())
    }

    fn remove(&mut self, credential: &RefreshCredential) -> SessionResult<()> {
        self.sessions.remove(credential.token.as_str())?;
        let key = make_index_key(credential.owner_id, &credential.token);
        self.index.remove(key.as_slice())?;
        Ok(())
    }

    fn owned_tokens(&self, owner: PrincipalId) -> SessionResult<Vec<String>> {
        let start = owner_prefix(owner);
        let end = make_prefix_end(owner);
        let mut tokens = Vec::new();
        for entry in self.index.range::<&[u8]>(start.as_slice()..end.as_slice())? {
            let (_, token) = entry?;
            tokens.push(token.value().to_string());
        }
        Ok(tokens)
    }

    fn owned(&self, owner: PrincipalId) -> SessionResult<Vec<RefreshCredential>> {
        let mut credentials = Vec::new();
        for token in self.owned_tokens(owner)? {
            if let Some(credential) = self.load(&token)? {
                credentials.push(credential);
            }
        }
        Ok(credentials)
    }

    fn next_id(&mut self) -> SessionResult<u64> {
        let next = self.meta.get(NEXT_ID_KEY)?.map(|v| v.value()).unwrap_or(0) + 1;
        self.meta.insert(NEXT_ID_KEY, next)?;
        Ok(next)
    }

    /// Look a session up for use: unknown → NotFound, revoked → Revoked,
    /// expired → row deleted and Expired.
    fn check(&mut self, token: &str, now: DateTime<Utc>) -> SessionResult<RefreshCredential> {
        let credential = self.load(token)?.ok_or(SessionStoreError::NotFound)?;
        if credential.revoked {
            return Err(SessionStoreError::Revoked);
        }
        if credential.is_expired(now) {
            self.remove(&credential)?;
            debug!(
                session_id = credential.id,
                owner_id = credential.owner_id,
                "Deleted expired refresh session on lookup"
            );
            return Err(SessionStoreError::Expired);
        }
        Ok(credential)
    }

    /// Enforce the per-principal cap, then insert a fresh session.
    fn insert_new(
        &mut self,
        owner: PrincipalId,
        policy: SessionPolicy,
        now: DateTime<Utc>,
    ) -> SessionResult<RefreshCredential> {
        let active: Vec<RefreshCredential> = self
            .owned(owner)?
            .into_iter()
            .filter(|c| c.is_active(now))
            .collect();

        if active.len() >= policy.max_per_principal {
            let revoked = active.len();
            for mut credential in active {
                credential.revoked = true;
                self.store(&credential)?;
            }
            warn!(
                owner_id = owner,
                revoked,
                max = policy.max_per_principal,
                "Refresh session cap reached; revoked all sessions of principal"
            );
        }

        let credential = RefreshCredential {
            id: self.next_id()?,
            token: new_token_value(now),
            owner_id: owner,
            expires_at: now + policy.ttl,
            revoked: false,
            created_at: now,
            last_used_at: None,
        };
        self.store(&credential)?;
        let key = make_index_key(owner, &credential.token);
        self.index.insert(key.as_slice(), credential.token.as_str())?;
        Ok(credential)
    }
}

// =============================================================================
// RefreshTokenStore
// =============================================================================

/// Durable, revocable store of refresh sessions.
pub struct RefreshTokenStore {
    db: Database,
    policy: SessionPolicy,
    clock: Arc<dyn Clock>,
}

impl RefreshTokenStore {
    /// Open (or create) the store at the given path.
    pub fn open(path: &Path, policy: SessionPolicy, clock: Arc<dyn Clock>) -> SessionResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database::create(path)?;
        info!(path = %path.display(), "Opened refresh session store");
        Self::init(db, policy, clock)
    }

    /// Non-persistent store, for tests and ephemeral deployments.
    pub fn in_memory(policy: SessionPolicy, clock: Arc<dyn Clock>) -> SessionResult<Self> {
        let db = Database::builder().create_with_backend(redb::backends::InMemoryBackend::new())?;
        Self::init(db, policy, clock)
    }

    fn init(db: Database, policy: SessionPolicy, clock: Arc<dyn Clock>) -> SessionResult<Self> {
        // Pre-create all tables so later read transactions don't fail
        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(SESSIONS)?;
            let _ = write_txn.open_table(OWNER_INDEX)?;
            let _ = write_txn.open_table(META)?;
        }
        write_txn.commit()?;

        Ok(Self { db, policy, clock })
    }

    pub fn policy(&self) -> SessionPolicy {
        self.policy
    }

    /// Run `f` in one write transaction.
    ///
    /// Domain failures still commit so that an expired row deleted during
    /// the lookup stays deleted; storage failures abort.
    fn write<T>(&self, f: impl FnOnce(&mut Tables<'_>) -> SessionResult<T>) -> SessionResult<T> {
        let write_txn = self.db.begin_write()?;
        let outcome = {
            let mut tables = Tables {
                sessions: write_txn.open_table(SESSIONS)?,
                index: write_txn.open_table(OWNER_INDEX)?,
                meta: write_txn.open_table(META)?,
            };
            f(&mut tables)
        };
        match outcome {
            Ok(value) => {
                write_txn.commit()?;
                Ok(value)
            }
            Err(e) if e.is_domain() => {
                write_txn.commit()?;
                Err(e)
            }
            Err(e) => {
                write_txn.abort()?;
                Err(e)
            }
        }
    }

    /// Create a session for `owner`.
    ///
    /// If the owner already holds `max_per_principal` active sessions, all of
    /// them are revoked first.
    pub fn create(&self, owner: PrincipalId) -> SessionResult<RefreshCredential> {
        let now = self.clock.now();
        let policy = self.policy;
        let credential = self.write(|tables| tables.insert_new(owner, policy, now))?;
        info!(owner_id = owner, session_id = credential.id, "Created refresh session");
        Ok(credential)
    }

    /// Return the session if it is usable.
    ///
    /// An expired session is deleted as a side effect.
    pub fn validate(&self, token: &str) -> SessionResult<RefreshCredential> {
        let now = self.clock.now();
        // Fast path on a read transaction; only expiry needs a writer.
        let credential = self.get(token)?.ok_or(SessionStoreError::NotFound)?;
        if credential.revoked {
            return Err(SessionStoreError::Revoked);
        }
        if credential.is_expired(now) {
            return self.write(|tables| tables.check(token, now));
        }
        Ok(credential)
    }

    /// Validate and stamp `last_used_at`.
    pub fn touch(&self, token: &str) -> SessionResult<RefreshCredential> {
        let now = self.clock.now();
        self.write(|tables| {
            let mut credential = tables.check(token, now)?;
            credential.last_used_at = Some(now);
            tables.store(&credential)?;
            Ok(credential)
        })
    }

    /// Revoke the presented session and issue its replacement atomically.
    pub fn rotate(&self, token: &str) -> SessionResult<RefreshCredential> {
        let now = self.clock.now();
        let policy = self.policy;
        let (previous, replacement) = self.write(|tables| {
            let mut previous = tables.check(token, now)?;
            previous.revoked = true;
            previous.last_used_at = Some(now);
            tables.store(&previous)?;
            let replacement = tables.insert_new(previous.owner_id, policy, now)?;
            Ok((previous, replacement))
        })?;
        info!(
            owner_id = previous.owner_id,
            previous_id = previous.id,
            session_id = replacement.id,
            "Rotated refresh session"
        );
        Ok(replacement)
    }

    /// Revoke one session. Revoking an already revoked session is a no-op.
    pub fn revoke_one(&self, token: &str) -> SessionResult<RefreshCredential> {
        self.write(|tables| {
            let mut credential = tables.load(token)?.ok_or(SessionStoreError::NotFound)?;
            if !credential.revoked {
                credential.revoked = true;
                tables.store(&credential)?;
            }
            Ok(credential)
        })
    }

    /// Revoke every non-revoked session of `owner`. Returns how many changed.
    pub fn revoke_all_for_principal(&self, owner: PrincipalId) -> SessionResult<usize> {
        let revoked = self.write(|tables| {
            let mut revoked = 0;
            for mut credential in tables.owned(owner)? {
                if !credential.revoked {
                    credential.revoked = true;
                    tables.store(&credential)?;
                    revoked += 1;
                }
            }
            Ok(revoked)
        })?;
        info!(owner_id = owner, revoked, "Revoked refresh sessions");
        Ok(revoked)
    }

    /// Delete every session row of `owner`. Returns how many were removed.
    pub fn delete_all_for_principal(&self, owner: PrincipalId) -> SessionResult<usize> {
        let deleted = self.write(|tables| {
            let credentials = tables.owned(owner)?;
            for credential in &credentials {
                tables.remove(credential)?;
            }
            Ok(credentials.len())
        })?;
        info!(owner_id = owner, deleted, "Deleted refresh sessions");
        Ok(deleted)
    }

    /// Delete every row whose expiry is strictly before `now`.
    ///
    /// Rows are collected on a read transaction and removed in small write
    /// batches so foreground writers are never blocked for long.
    pub fn sweep_expired(&self, now: DateTime<Utc>) -> SessionResult<usize> {
        let expired: Vec<RefreshCredential> = {
            let read_txn = self.db.begin_read()?;
            let table = read_txn.open_table(SESSIONS)?;
            let mut expired = Vec::new();
            for entry in table.iter()? {
                let (_, value) = entry?;
                let credential: RefreshCredential = serde_json::from_slice(value.value())?;
                if credential.expires_at < now {
                    expired.push(credential);
                }
            }
            expired
        };

        let mut removed = 0;
        for batch in expired.chunks(SWEEP_BATCH) {
            removed += self.write(|tables| {
                let mut removed = 0;
                for credential in batch {
                    if tables.sessions.remove(credential.token.as_str())?.is_some() {
                        removed += 1;
                    }
                    let key = make_index_key(credential.owner_id, &credential.token);
                    tables.index.remove(key.as_slice())?;
                }
                Ok(removed)
            })?;
        }

        if removed > 0 {
            info!(removed, "Swept expired refresh sessions");
        }
        Ok(removed)
    }

    /// Look a session up without any validity checks.
    pub fn get(&self, token: &str) -> SessionResult<Option<RefreshCredential>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(SESSIONS)?;
        match table.get(token)? {
            Some(value) => Ok(Some(serde_json::from_slice(value.value())?)),
            None => Ok(None),
        }
    }

    /// Active sessions of `owner`, oldest first.
    pub fn active_for_principal(&self, owner: PrincipalId) -> SessionResult<Vec<RefreshCredential>> {
        let now = self.clock.now();
        let read_txn = self.db.begin_read()?;
        let index = read_txn.open_table(OWNER_INDEX)?;
        let sessions = read_txn.open_table(SESSIONS)?;

        let start = owner_prefix(owner);
        let end = make_prefix_end(owner);
        let mut active = Vec::new();
        for entry in index.range::<&[u8]>(start.as_slice()..end.as_slice())? {
            let (_, token) = entry?;
            if let Some(value) = sessions.get(token.value())? {
                let credential: RefreshCredential = serde_json::from_slice(value.value())?;
                if credential.is_active(now) {
                    active.push(credential);
                }
            }
        }
        active.sort_by_key(|c| c.id);
        Ok(active)
    }

    pub fn count_active(&self, owner: PrincipalId) -> SessionResult<usize> {
        Ok(self.active_for_principal(owner)?.len())
    }

    /// Check the store can serve a read transaction.
    pub fn ping(&self) -> SessionResult<()> {
        let read_txn = self.db.begin_read()?;
        let _ = read_txn.open_table(SESSIONS)?;
        Ok(())
    }
}
