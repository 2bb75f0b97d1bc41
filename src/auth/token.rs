// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Local credential issuance and verification.
//!
//! Credentials are compact HS256 JWTs signed with a single shared secret.
//! The JOSE `typ` header carries the credential kind (`access`, `refresh`
//! or `payload`) so a verifier can tell what a credential was minted for.
//!
//! [`TokenIssuer::validate`] is the full check and reports *why* a credential
//! was rejected. [`TokenIssuer::verify`] and [`TokenIssuer::is_expired`] are
//! boolean projections: `verify` looks at signature and structure only, and
//! expiry is a separate question.

use std::sync::Arc;

use chrono::Duration;
use jsonwebtoken::{
    decode, decode_header, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey,
    Header, Validation,
};
use serde_json::{Map, Value};
use tracing::debug;

use super::claims::{Claims, TokenKind};
use super::AuthError;
use crate::clock::Clock;
use crate::storage::Principal;

/// Registered claims owned by the issuer; callers cannot override them.
const RESERVED_CLAIMS: [&str; 4] = ["iss", "sub", "iat", "exp"];

/// Outcome of a full credential check.
#[derive(Debug, Clone, PartialEq)]
pub enum Verification {
    Valid(Claims),
    /// Signature does not match the shared secret (or the algorithm is not HS256)
    InvalidSignature,
    /// Not a three-part JWT, or required claims are missing
    Malformed,
    /// `exp` is at or before the current instant
    Expired,
    /// `typ` header differs from the expected kind
    TypeMismatch,
}

impl Verification {
    pub fn is_valid(&self) -> bool {
        matches!(self, Verification::Valid(_))
    }

    /// Convert into a `Result`, mapping each failure to its [`AuthError`].
    pub fn into_result(self) -> Result<Claims, AuthError> {
        match self {
            Verification::Valid(claims) => Ok(claims),
            Verification::InvalidSignature => Err(AuthError::InvalidSignature),
            Verification::Malformed => Err(AuthError::MalformedToken),
            Verification::Expired => Err(AuthError::TokenExpired),
            Verification::TypeMismatch => Err(AuthError::TypeMismatch),
        }
    }
}

/// Issues and verifies locally signed credentials.
pub struct TokenIssuer {
    issuer: String,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    access_ttl: Duration,
    refresh_ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl TokenIssuer {
    pub fn new(
        issuer: impl Into<String>,
        secret: &[u8],
        access_ttl: Duration,
        refresh_ttl: Duration,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            issuer: issuer.into(),
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            access_ttl,
            refresh_ttl,
            clock,
        }
    }

    /// Configured `iss` value of every credential this issuer signs.
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    pub fn access_ttl(&self) -> Duration {
        self.access_ttl
    }

    pub fn refresh_ttl(&self) -> Duration {
        self.refresh_ttl
    }

    pub fn issue_access(&self, principal: &Principal) -> Result<String, AuthError> {
        let mut extra = Map::new();
        extra.insert("role".to_string(), Value::from(principal.role.to_string()));
        self.sign(TokenKind::Access, principal, extra, self.access_ttl)
    }

    pub fn issue_refresh(&self, principal: &Principal) -> Result<String, AuthError> {
        self.sign(TokenKind::Refresh, principal, Map::new(), self.refresh_ttl)
    }

    /// Sign a one-off credential carrying caller-supplied claims.
    ///
    /// Entries of `extra` named like a registered claim are dropped.
    pub fn issue_payload(
        &self,
        principal: &Principal,
        extra: Map<String, Value>,
        ttl: Duration,
    ) -> Result<String, AuthError> {
        self.sign(TokenKind::Payload, principal, extra, ttl)
    }

    fn sign(
        &self,
        kind: TokenKind,
        principal: &Principal,
        mut extra: Map<String, Value>,
        ttl: Duration,
    ) -> Result<String, AuthError> {
        for reserved in RESERVED_CLAIMS {
            extra.remove(reserved);
        }

        let now = self.clock.now();
        let expires = now
            .checked_add_signed(ttl)
            .ok_or_else(|| AuthError::InternalError(format!("{kind} token lifetime out of range")))?;
        let claims = Claims {
            iss: self.issuer.clone(),
            sub: principal.id.to_string(),
            iat: now.timestamp(),
            exp: expires.timestamp(),
            extra,
        };

        let mut header = Header::new(Algorithm::HS256);
        header.typ = Some(kind.as_str().to_string());

        encode(&header, &claims, &self.encoding_key)
            .map_err(|e| AuthError::InternalError(format!("failed to sign {kind} token: {e}")))
    }

    fn validation() -> Validation {
        let mut validation = Validation::new(Algorithm::HS256);
        // expiry is checked against the injected clock, not the system time
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub", "iss"]);
        validation
    }

    /// Decode and check the signature only.
    fn decode_claims(&self, token: &str) -> Result<Claims, Verification> {
        decode::<Claims>(token, &self.decoding_key, &Self::validation())
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::InvalidSignature | ErrorKind::InvalidAlgorithm => {
                    Verification::InvalidSignature
                }
                _ => Verification::Malformed,
            })
    }

    /// Full check: signature, then `typ` (when `expected` is given), then expiry.
    pub fn validate(&self, token: &str, expected: Option<TokenKind>) -> Verification {
        let claims = match self.decode_claims(token) {
            Ok(claims) => claims,
            Err(failure) => {
                debug!(?failure, "Credential rejected");
                return failure;
            }
        };

        if let Some(expected) = expected {
            if self.kind_of(token) != Some(expected) {
                debug!(expected = %expected, "Credential type mismatch");
                return Verification::TypeMismatch;
            }
        }

        if claims.exp <= self.clock.now().timestamp() {
            return Verification::Expired;
        }

        Verification::Valid(claims)
    }

    /// True iff the signature is valid and the credential is well-formed.
    ///
    /// Neither the `typ` header nor expiry is considered here.
    pub fn verify(&self, token: &str) -> bool {
        self.decode_claims(token).is_ok()
    }

    /// True if `exp` is at or before now. Undecodable credentials count as expired.
    pub fn is_expired(&self, token: &str) -> bool {
        match self.decode_claims(token) {
            Ok(claims) => claims.exp <= self.clock.now().timestamp(),
            Err(_) => true,
        }
    }

    /// Signature-verified claims, regardless of expiry.
    pub fn claims(&self, token: &str) -> Option<Claims> {
        self.decode_claims(token).ok()
    }

    /// Apply `selector` to the signature-verified claims.
    pub fn extract_claim<T>(&self, token: &str, selector: impl FnOnce(&Claims) -> T) -> Option<T> {
        self.claims(token).map(|claims| selector(&claims))
    }

    /// Credential kind declared in the (unverified) header.
    pub fn kind_of(&self, token: &str) -> Option<TokenKind> {
        decode_header(token)
            .ok()
            .and_then(|header| header.typ)
            .and_then(|typ| TokenKind::parse(&typ))
    }
}

impl std::fmt::Debug for TokenIssuer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenIssuer")
            .field("issuer", &self.issuer)
            .field("access_ttl", &self.access_ttl)
            .field("refresh_ttl", &self.refresh_ttl)
            .finish_non_exhaustive()
    }
}
