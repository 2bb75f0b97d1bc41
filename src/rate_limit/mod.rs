// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Request Throttling
//!
//! Fixed-window request counters keyed by `client_identity + "_" + window_minutes`.
//!
//! ## Policy
//!
//! - The first request after `window` has elapsed since the last allowed hit
//!   resets the counter (fixed window, so bursts at window edges are possible)
//! - At `max_requests` within the window further requests are refused
//! - Refused requests do not extend the window
//!
//! ## Concurrency
//!
//! Windows live in a fixed number of mutex-guarded shards. The whole
//! read / check / increment sequence for a key runs under its shard lock,
//! so N concurrent callers on one key never get more than `max_requests`
//! admissions per window.

pub mod layer;

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};

use axum::http::HeaderMap;
use chrono::{DateTime, Duration, Utc};

use crate::clock::Clock;

pub use layer::{enforce_rate_limit, RateLimitGuard, RateLimitPolicy};

const SHARDS: usize = 16;

/// Per-key counter.
#[derive(Debug, Clone, Copy)]
struct RateWindow {
    count: u32,
    last_hit: DateTime<Utc>,
}

/// In-memory fixed-window rate limiter.
pub struct RateLimiter {
    shards: Vec<Mutex<HashMap<String, RateWindow>>>,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            shards: (0..SHARDS).map(|_| Mutex::new(HashMap::new())).collect(),
            clock,
        }
    }

    fn shard(&self, key: &str) -> MutexGuard<'_, HashMap<String, RateWindow>> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        let index = (hasher.finish() as usize) % self.shards.len();
        // a poisoned shard only means a panic elsewhere; the counters are still usable
        self.shards[index]
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Record a request for `key`; false if it exceeds the window's budget.
    pub fn allow(&self, key: &str, max_requests: u32, window: Duration) -> bool {
        let now = self.clock.now();
        let mut shard = self.shard(key);
        let entry = shard.entry(key.to_string()).or_insert(RateWindow {
            count: 0,
            last_hit: now,
        });

        if now - entry.last_hit >= window {
            entry.count = 0;
        }
        if entry.count >= max_requests {
            return false;
        }
        entry.count += 1;
        entry.last_hit = now;
        true
    }

    /// Drop windows idle for at least `idle`. Returns how many were removed.
    ///
    /// Shards are locked one at a time.
    pub fn sweep(&self, idle: Duration) -> usize {
        let now = self.clock.now();
        let mut removed = 0;
        for shard in &self.shards {
            let mut shard = shard.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            let before = shard.len();
            shard.retain(|_, window| now - window.last_hit < idle);
            removed += before - shard.len();
        }
        removed
    }

    /// Number of tracked keys.
    pub fn len(&self) -> usize {
        self.shards
            .iter()
            .map(|shard| {
                shard
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner())
                    .len()
            })
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Client identity: first `X-Forwarded-For` entry, then `X-Real-IP`, then the peer address.
pub fn client_identity(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty());
    if let Some(forwarded) = forwarded {
        return forwarded.to_string();
    }

    let real_ip = headers
        .get("x-real-ip")
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty());
    if let Some(real_ip) = real_ip {
        return real_ip.to_string();
    }

    peer.map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Limiter key for a client and window length.
pub fn rate_key(identity: &str, window: Duration) -> String {
    format!("{}_{}", identity, window.num_minutes())
}
