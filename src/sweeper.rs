// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Background Sweepers
//!
//! Periodic housekeeping tasks:
//!
//! - [`SessionSweeper`] removes refresh sessions whose expiry has passed
//!   (default every hour)
//! - [`RateWindowSweeper`] drops rate-limit windows idle for longer than
//!   the configured idle time (default every 5 minutes)
//!
//! A failed sweep is logged and retried on the next tick; it never stops the
//! loop. Both tasks stop when the shared `CancellationToken` is triggered.
//! Session sweeps write to redb and run on the blocking thread pool.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::rate_limit::RateLimiter;
use crate::storage::{RefreshTokenStore, SessionStoreError};

#[derive(Debug, thiserror::Error)]
pub enum SweepError {
    #[error(transparent)]
    Store(#[from] SessionStoreError),

    #[error("sweep task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

const DEFAULT_SESSION_SWEEP_INTERVAL: Duration = Duration::from_secs(3600);
const DEFAULT_RATE_SWEEP_INTERVAL: Duration = Duration::from_secs(300);

async fn wait_or_cancel(interval: Duration, shutdown: &CancellationToken) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(interval) => true,
        _ = shutdown.cancelled() => false,
    }
}

/// Deletes expired refresh sessions.
pub struct SessionSweeper {
    sessions: Arc<RefreshTokenStore>,
    clock: Arc<dyn Clock>,
    interval: Duration,
}

impl SessionSweeper {
    pub fn new(sessions: Arc<RefreshTokenStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            sessions,
            clock,
            interval: DEFAULT_SESSION_SWEEP_INTERVAL,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Run one sweep and return how many sessions were deleted.
    pub async fn sweep_step(&self) -> Result<usize, SweepError> {
        let sessions = self.sessions.clone();
        let now = self.clock.now();
        let removed = tokio::task::spawn_blocking(move || sessions.sweep_expired(now)).await??;
        debug!(removed, "Refresh session sweep finished");
        Ok(removed)
    }

    /// Run until `shutdown` is cancelled.
    ///
    /// ```rust,ignore
    /// tokio::spawn(sweeper.run(shutdown.clone()));
    /// ```
    pub async fn run(self, shutdown: CancellationToken) {
        info!(
            interval_secs = self.interval.as_secs(),
            "Refresh session sweeper starting"
        );

        loop {
            if shutdown.is_cancelled() {
                break;
            }

            if let Err(e) = self.sweep_step().await {
                warn!(error = %e, "Refresh session sweep failed");
            }

            if !wait_or_cancel(self.interval, &shutdown).await {
                break;
            }
        }
        info!("Refresh session sweeper shutting down");
    }
}

/// Evicts idle rate-limit windows.
pub struct RateWindowSweeper {
    limiter: Arc<RateLimiter>,
    idle: chrono::Duration,
    interval: Duration,
}

impl RateWindowSweeper {
    pub fn new(limiter: Arc<RateLimiter>, idle: chrono::Duration) -> Self {
        Self {
            limiter,
            idle,
            interval: DEFAULT_RATE_SWEEP_INTERVAL,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn sweep_step(&self) -> usize {
        let evicted = self.limiter.sweep(self.idle);
        if evicted > 0 {
            debug!(evicted, remaining = self.limiter.len(), "Idle rate windows swept");
        }
        evicted
    }

    pub async fn run(self, shutdown: CancellationToken) {
        info!(
            interval_secs = self.interval.as_secs(),
            idle_secs = self.idle.num_seconds(),
            "Rate window sweeper starting"
        );

        loop {
            if shutdown.is_cancelled() {
                break;
            }

            self.sweep_step();

            if !wait_or_cancel(self.interval, &shutdown).await {
                break;
            }
        }
        info!("Rate window sweeper shutting down");
    }
}
