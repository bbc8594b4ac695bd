//! Pooled backend connection state machine
//!
//! Transitions: `Connecting -> Ready`, `Ready -> Degraded` on transport
//! error, `Degraded -> Connecting` on a scheduled reconnect attempt, and any
//! state `-> Closed` on explicit teardown or when the consecutive-failure
//! ceiling is hit. The attempt counter resets to zero on reaching `Ready`.
//!
//! State changes are published on a `watch` channel so concurrent callers
//! can share one in-flight connection attempt instead of racing to dial.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use rand::Rng;
use serde::Serialize;
use tokio::sync::watch;
use uuid::Uuid;

use super::channel::WireChannel;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Connecting,
    Ready,
    Degraded,
    Closed,
}

#[derive(Debug, Default)]
struct ConnStats {
    consecutive_failures: u32,
    last_error: Option<String>,
    last_attempt: Option<Instant>,
    connected_at: Option<Instant>,
}

/// One pooled connection to one backend server.
///
/// Owned by the pool; sessions refer to it by backend identity only.
pub struct PooledConnection {
    pub server_id: Uuid,
    state_tx: watch::Sender<ConnectionState>,
    stats: Mutex<ConnStats>,
    channel: RwLock<Option<Arc<WireChannel>>>,
    /// Set by the sweep when no session references this backend; cleared as
    /// soon as a reference reappears.
    idle_since: Mutex<Option<Instant>>,
}

impl PooledConnection {
    pub fn new(server_id: Uuid) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Connecting);
        Self {
            server_id,
            state_tx,
            stats: Mutex::new(ConnStats::default()),
            channel: RwLock::new(None),
            idle_since: Mutex::new(None),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    pub fn channel(&self) -> Option<Arc<WireChannel>> {
        self.channel.read().clone()
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.stats.lock().consecutive_failures
    }

    pub fn last_error(&self) -> Option<String> {
        self.stats.lock().last_error.clone()
    }

    pub fn mark_connecting(&self) {
        self.stats.lock().last_attempt = Some(Instant::now());
        let _ = self.state_tx.send(ConnectionState::Connecting);
    }

    pub fn mark_ready(&self, channel: Arc<WireChannel>) {
        {
            let mut stats = self.stats.lock();
            stats.consecutive_failures = 0;
            stats.last_error = None;
            stats.connected_at = Some(Instant::now());
        }
        *self.channel.write() = Some(channel);
        let _ = self.state_tx.send(ConnectionState::Ready);
    }

    pub fn mark_degraded(&self, error: impl Into<String>) {
        self.stats.lock().last_error = Some(error.into());
        if let Some(channel) = self.channel.write().take() {
            channel.close();
        }
        let _ = self.state_tx.send(ConnectionState::Degraded);
    }

    /// Record a failed connection attempt; returns the new consecutive
    /// failure count.
    pub fn record_failure(&self, error: impl Into<String>) -> u32 {
        let mut stats = self.stats.lock();
        stats.consecutive_failures += 1;
        stats.last_error = Some(error.into());
        stats.consecutive_failures
    }

    pub fn mark_closed(&self) {
        if let Some(channel) = self.channel.write().take() {
            channel.close();
        }
        let _ = self.state_tx.send(ConnectionState::Closed);
    }

    /// Delay before the next reconnect attempt: exponential in the failure
    /// count, capped, with up to 25% jitter to spread thundering herds.
    pub fn next_backoff(&self, base: Duration, cap: Duration) -> Duration {
        let failures = self.stats.lock().consecutive_failures.min(16);
        let exp = base
            .checked_mul(1u32 << failures.saturating_sub(1).min(16))
            .unwrap_or(cap);
        let capped = exp.min(cap);
        let jitter = capped.mul_f64(rand::thread_rng().gen_range(0.0..0.25));
        capped + jitter
    }

    /// Block until the connection settles in `Ready` or `Closed`, or until
    /// the wait budget runs out (returning whatever state it is in then).
    pub async fn wait_until_settled(&self, budget: Duration) -> ConnectionState {
        let deadline = tokio::time::Instant::now() + budget;
        let mut rx = self.state_tx.subscribe();
        loop {
            let state = *rx.borrow_and_update();
            if matches!(state, ConnectionState::Ready | ConnectionState::Closed) {
                return state;
            }
            match tokio::time::timeout_at(deadline, rx.changed()).await {
                Ok(Ok(())) => continue,
                // Sender dropped or budget exhausted.
                Ok(Err(_)) | Err(_) => return *rx.borrow(),
            }
        }
    }

    /// Sweep bookkeeping: note that no session references this backend.
    /// Returns true once the idle period exceeds the grace window.
    pub fn note_idle(&self, now: Instant, grace: Duration) -> bool {
        let mut idle_since = self.idle_since.lock();
        match *idle_since {
            Some(since) => now.duration_since(since) > grace,
            None => {
                *idle_since = Some(now);
                false
            }
        }
    }

    pub fn clear_idle(&self) {
        *self.idle_since.lock() = None;
    }
}
