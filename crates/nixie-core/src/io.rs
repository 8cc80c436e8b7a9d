//! Time abstraction
//!
//! Every TTL comparison, cache expiry, and the version-stamp source go
//! through [`TimeProvider`]. Production code uses [`WallClock`]; tests use
//! [`MockClock`] and advance it manually instead of sleeping through TTLs.

use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Time provider abstraction
///
/// Code that needs the current time or a sleep MUST use this trait rather
/// than `SystemTime::now()` / `tokio::time::sleep` directly.
#[async_trait]
pub trait TimeProvider: Send + Sync + std::fmt::Debug {
    /// Current time in microseconds since the Unix epoch
    fn now_micros(&self) -> i64;

    /// Current time in milliseconds since the Unix epoch
    fn now_ms(&self) -> u64 {
        (self.now_micros() / 1000).max(0) as u64
    }

    /// Sleep for the specified duration
    async fn sleep_ms(&self, ms: u64);
}

/// Production time provider using the system clock
#[derive(Debug, Clone, Default)]
pub struct WallClock;

impl WallClock {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl TimeProvider for WallClock {
    fn now_micros(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_micros() as i64)
            .unwrap_or(0)
    }

    async fn sleep_ms(&self, ms: u64) {
        tokio::time::sleep(std::time::Duration::from_millis(ms)).await;
    }
}

/// Manually advanced clock for tests
///
/// Sleepers park until `advance_ms` moves the clock past their deadline;
/// the clock itself never moves on its own.
#[derive(Debug)]
pub struct MockClock {
    micros: AtomicU64,
    advanced: tokio::sync::Notify,
}

impl MockClock {
    /// Create a mock clock starting at the given millisecond timestamp
    pub fn new(initial_ms: u64) -> Arc<Self> {
        Arc::new(Self {
            micros: AtomicU64::new(initial_ms * 1000),
            advanced: tokio::sync::Notify::new(),
        })
    }

    /// Advance the clock by the given number of milliseconds, waking any
    /// sleeper whose deadline has passed
    pub fn advance_ms(&self, ms: u64) {
        self.micros.fetch_add(ms * 1000, Ordering::SeqCst);
        self.advanced.notify_waiters();
    }

    /// Advance the clock by the given number of microseconds
    pub fn advance_micros(&self, micros: u64) {
        self.micros.fetch_add(micros, Ordering::SeqCst);
        self.advanced.notify_waiters();
    }
}

#[async_trait]
impl TimeProvider for MockClock {
    fn now_micros(&self) -> i64 {
        self.micros.load(Ordering::SeqCst) as i64
    }

    async fn sleep_ms(&self, ms: u64) {
        let deadline = self.micros.load(Ordering::SeqCst) + ms * 1000;
        loop {
            // Register for the wakeup before re-checking the clock so an
            // advance between the two cannot be missed.
            let advanced = self.advanced.notified();
            if self.micros.load(Ordering::SeqCst) >= deadline {
                return;
            }
            advanced.await;
        }
    }
}
