//! Version-stamp source
//!
//! The only clock in the system. Stamps track the injected time provider
//! at microsecond resolution but never repeat or go backwards, even when
//! the underlying clock stalls or steps.

use nixie_core::TimeProvider;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

/// Strictly monotone stamp generator backed by a [`TimeProvider`]
#[derive(Debug)]
pub struct VersionStampSource {
    time: Arc<dyn TimeProvider>,
    last: AtomicI64,
}

impl VersionStampSource {
    pub fn new(time: Arc<dyn TimeProvider>) -> Self {
        Self {
            time,
            last: AtomicI64::new(0),
        }
    }

    /// Next stamp: `max(previous + 1, now_micros)`
    pub fn next(&self) -> i64 {
        let now = self.time.now_micros();
        let mut prev = self.last.load(Ordering::SeqCst);
        loop {
            let next = now.max(prev + 1);
            match self
                .last
                .compare_exchange_weak(prev, next, Ordering::SeqCst, Ordering::SeqCst)
            {
                Ok(_) => return next,
                Err(observed) => prev = observed,
            }
        }
    }
}
