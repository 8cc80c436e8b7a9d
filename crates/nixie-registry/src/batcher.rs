//! Version-stamp batcher
//!
//! `get_version_stamp` is on the critical path of every invocation.
//! Caching it would be a correctness hazard, so instead concurrent callers
//! are coalesced: a single outstanding store read serves every waiter that
//! arrives while it is in flight, and the next caller after completion
//! starts a fresh read. The effect is a zero-TTL cache with none of the
//! staleness.

use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use nixie_core::{Error, Result};
use std::sync::{Arc, Mutex};

type SharedRead = Shared<BoxFuture<'static, std::result::Result<i64, Arc<Error>>>>;

pub(crate) struct VersionStampBatcher {
    inflight: Mutex<Option<SharedRead>>,
}

impl VersionStampBatcher {
    pub(crate) fn new() -> Self {
        Self {
            inflight: Mutex::new(None),
        }
    }

    /// Read a version stamp, attaching to the in-flight read if one exists
    pub(crate) async fn read<F>(&self, fetch: F) -> Result<i64>
    where
        F: FnOnce() -> BoxFuture<'static, std::result::Result<i64, Arc<Error>>>,
    {
        let read = {
            let mut inflight = self.inflight.lock().expect("batcher lock poisoned");
            match inflight.as_ref() {
                Some(read) => read.clone(),
                None => {
                    let read = fetch().shared();
                    *inflight = Some(read.clone());
                    read
                }
            }
        };

        let result = read.clone().await;

        // Whoever observes completion clears the slot so the next caller
        // starts a fresh read. Only clear our own read; a newer one may
        // already be registered.
        {
            let mut inflight = self.inflight.lock().expect("batcher lock poisoned");
            if let Some(current) = inflight.as_ref() {
                if current.ptr_eq(&read) {
                    *inflight = None;
                }
            }
        }

        result.map_err(|e| Error::storage(e.to_string()))
    }
}
