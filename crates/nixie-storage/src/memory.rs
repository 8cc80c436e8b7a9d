//! In-memory KV store
//!
//! Backs the registry in tests and single-node deployments. All state is
//! lost on restart.

use crate::stamp::VersionStampSource;
use crate::store::{KvStore, StoreTransaction, TxnMode};
use crate::tuple;
use async_trait::async_trait;
use bytes::Bytes;
use nixie_core::{Result, TimeProvider, WallClock};
use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

type Data = BTreeMap<Vec<u8>, Bytes>;

/// In-memory implementation of [`KvStore`]
pub struct MemoryStore {
    data: Arc<RwLock<Data>>,
    /// Serializes exclusive-mode transactions end to end.
    writer: Arc<Mutex<()>>,
    stamps: Arc<VersionStampSource>,
}

impl MemoryStore {
    /// Create a store on the production wall clock
    pub fn new() -> Self {
        Self::with_clock(Arc::new(WallClock::new()))
    }

    /// Create a store whose version stamps follow the given clock
    pub fn with_clock(time: Arc<dyn TimeProvider>) -> Self {
        Self {
            data: Arc::new(RwLock::new(BTreeMap::new())),
            writer: Arc::new(Mutex::new(())),
            stamps: Arc::new(VersionStampSource::new(time)),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn begin(&self, mode: TxnMode) -> Result<Box<dyn StoreTransaction>> {
        let permit = match mode {
            TxnMode::Exclusive => Some(self.writer.clone().lock_owned().await),
            TxnMode::Concurrent => None,
        };
        Ok(Box::new(MemoryTransaction {
            data: self.data.clone(),
            writes: BTreeMap::new(),
            stamps: self.stamps.clone(),
            stamp: OnceLock::new(),
            _permit: permit,
        }))
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }

    async fn unsafe_wipe_all(&self) -> Result<()> {
        self.data.write().await.clear();
        Ok(())
    }
}

struct MemoryTransaction {
    data: Arc<RwLock<Data>>,
    writes: Data,
    stamps: Arc<VersionStampSource>,
    stamp: OnceLock<i64>,
    _permit: Option<OwnedMutexGuard<()>>,
}

#[async_trait]
impl StoreTransaction for MemoryTransaction {
    async fn get(&self, key: &[u8]) -> Result<Option<Bytes>> {
        if let Some(value) = self.writes.get(key) {
            return Ok(Some(value.clone()));
        }
        Ok(self.data.read().await.get(key).cloned())
    }

    async fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Bytes)>> {
        let range_end = tuple::prefix_end(prefix);

        let mut merged: BTreeMap<Vec<u8>, Bytes> = {
            let data = self.data.read().await;
            match &range_end {
                Some(end) => data
                    .range(prefix.to_vec()..end.clone())
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect(),
                None => data
                    .range(prefix.to_vec()..)
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect(),
            }
        };
        for (key, value) in &self.writes {
            if key.starts_with(prefix) {
                merged.insert(key.clone(), value.clone());
            }
        }

        Ok(merged.into_iter().collect())
    }

    async fn put(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        self.writes
            .insert(key.to_vec(), Bytes::copy_from_slice(value));
        Ok(())
    }

    async fn version_stamp(&self) -> Result<i64> {
        Ok(*self.stamp.get_or_init(|| self.stamps.next()))
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let mut txn = *self;
        if !txn.writes.is_empty() {
            let mut data = txn.data.write().await;
            data.append(&mut txn.writes);
        }
        Ok(())
    }

    async fn cancel(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}
