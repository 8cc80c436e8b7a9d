//! Store and transaction traits
//!
//! The registry talks to its backing store exclusively through these
//! traits. Two transaction modes exist:
//!
//! - [`TxnMode::Exclusive`]: registry metadata mutations. The store
//!   serializes these (single writer), so read-modify-write sequences such
//!   as generation bumps and placement decisions are atomic and isolated.
//! - [`TxnMode::Concurrent`]: per-actor KV transactions. These may stay
//!   open across user code and nested invocations, so they must not hold
//!   the writer slot; isolation for actor keys comes from the activation
//!   fencing check performed when the transaction is opened.

use async_trait::async_trait;
use bytes::Bytes;
use nixie_core::Result;

/// Isolation mode for a store transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnMode {
    /// Serialized with every other exclusive transaction
    Exclusive,
    /// Buffered writes, no writer slot held while open
    Concurrent,
}

/// A single transaction against the store
///
/// Writes are buffered (read-your-writes) and applied atomically on
/// `commit`; `cancel` discards them. Every transaction must be terminated
/// by exactly one of `commit` or `cancel`.
#[async_trait]
pub trait StoreTransaction: Send + Sync {
    /// Read a key, observing this transaction's own buffered writes
    async fn get(&self, key: &[u8]) -> Result<Option<Bytes>>;

    /// Buffer a write
    async fn put(&mut self, key: &[u8], value: &[u8]) -> Result<()>;

    /// Scan all keys sharing `prefix`, in key order, observing buffered
    /// writes
    async fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Bytes)>>;

    /// The transaction's version stamp: a strictly monotone cluster-wide
    /// counter advancing at ~1 tick per microsecond. Stable within one
    /// transaction; later transactions observe strictly larger values.
    async fn version_stamp(&self) -> Result<i64>;

    /// Apply all buffered writes atomically
    async fn commit(self: Box<Self>) -> Result<()>;

    /// Discard all buffered writes
    async fn cancel(self: Box<Self>) -> Result<()>;
}

/// The store seam behind the registry
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Begin a transaction in the given mode
    async fn begin(&self, mode: TxnMode) -> Result<Box<dyn StoreTransaction>>;

    /// Release any resources associated with the store
    async fn close(&self) -> Result<()>;

    /// Wipe the entire store. Test-only; never call in production code.
    async fn unsafe_wipe_all(&self) -> Result<()>;
}
