//! Nixie Storage
//!
//! Transactional key/value primitives backing the registry.
//!
//! # Overview
//!
//! The registry persists modules, actor records, per-actor KV entries, and
//! server records through the [`KvStore`] / [`StoreTransaction`] seam
//! defined here. Keys are tuple-packed ([`tuple`]) so related records share
//! a byte prefix and can be range-scanned in order. The store also supplies
//! the cluster's only clock: a strictly monotone version stamp advancing at
//! roughly one tick per microsecond ([`VersionStampSource`]).
//!
//! [`MemoryStore`] is the in-process implementation used by tests and
//! single-node deployments; durable backends plug in behind the same
//! traits.

mod memory;
mod stamp;
mod store;
pub mod tuple;

pub use memory::MemoryStore;
pub use stamp::VersionStampSource;
pub use store::{KvStore, StoreTransaction, TxnMode};
