//! Nixie Registry
//!
//! The authoritative, transactional side of the cluster: maps actors to
//! current activations, tracks live servers via heartbeats, supplies the
//! monotone version stamp, and arbitrates per-actor KV transactions with a
//! fencing token.
//!
//! # Overview
//!
//! - [`Registry`] is the interface environments program against.
//! - [`KvRegistry`] implements it on top of any
//!   [`nixie_storage::KvStore`]; an in-memory store serves tests and
//!   single-node deployments, durable backends plug in behind the same
//!   seam.
//! - [`ActorKvTxn`] is the per-actor transactional KV handle given to
//!   running actors; opening one is fenced by the actor's current
//!   `(server_id, server_version)` activation tuple.
//!
//! # Guarantees
//!
//! - Single activation: at most one `(server_id, server_version)` owns an
//!   actor at any version stamp.
//! - Generation monotonicity: an actor's generation only increases.
//! - Fencing: actor KV transactions succeed only from the owning server
//!   incarnation.

mod batcher;
mod kv_registry;
mod registry;

pub use kv_registry::KvRegistry;
pub use registry::{ActorKvTxn, HeartbeatResult, HeartbeatState, Registry};
