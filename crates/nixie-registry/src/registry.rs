//! Registry trait and wire types

use async_trait::async_trait;
use bytes::Bytes;
use nixie_core::{ActorOptions, ActorReference, ModuleOptions, Result};
use serde::{Deserialize, Serialize};

/// Server state accompanying a heartbeat
///
/// The registry load-balances new activations with this; a server that
/// reports fewer activated actors receives more placements.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatState {
    /// Number of actors currently activated on the server
    pub num_activated_actors: u64,
    /// Address at which the server can be reached
    pub address: String,
}

/// Result of a successful heartbeat
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeartbeatResult {
    /// Version stamp observed by the heartbeat transaction
    pub version_stamp: i64,
    /// Heartbeat TTL in version-stamp ticks (~microseconds)
    pub heartbeat_ttl: i64,
    /// The server's current incarnation. Incremented whenever the server's
    /// heartbeat lapses past the TTL and later resumes; this is the fencing
    /// token for "the server lost and regained ownership".
    pub server_version: i64,
}

/// Transactional KV handle scoped to one actor
///
/// Obtained from [`Registry::begin_transaction`]; all keys are isolated to
/// the owning `(namespace, actor_id)`. Must be terminated by exactly one of
/// `commit` or `cancel`.
#[async_trait]
pub trait ActorKvTxn: Send {
    async fn get(&self, key: &[u8]) -> Result<Option<Bytes>>;
    async fn put(&mut self, key: &[u8], value: &[u8]) -> Result<()>;
    async fn commit(self: Box<Self>) -> Result<()>;
    async fn cancel(self: Box<Self>) -> Result<()>;
}

/// The virtual actor registry
///
/// Implementations must make every method atomic against the backing
/// store: either all of its effects are visible or none are.
#[async_trait]
pub trait Registry: Send + Sync {
    /// Register `module_bytes` under `(namespace, module_id)` for
    /// subsequent calls to `create_actor`.
    ///
    /// Fails if the module already exists, unless
    /// `opts.allow_empty_bytes` is set, in which case re-registration is
    /// idempotent (the module body is supplied by the embedding program).
    async fn register_module(
        &self,
        namespace: &str,
        module_id: &str,
        module_bytes: Bytes,
        opts: ModuleOptions,
    ) -> Result<()>;

    /// Fetch the bytes and options registered for a module
    async fn get_module(&self, namespace: &str, module_id: &str) -> Result<(Bytes, ModuleOptions)>;

    /// Create a new actor from an existing module
    ///
    /// The actor starts at generation 1 with no activation.
    async fn create_actor(
        &self,
        namespace: &str,
        actor_id: &str,
        module_id: &str,
        opts: ActorOptions,
    ) -> Result<()>;

    /// Increment the actor's generation, invalidating every outstanding
    /// activation of it
    async fn inc_generation(&self, namespace: &str, actor_id: &str) -> Result<()>;

    /// Return references to the actor's current activation, assigning one
    /// on a live server if none exists or the owner stopped heartbeating
    ///
    /// The returned list always has at least one element; extra elements
    /// are alternates, not concurrent targets. Assignment is lazy: the
    /// actor is instantiated when the chosen server receives its first
    /// invocation.
    async fn ensure_activation(
        &self,
        namespace: &str,
        actor_id: &str,
    ) -> Result<Vec<ActorReference>>;

    /// Record a server heartbeat
    ///
    /// Servers must heartbeat within the TTL to stay eligible for
    /// placement. A heartbeat arriving after a gap of at least the TTL
    /// increments the server's `server_version`.
    async fn heartbeat(&self, server_id: &str, state: HeartbeatState) -> Result<HeartbeatResult>;

    /// Begin a transaction against the actor's KV storage
    ///
    /// `(server_id, server_version)` must match the actor's current
    /// activation tuple; the fencing check is what makes actor KV storage
    /// linearizable despite server failover.
    async fn begin_transaction(
        &self,
        namespace: &str,
        actor_id: &str,
        server_id: &str,
        server_version: i64,
    ) -> Result<Box<dyn ActorKvTxn>>;

    /// The monotone cluster-wide version stamp (~1 tick per microsecond)
    async fn get_version_stamp(&self) -> Result<i64>;

    /// Release resources held by the registry
    async fn close(&self) -> Result<()>;

    /// Wipe the entire registry. Test-only; never call in production code.
    async fn unsafe_wipe_all(&self) -> Result<()>;
}
