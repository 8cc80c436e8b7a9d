//! KV-backed registry
//!
//! Persists modules, actor records, and server records through the
//! `nixie-storage` seam. Every operation runs inside a single store
//! transaction; any error aborts it.
//!
//! Key layout (tuple-packed):
//!
//! - `(ns, "modules", module_id, part)`: module bytes, sharded
//! - `(ns, "actors", actor_id, "state")`: serialized actor record
//! - `(ns, "actors", actor_id, "kv", user_key)`: actor KV entries
//! - `("servers", server_id)`: serialized server record

use crate::batcher::VersionStampBatcher;
use crate::registry::{ActorKvTxn, HeartbeatResult, HeartbeatState, Registry};
use async_trait::async_trait;
use bytes::Bytes;
use futures::FutureExt;
use nixie_core::constants::{HEARTBEAT_TTL_MICROS, MODULE_PART_SIZE_BYTES_MAX};
use nixie_core::{
    ActorId, ActorOptions, ActorReference, Error, ModuleId, ModuleOptions, Result, VirtualRef,
};
use nixie_storage::{tuple, KvStore, StoreTransaction, TxnMode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::instrument;

// =============================================================================
// Persisted records
// =============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct RegisteredModule {
    bytes: Vec<u8>,
    opts: ModuleOptions,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RegisteredActor {
    opts: ActorOptions,
    module_id: String,
    generation: u64,
    #[serde(default)]
    activation: Activation,
}

/// The actor's current placement. Empty `server_id` means unplaced.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Activation {
    server_id: String,
    server_version: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct ServerRecord {
    server_id: String,
    last_heartbeated_at: i64,
    heartbeat_state: HeartbeatState,
    server_version: i64,
}

// =============================================================================
// Key helpers
// =============================================================================

fn module_prefix(namespace: &str, module_id: &str) -> Vec<u8> {
    tuple::pack(&[namespace.into(), "modules".into(), module_id.into()])
}

fn module_part_key(namespace: &str, module_id: &str, part: u64) -> Vec<u8> {
    tuple::pack(&[
        namespace.into(),
        "modules".into(),
        module_id.into(),
        part.into(),
    ])
}

fn actor_key(namespace: &str, actor_id: &str) -> Vec<u8> {
    tuple::pack(&[
        namespace.into(),
        "actors".into(),
        actor_id.into(),
        "state".into(),
    ])
}

fn actor_kv_key(namespace: &str, actor_id: &str, key: &[u8]) -> Vec<u8> {
    tuple::pack(&[
        namespace.into(),
        "actors".into(),
        actor_id.into(),
        "kv".into(),
        key.into(),
    ])
}

fn server_key(server_id: &str) -> Vec<u8> {
    tuple::pack(&["servers".into(), server_id.into()])
}

fn servers_prefix() -> Vec<u8> {
    tuple::pack(&["servers".into()])
}

// =============================================================================
// KvRegistry
// =============================================================================

/// Registry implementation over a transactional KV store
pub struct KvRegistry {
    store: Arc<dyn KvStore>,
    batcher: VersionStampBatcher,
    heartbeat_ttl: i64,
}

impl KvRegistry {
    /// Create a registry with the default heartbeat TTL
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self::with_heartbeat_ttl(store, HEARTBEAT_TTL_MICROS)
    }

    /// Create a registry with a custom heartbeat TTL in version-stamp
    /// ticks (~microseconds). Shorter TTLs keep failover tests fast.
    pub fn with_heartbeat_ttl(store: Arc<dyn KvStore>, heartbeat_ttl: i64) -> Self {
        assert!(heartbeat_ttl > 0, "heartbeat ttl must be positive");
        Self {
            store,
            batcher: VersionStampBatcher::new(),
            heartbeat_ttl,
        }
    }

    async fn get_actor(
        txn: &dyn StoreTransaction,
        namespace: &str,
        actor_id: &str,
    ) -> Result<Option<RegisteredActor>> {
        match txn.get(&actor_key(namespace, actor_id)).await? {
            Some(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
            None => Ok(None),
        }
    }

    async fn put_actor(
        txn: &mut dyn StoreTransaction,
        namespace: &str,
        actor_id: &str,
        record: &RegisteredActor,
    ) -> Result<()> {
        let marshaled = serde_json::to_vec(record)?;
        txn.put(&actor_key(namespace, actor_id), &marshaled).await
    }

    /// Elapsed version-stamp ticks between two stamps from the same source
    fn version_since(curr: i64, prev: i64) -> i64 {
        debug_assert!(
            curr >= prev,
            "version stamp did not increase monotonically: prev={prev}, curr={curr}"
        );
        curr - prev
    }
}

#[async_trait]
impl Registry for KvRegistry {
    #[instrument(skip(self, module_bytes, opts), level = "debug")]
    async fn register_module(
        &self,
        namespace: &str,
        module_id: &str,
        module_bytes: Bytes,
        opts: ModuleOptions,
    ) -> Result<()> {
        let mut txn = self.store.begin(TxnMode::Exclusive).await?;

        let existing = txn.get(&module_part_key(namespace, module_id, 0)).await;
        let outcome = match existing {
            Err(e) => Err(e),
            Ok(Some(_)) if opts.allow_empty_bytes => {
                // The module body lives in the embedding program, so the
                // record already existing is success: this makes start-up
                // re-registration of in-process modules idempotent.
                Ok(())
            }
            Ok(Some(_)) => Err(Error::ModuleAlreadyExists {
                namespace: namespace.to_string(),
                module_id: module_id.to_string(),
            }),
            Ok(None) => {
                // Values larger than the store's per-value limit are split
                // over multiple parts and reassembled on read.
                let write = async {
                    let record = RegisteredModule {
                        bytes: module_bytes.to_vec(),
                        opts,
                    };
                    let marshaled = serde_json::to_vec(&record)?;

                    let mut rest = marshaled.as_slice();
                    let mut part = 0u64;
                    loop {
                        let take = rest.len().min(MODULE_PART_SIZE_BYTES_MAX);
                        txn.put(&module_part_key(namespace, module_id, part), &rest[..take])
                            .await?;
                        rest = &rest[take..];
                        part += 1;
                        if rest.is_empty() {
                            break;
                        }
                    }
                    Ok(())
                };
                write.await
            }
        };

        match outcome {
            Ok(()) => txn.commit().await,
            Err(e) => {
                let _ = txn.cancel().await;
                Err(e)
            }
        }
    }

    #[instrument(skip(self), level = "debug")]
    async fn get_module(&self, namespace: &str, module_id: &str) -> Result<(Bytes, ModuleOptions)> {
        let txn = self.store.begin(TxnMode::Exclusive).await?;

        let outcome = async {
            let parts = txn.scan_prefix(&module_prefix(namespace, module_id)).await?;
            if parts.is_empty() {
                return Err(Error::module_not_found(namespace, module_id));
            }
            let mut marshaled = Vec::new();
            for (_, value) in parts {
                marshaled.extend_from_slice(&value);
            }
            let record: RegisteredModule = serde_json::from_slice(&marshaled)?;
            Ok((Bytes::from(record.bytes), record.opts))
        }
        .await;

        match outcome {
            Ok(result) => {
                txn.commit().await?;
                Ok(result)
            }
            Err(e) => {
                let _ = txn.cancel().await;
                Err(e)
            }
        }
    }

    #[instrument(skip(self, opts), level = "debug")]
    async fn create_actor(
        &self,
        namespace: &str,
        actor_id: &str,
        module_id: &str,
        opts: ActorOptions,
    ) -> Result<()> {
        let mut txn = self.store.begin(TxnMode::Exclusive).await?;

        let outcome = async {
            if Self::get_actor(&*txn, namespace, actor_id).await?.is_some() {
                return Err(Error::ActorAlreadyExists {
                    namespace: namespace.to_string(),
                    actor_id: actor_id.to_string(),
                });
            }
            if txn
                .get(&module_part_key(namespace, module_id, 0))
                .await?
                .is_none()
            {
                return Err(Error::module_not_found(namespace, module_id));
            }
            let record = RegisteredActor {
                opts,
                module_id: module_id.to_string(),
                generation: 1,
                activation: Activation::default(),
            };
            Self::put_actor(&mut *txn, namespace, actor_id, &record).await
        }
        .await;

        match outcome {
            Ok(()) => txn.commit().await,
            Err(e) => {
                let _ = txn.cancel().await;
                Err(e)
            }
        }
    }

    #[instrument(skip(self), level = "debug")]
    async fn inc_generation(&self, namespace: &str, actor_id: &str) -> Result<()> {
        let mut txn = self.store.begin(TxnMode::Exclusive).await?;

        let outcome = async {
            let mut record = Self::get_actor(&*txn, namespace, actor_id)
                .await?
                .ok_or_else(|| Error::actor_not_found(namespace, actor_id))?;
            record.generation += 1;
            Self::put_actor(&mut *txn, namespace, actor_id, &record).await
        }
        .await;

        match outcome {
            Ok(()) => txn.commit().await,
            Err(e) => {
                let _ = txn.cancel().await;
                Err(e)
            }
        }
    }

    #[instrument(skip(self), level = "debug")]
    async fn ensure_activation(
        &self,
        namespace: &str,
        actor_id: &str,
    ) -> Result<Vec<ActorReference>> {
        let heartbeat_ttl = self.heartbeat_ttl;
        let mut txn = self.store.begin(TxnMode::Exclusive).await?;

        let outcome = async {
            let mut record = Self::get_actor(&*txn, namespace, actor_id)
                .await?
                .ok_or_else(|| Error::actor_not_found(namespace, actor_id))?;

            let existing_server: Option<ServerRecord> =
                if record.activation.server_id.is_empty() {
                    None
                } else {
                    match txn.get(&server_key(&record.activation.server_id)).await? {
                        Some(raw) => Some(serde_json::from_slice(&raw)?),
                        None => None,
                    }
                };

            let vs = txn.version_stamp().await?;

            let (server_id, server_version, address) = match existing_server {
                // The current owner is still heartbeating, so keep the
                // activation where it is. Reading server_version from the
                // live server record is safe: while the activation is
                // current the server cannot have died and returned, which
                // would have required a TTL-expiring gap.
                Some(server)
                    if Self::version_since(vs, server.last_heartbeated_at) < heartbeat_ttl =>
                {
                    (
                        record.activation.server_id.clone(),
                        server.server_version,
                        server.heartbeat_state.address,
                    )
                }
                _ => {
                    // New activation: place on the live server with the
                    // fewest activated actors; ties break on server ID so
                    // placement is deterministic within one transaction.
                    let mut live: Vec<ServerRecord> = Vec::new();
                    for (_, raw) in txn.scan_prefix(&servers_prefix()).await? {
                        let server: ServerRecord = serde_json::from_slice(&raw)?;
                        if Self::version_since(vs, server.last_heartbeated_at) < heartbeat_ttl {
                            live.push(server);
                        }
                    }
                    if live.is_empty() {
                        return Err(Error::NoLiveServers);
                    }
                    live.sort_by(|a, b| {
                        (a.heartbeat_state.num_activated_actors, &a.server_id)
                            .cmp(&(b.heartbeat_state.num_activated_actors, &b.server_id))
                    });

                    let picked = &live[0];
                    record.activation = Activation {
                        server_id: picked.server_id.clone(),
                        server_version: picked.server_version,
                    };
                    Self::put_actor(&mut *txn, namespace, actor_id, &record).await?;

                    (
                        picked.server_id.clone(),
                        picked.server_version,
                        picked.heartbeat_state.address.clone(),
                    )
                }
            };

            let vref = VirtualRef::actor(
                ModuleId::new(namespace, &record.module_id)?,
                ActorId::new(namespace, actor_id)?,
                record.generation,
            )?;
            let reference = ActorReference::new(server_id, server_version, address, vref)?;
            Ok(vec![reference])
        }
        .await;

        match outcome {
            Ok(references) => {
                txn.commit().await?;
                Ok(references)
            }
            Err(e) => {
                let _ = txn.cancel().await;
                Err(e)
            }
        }
    }

    #[instrument(skip(self, state), level = "debug")]
    async fn heartbeat(&self, server_id: &str, state: HeartbeatState) -> Result<HeartbeatResult> {
        let heartbeat_ttl = self.heartbeat_ttl;
        let mut txn = self.store.begin(TxnMode::Exclusive).await?;

        let outcome = async {
            let vs = txn.version_stamp().await?;

            let mut record = match txn.get(&server_key(server_id)).await? {
                Some(raw) => serde_json::from_slice::<ServerRecord>(&raw)?,
                None => ServerRecord {
                    server_id: server_id.to_string(),
                    last_heartbeated_at: vs,
                    heartbeat_state: HeartbeatState::default(),
                    server_version: 1,
                },
            };

            // A heartbeat arriving after a TTL-expiring gap means the
            // server was considered dead in between: bump its incarnation
            // so references minted against the old one are fenced out.
            if Self::version_since(vs, record.last_heartbeated_at) >= heartbeat_ttl {
                record.server_version += 1;
            }

            record.last_heartbeated_at = vs;
            record.heartbeat_state = state;

            let marshaled = serde_json::to_vec(&record)?;
            txn.put(&server_key(server_id), &marshaled).await?;

            Ok(HeartbeatResult {
                version_stamp: vs,
                heartbeat_ttl,
                server_version: record.server_version,
            })
        }
        .await;

        match outcome {
            Ok(result) => {
                txn.commit().await?;
                Ok(result)
            }
            Err(e) => {
                let _ = txn.cancel().await;
                Err(e)
            }
        }
    }

    async fn begin_transaction(
        &self,
        namespace: &str,
        actor_id: &str,
        server_id: &str,
        server_version: i64,
    ) -> Result<Box<dyn ActorKvTxn>> {
        let txn = self.store.begin(TxnMode::Concurrent).await?;

        let validation = async {
            let record = Self::get_actor(&*txn, namespace, actor_id)
                .await?
                .ok_or_else(|| Error::actor_not_found(namespace, actor_id))?;

            // The (server_id, server_version) tuple is the fencing token
            // for all actor KV operations: an actor is only ever activated
            // on one server at a time, so KV stays linearizable as long as
            // the transacting server is the one owning the activation.
            if record.activation.server_id != server_id
                || record.activation.server_version != server_version
            {
                return Err(Error::FencingMismatch {
                    actor_id: actor_id.to_string(),
                    activation_server_id: record.activation.server_id,
                    activation_server_version: record.activation.server_version,
                    caller_server_id: server_id.to_string(),
                    caller_server_version: server_version,
                });
            }
            Ok(())
        }
        .await;

        match validation {
            Ok(()) => Ok(Box::new(KvTransaction {
                namespace: namespace.to_string(),
                actor_id: actor_id.to_string(),
                txn,
            })),
            Err(e) => {
                let _ = txn.cancel().await;
                Err(e)
            }
        }
    }

    async fn get_version_stamp(&self) -> Result<i64> {
        let store = self.store.clone();
        self.batcher
            .read(move || {
                async move {
                    let txn = store
                        .begin(TxnMode::Exclusive)
                        .await
                        .map_err(Arc::new)?;
                    let vs = match txn.version_stamp().await {
                        Ok(vs) => vs,
                        Err(e) => {
                            let _ = txn.cancel().await;
                            return Err(Arc::new(e));
                        }
                    };
                    txn.commit().await.map_err(Arc::new)?;
                    Ok(vs)
                }
                .boxed()
            })
            .await
    }

    async fn close(&self) -> Result<()> {
        self.store.close().await
    }

    async fn unsafe_wipe_all(&self) -> Result<()> {
        self.store.unsafe_wipe_all().await
    }
}

// =============================================================================
// Actor KV transaction
// =============================================================================

/// Actor-scoped view over one store transaction
struct KvTransaction {
    namespace: String,
    actor_id: String,
    txn: Box<dyn StoreTransaction>,
}

#[async_trait]
impl ActorKvTxn for KvTransaction {
    async fn get(&self, key: &[u8]) -> Result<Option<Bytes>> {
        self.txn
            .get(&actor_kv_key(&self.namespace, &self.actor_id, key))
            .await
    }

    async fn put(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        self.txn
            .put(&actor_kv_key(&self.namespace, &self.actor_id, key), value)
            .await
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.txn.commit().await
    }

    async fn cancel(self: Box<Self>) -> Result<()> {
        self.txn.cancel().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nixie_core::MockClock;
    use nixie_storage::MemoryStore;

    fn registry() -> KvRegistry {
        KvRegistry::new(Arc::new(MemoryStore::new()))
    }

    fn registry_with_clock(clock: Arc<MockClock>) -> KvRegistry {
        KvRegistry::new(Arc::new(MemoryStore::with_clock(clock)))
    }

    fn wasm() -> Bytes {
        Bytes::from_static(b"wasm")
    }

    #[tokio::test]
    async fn test_register_module_and_create_actor() {
        let registry = registry();

        registry
            .register_module("ns1", "test-module", wasm(), ModuleOptions::default())
            .await
            .unwrap();

        // Same module in the same namespace fails.
        let err = registry
            .register_module("ns1", "test-module", wasm(), ModuleOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ModuleAlreadyExists { .. }));

        // Same module in a different namespace succeeds.
        registry
            .register_module("ns2", "test-module", wasm(), ModuleOptions::default())
            .await
            .unwrap();

        // Unknown module fails actor creation.
        let err = registry
            .create_actor("ns1", "a", "unknown-module", ActorOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ModuleNotFound { .. }));

        registry
            .create_actor("ns1", "a", "test-module", ActorOptions::default())
            .await
            .unwrap();

        // Duplicate actor in the same namespace fails.
        let err = registry
            .create_actor("ns1", "a", "test-module", ActorOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ActorAlreadyExists { .. }));

        // Same actor ID in a different namespace succeeds.
        registry
            .create_actor("ns2", "a", "test-module", ActorOptions::default())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_register_module_idempotent_with_allow_empty_bytes() {
        let registry = registry();
        let opts = ModuleOptions {
            allow_empty_bytes: true,
        };

        registry
            .register_module("ns1", "in-proc", Bytes::new(), opts.clone())
            .await
            .unwrap();
        // Re-registration on process restart must be a no-op success.
        registry
            .register_module("ns1", "in-proc", Bytes::new(), opts)
            .await
            .unwrap();

        let (bytes, opts) = registry.get_module("ns1", "in-proc").await.unwrap();
        assert!(bytes.is_empty());
        assert!(opts.allow_empty_bytes);
    }

    #[tokio::test]
    async fn test_large_module_bytes_sharded_and_reassembled() {
        let registry = registry();

        let big = Bytes::from(vec![0xAB; MODULE_PART_SIZE_BYTES_MAX * 3 + 17]);
        registry
            .register_module("ns1", "big", big.clone(), ModuleOptions::default())
            .await
            .unwrap();

        let (bytes, _) = registry.get_module("ns1", "big").await.unwrap();
        assert_eq!(bytes, big);
    }

    #[tokio::test]
    async fn test_get_module_not_found() {
        let registry = registry();
        let err = registry.get_module("ns1", "nope").await.unwrap_err();
        assert!(matches!(err, Error::ModuleNotFound { .. }));
    }

    #[tokio::test]
    async fn test_service_discovery_and_ensure_activation() {
        let clock = MockClock::new(1_000);
        let registry = registry_with_clock(clock.clone());

        registry
            .register_module("ns1", "test-module", wasm(), ModuleOptions::default())
            .await
            .unwrap();

        // Actor does not exist yet.
        let err = registry.ensure_activation("ns1", "a").await.unwrap_err();
        assert!(err.is_actor_not_found());

        registry
            .create_actor("ns1", "a", "test-module", ActorOptions::default())
            .await
            .unwrap();

        // No servers available.
        let err = registry.ensure_activation("ns1", "a").await.unwrap_err();
        assert!(matches!(err, Error::NoLiveServers));
        assert!(!err.is_actor_not_found());

        let hb1 = registry
            .heartbeat(
                "server1",
                HeartbeatState {
                    num_activated_actors: 10,
                    address: "server1_address".to_string(),
                },
            )
            .await
            .unwrap();
        assert!(hb1.version_stamp > 0);
        assert_eq!(hb1.heartbeat_ttl, HEARTBEAT_TTL_MICROS);
        assert_eq!(hb1.server_version, 1);

        let refs = registry.ensure_activation("ns1", "a").await.unwrap();
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].server_id(), "server1");
        assert_eq!(refs[0].address(), "server1_address");
        assert_eq!(refs[0].namespace(), "ns1");
        assert_eq!(refs[0].module_id().id(), "test-module");
        assert_eq!(refs[0].actor_id().id(), "a");
        assert_eq!(refs[0].generation(), 1);

        // Generation bump is reflected in subsequent references.
        registry.inc_generation("ns1", "a").await.unwrap();
        let refs = registry.ensure_activation("ns1", "a").await.unwrap();
        assert_eq!(refs[0].generation(), 2);

        // Another server joins with no activations.
        let hb2 = registry
            .heartbeat(
                "server2",
                HeartbeatState {
                    num_activated_actors: 0,
                    address: "server2_address".to_string(),
                },
            )
            .await
            .unwrap();
        assert!(hb2.version_stamp > hb1.version_stamp);

        // The existing activation stays sticky to server1.
        for _ in 0..10 {
            let refs = registry.ensure_activation("ns1", "a").await.unwrap();
            assert_eq!(refs[0].server_id(), "server1");
        }

        // New activations go to server2 until the load evens out.
        for i in 0..10u64 {
            let actor_id = format!("0-{i}");
            registry
                .create_actor("ns1", &actor_id, "test-module", ActorOptions::default())
                .await
                .unwrap();
            let refs = registry.ensure_activation("ns1", &actor_id).await.unwrap();
            assert_eq!(refs[0].server_id(), "server2");

            registry
                .heartbeat(
                    "server2",
                    HeartbeatState {
                        num_activated_actors: i + 1,
                        address: "server2_address".to_string(),
                    },
                )
                .await
                .unwrap();
        }

        // With counts even, placements alternate as each pick is
        // heartbeated back with one more actor.
        let mut last_server = String::new();
        for i in 0..10u64 {
            let actor_id = format!("1-{i}");
            registry
                .create_actor("ns1", &actor_id, "test-module", ActorOptions::default())
                .await
                .unwrap();
            let refs = registry.ensure_activation("ns1", &actor_id).await.unwrap();
            let picked = refs[0].server_id().to_string();

            if last_server == "server1" {
                assert_eq!(picked, "server2");
            } else if last_server == "server2" {
                assert_eq!(picked, "server1");
            }

            registry
                .heartbeat(
                    &picked,
                    HeartbeatState {
                        num_activated_actors: 10 + i + 1,
                        address: format!("{picked}_address"),
                    },
                )
                .await
                .unwrap();
            last_server = picked;
        }

        // Let server1's heartbeat expire; only server2 stays eligible even
        // with a huge reported actor count.
        clock.advance_ms(6_000);
        registry
            .heartbeat(
                "server2",
                HeartbeatState {
                    num_activated_actors: 9_999_999,
                    address: "server2_address".to_string(),
                },
            )
            .await
            .unwrap();

        for i in 0..10u64 {
            let actor_id = format!("2-{i}");
            registry
                .create_actor("ns1", &actor_id, "test-module", ActorOptions::default())
                .await
                .unwrap();
            let refs = registry.ensure_activation("ns1", &actor_id).await.unwrap();
            assert_eq!(refs[0].server_id(), "server2");
        }
    }

    #[tokio::test]
    async fn test_failover_reassigns_dead_server_activation() {
        let clock = MockClock::new(1_000);
        let registry = registry_with_clock(clock.clone());

        registry
            .register_module("ns1", "m", wasm(), ModuleOptions::default())
            .await
            .unwrap();
        registry
            .create_actor("ns1", "a", "m", ActorOptions::default())
            .await
            .unwrap();

        registry
            .heartbeat(
                "server1",
                HeartbeatState {
                    num_activated_actors: 0,
                    address: "addr1".to_string(),
                },
            )
            .await
            .unwrap();
        let refs = registry.ensure_activation("ns1", "a").await.unwrap();
        assert_eq!(refs[0].server_id(), "server1");

        // server1 stops heartbeating; server2 takes over after the TTL.
        clock.advance_ms(6_000);
        registry
            .heartbeat(
                "server2",
                HeartbeatState {
                    num_activated_actors: 0,
                    address: "addr2".to_string(),
                },
            )
            .await
            .unwrap();

        let refs = registry.ensure_activation("ns1", "a").await.unwrap();
        assert_eq!(refs[0].server_id(), "server2");
    }

    #[tokio::test]
    async fn test_heartbeat_gap_bumps_server_version() {
        let clock = MockClock::new(1_000);
        let registry = registry_with_clock(clock.clone());

        let hb = registry
            .heartbeat("s", HeartbeatState::default())
            .await
            .unwrap();
        assert_eq!(hb.server_version, 1);

        // Within the TTL the incarnation is stable.
        clock.advance_ms(1_000);
        let hb = registry
            .heartbeat("s", HeartbeatState::default())
            .await
            .unwrap();
        assert_eq!(hb.server_version, 1);

        // A gap of at least the TTL bumps it.
        clock.advance_ms(6_000);
        let hb = registry
            .heartbeat("s", HeartbeatState::default())
            .await
            .unwrap();
        assert_eq!(hb.server_version, 2);

        clock.advance_ms(6_000);
        let hb = registry
            .heartbeat("s", HeartbeatState::default())
            .await
            .unwrap();
        assert_eq!(hb.server_version, 3);
    }

    #[tokio::test]
    async fn test_version_stamp_monotonic() {
        let registry = registry();
        let v1 = registry.get_version_stamp().await.unwrap();
        let v2 = registry.get_version_stamp().await.unwrap();
        assert!(v2 >= v1);
    }

    #[tokio::test]
    async fn test_begin_transaction_fencing() {
        let registry = registry();

        // Actor does not exist.
        let err = registry
            .begin_transaction("ns1", "a", "server1", 0)
            .await
            .map(|_| ())
            .unwrap_err();
        assert!(err.is_actor_not_found());

        registry
            .register_module("ns1", "m", wasm(), ModuleOptions::default())
            .await
            .unwrap();
        registry
            .create_actor("ns1", "a", "m", ActorOptions::default())
            .await
            .unwrap();

        // Actor exists but has no activation.
        let err = registry
            .begin_transaction("ns1", "a", "server1", 0)
            .await
            .map(|_| ())
            .unwrap_err();
        assert!(matches!(err, Error::FencingMismatch { .. }));

        registry
            .heartbeat(
                "server1",
                HeartbeatState {
                    num_activated_actors: 0,
                    address: "addr1".to_string(),
                },
            )
            .await
            .unwrap();
        registry.ensure_activation("ns1", "a").await.unwrap();

        // Wrong server.
        let err = registry
            .begin_transaction("ns1", "a", "server2", 1)
            .await
            .map(|_| ())
            .unwrap_err();
        assert!(matches!(err, Error::FencingMismatch { .. }));

        // Right server, stale incarnation.
        let err = registry
            .begin_transaction("ns1", "a", "server1", 0)
            .await
            .map(|_| ())
            .unwrap_err();
        assert!(matches!(err, Error::FencingMismatch { .. }));

        // Owning server and incarnation: transaction works.
        let mut txn = registry
            .begin_transaction("ns1", "a", "server1", 1)
            .await
            .unwrap();
        for i in 0..10 {
            let key = format!("key-{i}").into_bytes();
            let value = format!("value-{i}").into_bytes();

            assert!(txn.get(&key).await.unwrap().is_none());
            txn.put(&key, &value).await.unwrap();
            assert_eq!(txn.get(&key).await.unwrap().unwrap(), value);
        }
        txn.commit().await.unwrap();

        // Committed values are visible to the next transaction.
        let txn = registry
            .begin_transaction("ns1", "a", "server1", 1)
            .await
            .unwrap();
        assert_eq!(
            txn.get(b"key-0").await.unwrap().unwrap(),
            Bytes::from("value-0")
        );
        txn.cancel().await.unwrap();
    }

    #[tokio::test]
    async fn test_actor_kv_isolated_per_actor() {
        let registry = registry();

        registry
            .register_module("ns1", "m", wasm(), ModuleOptions::default())
            .await
            .unwrap();
        for actor in ["a", "b"] {
            registry
                .create_actor("ns1", actor, "m", ActorOptions::default())
                .await
                .unwrap();
        }
        registry
            .heartbeat(
                "server1",
                HeartbeatState {
                    num_activated_actors: 0,
                    address: "addr1".to_string(),
                },
            )
            .await
            .unwrap();
        registry.ensure_activation("ns1", "a").await.unwrap();
        registry.ensure_activation("ns1", "b").await.unwrap();

        let mut txn = registry
            .begin_transaction("ns1", "a", "server1", 1)
            .await
            .unwrap();
        txn.put(b"k", b"from-a").await.unwrap();
        txn.commit().await.unwrap();

        // Actor b shares the module but not the KV.
        let txn = registry
            .begin_transaction("ns1", "b", "server1", 1)
            .await
            .unwrap();
        assert!(txn.get(b"k").await.unwrap().is_none());
        txn.cancel().await.unwrap();
    }

    #[tokio::test]
    async fn test_transaction_cancel_rolls_back() {
        let registry = registry();

        registry
            .register_module("ns1", "m", wasm(), ModuleOptions::default())
            .await
            .unwrap();
        registry
            .create_actor("ns1", "a", "m", ActorOptions::default())
            .await
            .unwrap();
        registry
            .heartbeat(
                "server1",
                HeartbeatState {
                    num_activated_actors: 0,
                    address: "addr1".to_string(),
                },
            )
            .await
            .unwrap();
        registry.ensure_activation("ns1", "a").await.unwrap();

        let mut txn = registry
            .begin_transaction("ns1", "a", "server1", 1)
            .await
            .unwrap();
        txn.put(b"k", b"v").await.unwrap();
        txn.cancel().await.unwrap();

        let txn = registry
            .begin_transaction("ns1", "a", "server1", 1)
            .await
            .unwrap();
        assert!(txn.get(b"k").await.unwrap().is_none());
        txn.cancel().await.unwrap();
    }

    #[tokio::test]
    async fn test_generation_strictly_increases() {
        let registry = registry();

        registry
            .register_module("ns1", "m", wasm(), ModuleOptions::default())
            .await
            .unwrap();
        registry
            .create_actor("ns1", "a", "m", ActorOptions::default())
            .await
            .unwrap();
        registry
            .heartbeat(
                "server1",
                HeartbeatState {
                    num_activated_actors: 0,
                    address: "addr1".to_string(),
                },
            )
            .await
            .unwrap();

        let mut prev = 0;
        for _ in 0..5 {
            let refs = registry.ensure_activation("ns1", "a").await.unwrap();
            assert!(refs[0].generation() > prev);
            prev = refs[0].generation();
            registry.inc_generation("ns1", "a").await.unwrap();
        }
        assert_eq!(prev, 5);
    }
}
