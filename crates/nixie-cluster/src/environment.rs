//! Per-server environment
//!
//! Owns the heartbeat loop, the activation-location cache, and the
//! ownership gate. Construction performs one synchronous heartbeat so the
//! environment is immediately usable, then registers into the
//! process-local peer router and starts the background loop.

use crate::cache::ActivationCache;
use crate::config::{DiscoveryType, EnvironmentOptions};
use crate::discovery;
use crate::router;
use crate::rpc::{NoRemoteClient, RemoteClient};
use async_trait::async_trait;
use bytes::Bytes;
use nixie_core::constants::{HEARTBEAT_TTL_MICROS, SERVER_ID_WILDCARD};
use nixie_core::{
    CreateIfNotExist, Error, Result, TimeProvider, VirtualRef,
};
use nixie_registry::{HeartbeatResult, HeartbeatState, Registry};
use nixie_runtime::{ActorSurface, Activations};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

#[derive(Default)]
struct HeartbeatStatus {
    result: HeartbeatResult,
    /// Test hook: pin the last observed heartbeat result.
    frozen: bool,
    /// Test hook: skip background heartbeats while set.
    paused: bool,
}

/// A server in the cluster
///
/// Routes invocations to wherever the target actor is activated, executes
/// the ones this server owns, and keeps ownership provable by
/// heartbeating.
pub struct Environment {
    server_id: String,
    address: String,

    registry: Arc<dyn Registry>,
    activations: Arc<Activations>,
    cache: Arc<ActivationCache>,
    client: Arc<dyn RemoteClient>,

    heartbeat_state: RwLock<HeartbeatStatus>,
    disable_cache: bool,
    cache_ttl_ms: AtomicU64,
    heartbeat_interval_ms: u64,

    shutdown: Arc<Notify>,
    heartbeat_task: Mutex<Option<JoinHandle<()>>>,
    time: Arc<dyn TimeProvider>,
}

impl Environment {
    /// Create an environment, heartbeat once, and register it with the
    /// process-local peer router
    ///
    /// An empty `server_id` gets a generated one. `client` carries remote
    /// invocations; `None` means in-process peers only.
    pub async fn new(
        server_id: impl Into<String>,
        registry: Arc<dyn Registry>,
        client: Option<Arc<dyn RemoteClient>>,
        opts: EnvironmentOptions,
    ) -> Result<Arc<Self>> {
        opts.validate()?;

        let mut server_id = server_id.into();
        if server_id.is_empty() {
            server_id = format!("server-{}", uuid::Uuid::new_v4());
        }

        let host = match opts.discovery.discovery_type {
            DiscoveryType::LocalHost => "127.0.0.1".to_string(),
            DiscoveryType::Remote => discovery::self_ipv4()?.to_string(),
        };
        let address = format!("{}:{}", host, opts.discovery.port);

        // Register the in-process modules so they are usable with
        // create_actor and ensure_activation. Registration is idempotent
        // across restarts because the bytes side is empty.
        let module_ids: Vec<_> = opts.in_process_modules.keys().cloned().collect();
        for module_id in &module_ids {
            registry
                .register_module(
                    module_id.namespace(),
                    module_id.id(),
                    Bytes::new(),
                    nixie_core::ModuleOptions {
                        allow_empty_bytes: true,
                    },
                )
                .await?;
        }

        let activations = Arc::new(Activations::new(
            registry.clone(),
            opts.module_loader.clone(),
            opts.in_process_modules.clone(),
            opts.custom_host_fns.clone(),
            opts.time.clone(),
        ));

        let environment = Arc::new(Self {
            server_id,
            address: address.clone(),
            registry,
            activations,
            cache: ActivationCache::new(opts.time.clone()),
            client: client.unwrap_or_else(|| Arc::new(NoRemoteClient)),
            heartbeat_state: RwLock::new(HeartbeatStatus::default()),
            disable_cache: opts.disable_activation_cache,
            cache_ttl_ms: AtomicU64::new(opts.activation_cache_ttl_ms.unwrap_or(0)),
            heartbeat_interval_ms: opts.heartbeat_interval_ms,
            shutdown: Arc::new(Notify::new()),
            heartbeat_task: Mutex::new(None),
            time: opts.time.clone(),
        });

        environment
            .activations
            .bind_surface(Arc::downgrade(&environment) as Weak<dyn ActorSurface>);

        // One heartbeat right off the bat so the environment is usable
        // before the background loop's first tick.
        environment.heartbeat_now().await?;

        // The cache TTL defaults to the registry's heartbeat TTL, which is
        // known once the first heartbeat result is in.
        if opts.activation_cache_ttl_ms.is_none() {
            let ttl_micros = environment.heartbeat_state.read().expect("poisoned").result.heartbeat_ttl;
            environment
                .cache_ttl_ms
                .store((ttl_micros / 1000).max(1) as u64, Ordering::SeqCst);
        }

        info!(server_id = %environment.server_id, address = %address, "registering environment");
        router::register(&address, environment.clone())?;

        Self::spawn_heartbeat_loop(&environment);

        Ok(environment)
    }

    /// This server's ID
    pub fn server_id(&self) -> &str {
        &self.server_id
    }

    /// The address this environment advertises to peers
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Number of actors currently activated on this server
    pub async fn num_activated_actors(&self) -> u64 {
        self.activations.num_activated_actors().await
    }

    /// Invoke `operation` on an actor, routing to whichever server owns
    /// its activation
    ///
    /// `module_id` names the module the actor runs (used when `create`
    /// requests on-the-fly creation). When `create` is set and the actor
    /// does not exist yet, it is created first and the invocation retried.
    #[instrument(skip(self, payload, create), level = "debug")]
    pub async fn invoke_actor(
        &self,
        namespace: &str,
        actor_id: &str,
        module_id: &str,
        operation: &str,
        payload: Bytes,
        create: CreateIfNotExist,
    ) -> Result<Bytes> {
        if namespace.is_empty() {
            return Err(Error::invalid_argument("namespace cannot be empty"));
        }
        if actor_id.is_empty() {
            return Err(Error::invalid_argument("actor id cannot be empty"));
        }
        if module_id.is_empty() {
            return Err(Error::invalid_argument("module id cannot be empty"));
        }

        let version_stamp = self.registry.get_version_stamp().await?;

        let cache_key = format!("{namespace}::{actor_id}");
        let mut references = None;
        if !self.disable_cache {
            references = self.cache.get(&cache_key);
        }

        let references = match references {
            Some(references) => references,
            None => {
                let references = self.ensure_activation(namespace, actor_id, &create).await?;
                self.cache.insert(
                    cache_key,
                    references.clone(),
                    self.cache_ttl_ms.load(Ordering::SeqCst),
                );
                references
            }
        };

        if references.is_empty() {
            return Err(Error::internal(format!(
                "ensure_activation succeeded with 0 references for actor: {actor_id}"
            )));
        }

        self.invoke_references(version_stamp, &references, operation, payload)
            .await
    }

    /// Execute an invocation this server has been told it owns
    ///
    /// The ownership gate runs before any user code:
    /// 1. the caller must have reached the server it intended;
    /// 2. this server's heartbeat must still be within the TTL of the
    ///    caller's version stamp (we can prove ownership is current);
    /// 3. the reference's server version must match this server's current
    ///    incarnation, or the reference predates a heartbeat lapse and the
    ///    actor may have been reactivated elsewhere.
    pub async fn invoke_actor_direct(
        &self,
        version_stamp: i64,
        server_id: &str,
        server_version: i64,
        reference: &VirtualRef,
        operation: &str,
        payload: Bytes,
    ) -> Result<Bytes> {
        if server_id.is_empty() {
            return Err(Error::invalid_argument("server id cannot be empty"));
        }
        if server_id != self.server_id && server_id != SERVER_ID_WILDCARD {
            // IP-based addressing can route a request to the wrong
            // physical server, e.g. after two pods swap addresses. The
            // wildcard is used by DNS-style registries that hand every
            // peer the same server ID.
            return Err(Error::WrongServer {
                requested: server_id.to_string(),
                actual: self.server_id.clone(),
            });
        }
        if version_stamp <= 0 {
            return Err(Error::invalid_argument(format!(
                "version stamp must be positive, was: {version_stamp}"
            )));
        }

        let heartbeat = {
            let state = self.heartbeat_state.read().expect("poisoned");
            state.result
        };

        if heartbeat.version_stamp + heartbeat.heartbeat_ttl < version_stamp {
            return Err(Error::StaleHeartbeat {
                heartbeat_version_stamp: heartbeat.version_stamp,
                heartbeat_ttl: heartbeat.heartbeat_ttl,
                version_stamp,
            });
        }

        // A mismatch means this server missed a heartbeat, was considered
        // dead, and came back with a new incarnation; references minted
        // against the old one may point at an actor that has since been
        // activated elsewhere.
        if heartbeat.server_version != server_version {
            return Err(Error::ServerVersionMismatch {
                current: heartbeat.server_version,
                reference: server_version,
            });
        }

        self.activations.invoke(reference, operation, payload).await
    }

    /// Invoke a worker: activation-free module execution on this server
    ///
    /// Workers bypass the registry entirely; state accumulated by a worker
    /// is local to this server and nothing is linearized.
    pub async fn invoke_worker(
        &self,
        namespace: &str,
        module_id: &str,
        operation: &str,
        payload: Bytes,
    ) -> Result<Bytes> {
        let reference = VirtualRef::worker(nixie_core::ModuleId::new(namespace, module_id)?)?;
        self.activations.invoke(&reference, operation, payload).await
    }

    /// Deregister from the peer router, stop the heartbeat loop, and close
    /// every cached activation
    pub async fn close(&self) -> Result<()> {
        router::deregister(&self.address);

        self.shutdown.notify_one();
        let task = self.heartbeat_task.lock().expect("poisoned").take();
        if let Some(task) = task {
            let _ = task.await;
        }

        self.cache.close().await;
        self.activations.close().await;

        info!(server_id = %self.server_id, address = %self.address, "environment shut down");
        Ok(())
    }

    /// Perform one heartbeat immediately
    ///
    /// Runs on construction, from the background loop, and from tests that
    /// need heartbeats at specific points.
    pub async fn heartbeat_now(&self) -> Result<()> {
        let state = HeartbeatState {
            num_activated_actors: self.activations.num_activated_actors().await,
            address: self.address.clone(),
        };

        let timeout_micros = {
            let current = self.heartbeat_state.read().expect("poisoned");
            if current.result.heartbeat_ttl > 0 {
                current.result.heartbeat_ttl
            } else {
                HEARTBEAT_TTL_MICROS
            }
        };

        let result = tokio::time::timeout(
            std::time::Duration::from_micros(timeout_micros as u64),
            self.registry.heartbeat(&self.server_id, state),
        )
        .await
        .map_err(|_| Error::transport("heartbeat timed out"))??;

        {
            let mut current = self.heartbeat_state.write().expect("poisoned");
            if !current.frozen {
                current.result = result;
            }
        }

        // Push the fresh server version down so subsequent KV transactions
        // carry the current fencing token.
        self.activations
            .set_server_state(&self.server_id, result.server_version);
        Ok(())
    }

    /// Test hook: pin the heartbeat state at its last observed value.
    /// Heartbeats keep flowing to the registry but no longer update it.
    pub fn freeze_heartbeat_state(&self) {
        self.heartbeat_state.write().expect("poisoned").frozen = true;
    }

    /// Test hook: make the background loop skip heartbeats
    pub fn pause_heartbeat(&self) {
        self.heartbeat_state.write().expect("poisoned").paused = true;
    }

    /// Test hook: resume background heartbeats
    pub fn resume_heartbeat(&self) {
        self.heartbeat_state.write().expect("poisoned").paused = false;
    }

    fn spawn_heartbeat_loop(environment: &Arc<Self>) {
        let weak = Arc::downgrade(environment);
        let shutdown = environment.shutdown.clone();
        let time = environment.time.clone();
        let interval_ms = environment.heartbeat_interval_ms;

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = time.sleep_ms(interval_ms) => {
                        let Some(environment) = weak.upgrade() else { break };
                        if environment.heartbeat_state.read().expect("poisoned").paused {
                            continue;
                        }
                        if let Err(e) = environment.heartbeat_now().await {
                            // The loop never terminates on error; a later
                            // heartbeat may succeed.
                            warn!(server_id = %environment.server_id, error = %e, "background heartbeat failed");
                        }
                    }
                    _ = shutdown.notified() => {
                        break;
                    }
                }
            }
            debug!("heartbeat loop stopped");
        });

        *environment.heartbeat_task.lock().expect("poisoned") = Some(task);
    }

    async fn ensure_activation(
        &self,
        namespace: &str,
        actor_id: &str,
        create: &CreateIfNotExist,
    ) -> Result<Vec<nixie_core::ActorReference>> {
        // TODO: add a concurrency limiter so a cold cache cannot stampede
        // the registry with ensure_activation calls.
        match self.registry.ensure_activation(namespace, actor_id).await {
            Ok(references) => Ok(references),
            Err(e) if e.is_actor_not_found() && create.is_set() => {
                match self
                    .registry
                    .create_actor(
                        namespace,
                        actor_id,
                        &create.module_id,
                        create.options.clone(),
                    )
                    .await
                {
                    Ok(()) => {}
                    // A concurrent caller may have created it first.
                    Err(Error::ActorAlreadyExists { .. }) => {}
                    Err(e) => return Err(e),
                }
                self.registry.ensure_activation(namespace, actor_id).await
            }
            Err(e) => Err(e),
        }
    }

    async fn invoke_references(
        &self,
        version_stamp: i64,
        references: &[nixie_core::ActorReference],
        operation: &str,
        payload: Bytes,
    ) -> Result<Bytes> {
        // Extra references are alternates, not concurrent targets.
        let reference = &references[0];

        if let Some(peer) = router::lookup(reference.address()) {
            return peer
                .invoke_actor_direct(
                    version_stamp,
                    reference.server_id(),
                    reference.server_version(),
                    reference.virtual_ref(),
                    operation,
                    payload,
                )
                .await;
        }

        self.client
            .invoke_actor_remote(version_stamp, reference, operation, payload)
            .await
    }
}

#[async_trait]
impl ActorSurface for Environment {
    async fn invoke_actor(
        &self,
        namespace: &str,
        actor_id: &str,
        module_id: &str,
        operation: &str,
        payload: Bytes,
        create: CreateIfNotExist,
    ) -> Result<Bytes> {
        Environment::invoke_actor(self, namespace, actor_id, module_id, operation, payload, create)
            .await
    }
}
