//! Activated-actor cache and lifecycle
//!
//! The invoke path does a lot of manual lock juggling. That is
//! intentional: the state lock must not be held while user code runs,
//! both because an operation may run for a long time and because an actor
//! invoking another actor on the same server would otherwise deadlock.
//! The exceptions are instantiation and `startup`, which run under the
//! exclusive lock so concurrent first invocations coalesce into a single
//! instance.

use crate::host::{ActorSurface, CustomHostFn, HostCapabilities, TimerSet};
use crate::module::{ActorInstance, Module, ModuleLoader};
use async_trait::async_trait;
use bytes::Bytes;
use nixie_core::constants::OPERATION_STARTUP;
use nixie_core::{
    ActorId, Error, ModuleId, ReferenceKind, Result, TimeProvider, VirtualRef, WallClock,
};
use nixie_registry::{ActorKvTxn, Registry};
use std::collections::HashMap;
use std::sync::{Arc, OnceLock, RwLock as StdRwLock, Weak};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, instrument, warn};

#[derive(Clone)]
struct ActivatedActor {
    /// Serializes operations against this instance.
    instance: Arc<Mutex<Box<dyn ActorInstance>>>,
    generation: u64,
}

#[derive(Default)]
struct State {
    modules: HashMap<ModuleId, Arc<dyn Module>>,
    actors: HashMap<ActorId, ActivatedActor>,
}

/// The fencing token pushed down after every successful heartbeat
#[derive(Default, Clone)]
struct ServerState {
    server_id: String,
    server_version: i64,
}

/// Per-server activations manager
pub struct Activations {
    state: RwLock<State>,

    registry: Arc<dyn Registry>,
    loader: Option<Arc<dyn ModuleLoader>>,
    in_process_modules: HashMap<ModuleId, Arc<dyn Module>>,
    custom_host_fns: Arc<HashMap<String, CustomHostFn>>,

    /// Set once by the owning environment after construction.
    surface: OnceLock<Weak<dyn ActorSurface>>,
    server_state: StdRwLock<ServerState>,
    timers: TimerSet,
    time: Arc<dyn TimeProvider>,
}

impl Activations {
    pub fn new(
        registry: Arc<dyn Registry>,
        loader: Option<Arc<dyn ModuleLoader>>,
        in_process_modules: HashMap<ModuleId, Arc<dyn Module>>,
        custom_host_fns: HashMap<String, CustomHostFn>,
        time: Arc<dyn TimeProvider>,
    ) -> Self {
        Self {
            state: RwLock::new(State::default()),
            registry,
            loader,
            in_process_modules,
            custom_host_fns: Arc::new(custom_host_fns),
            surface: OnceLock::new(),
            server_state: StdRwLock::new(ServerState::default()),
            timers: TimerSet::new(),
            time,
        }
    }

    /// Create a manager on the production wall clock with no loader or
    /// extra host functions. Convenient for tests.
    pub fn new_in_process(
        registry: Arc<dyn Registry>,
        in_process_modules: HashMap<ModuleId, Arc<dyn Module>>,
    ) -> Self {
        Self::new(
            registry,
            None,
            in_process_modules,
            HashMap::new(),
            Arc::new(WallClock::new()),
        )
    }

    /// Inject the invoke-actor surface. Must be called exactly once,
    /// before the first invocation that reaches back into the environment.
    pub fn bind_surface(&self, surface: Weak<dyn ActorSurface>) {
        if self.surface.set(surface).is_err() {
            warn!("actor surface was already bound");
        }
    }

    /// Update the fencing token used for subsequent KV transactions.
    /// Called after every successful heartbeat.
    pub fn set_server_state(&self, server_id: &str, server_version: i64) {
        let mut state = self.server_state.write().expect("server state poisoned");
        state.server_id = server_id.to_string();
        state.server_version = server_version;
    }

    /// Number of actors currently activated on this server
    pub async fn num_activated_actors(&self) -> u64 {
        self.state.read().await.actors.len() as u64
    }

    /// Resolve (or instantiate) the referenced actor and execute one
    /// operation on it
    #[instrument(skip(self, reference, payload), fields(actor_id = %reference.actor_id()), level = "debug")]
    pub async fn invoke(
        &self,
        reference: &VirtualRef,
        operation: &str,
        payload: Bytes,
    ) -> Result<Bytes> {
        // Fast path: cached instance with a current generation.
        {
            let state = self.state.read().await;
            if let Some(actor) = state.actors.get(reference.actor_id()) {
                if actor.generation >= reference.generation() {
                    let actor = actor.clone();
                    drop(state);
                    return self.invoke_instance(reference, actor, operation, payload).await;
                }
            }
        }

        let mut state = self.state.write().await;

        // Re-check under the exclusive lock; another caller may have won.
        if let Some(actor) = state.actors.get(reference.actor_id()) {
            if actor.generation >= reference.generation() {
                let actor = actor.clone();
                drop(state);
                return self.invoke_instance(reference, actor, operation, payload).await;
            }

            // The cached instance belongs to an older generation. Close it
            // and reinstantiate below.
            debug!(
                actor_id = %reference.actor_id(),
                cached_generation = actor.generation,
                reference_generation = reference.generation(),
                "closing stale activation"
            );
            let stale = state
                .actors
                .remove(reference.actor_id())
                .expect("checked above");
            let mut instance = stale.instance.lock().await;
            if let Err(e) = instance.close().await {
                warn!(actor_id = %reference.actor_id(), error = %e, "error closing stale activation");
            }
        }

        if let Some(module) = state.modules.get(reference.module_id()).cloned() {
            // Module is cached: instantiate, then we're done.
            let actor = self.instantiate_locked(&mut state, &module, reference).await?;
            drop(state);
            return self.invoke_instance(reference, actor, operation, payload).await;
        }

        // Module not cached. The bytes may live in a remote store, so
        // release the lock for the fetch.
        drop(state);

        let (module_bytes, _opts) = self
            .registry
            .get_module(reference.namespace(), reference.module_id().id())
            .await?;

        // Reacquire and re-check both caches; a concurrent caller may have
        // populated either while the lock was released.
        let mut state = self.state.write().await;

        if !state.modules.contains_key(reference.module_id()) {
            let module = self.resolve_module(reference.module_id(), module_bytes).await?;
            state.modules.insert(reference.module_id().clone(), module);
        }
        let module = state
            .modules
            .get(reference.module_id())
            .cloned()
            .expect("inserted above");

        let actor = match state.actors.get(reference.actor_id()) {
            Some(actor) => actor.clone(),
            None => self.instantiate_locked(&mut state, &module, reference).await?,
        };
        drop(state);

        self.invoke_instance(reference, actor, operation, payload).await
    }

    /// Close every cached actor instance and module, and abort outstanding
    /// timers. Part of graceful server shutdown.
    pub async fn close(&self) {
        self.timers.abort_all();

        let (actors, modules) = {
            let mut state = self.state.write().await;
            (
                std::mem::take(&mut state.actors),
                std::mem::take(&mut state.modules),
            )
        };

        for (actor_id, actor) in actors {
            let mut instance = actor.instance.lock().await;
            if let Err(e) = instance.close().await {
                warn!(actor_id = %actor_id, error = %e, "error closing actor during shutdown");
            }
        }
        for (module_id, module) in modules {
            if let Err(e) = module.close().await {
                warn!(module_id = %module_id, error = %e, "error closing module during shutdown");
            }
        }
    }

    async fn resolve_module(
        &self,
        module_id: &ModuleId,
        module_bytes: Bytes,
    ) -> Result<Arc<dyn Module>> {
        if !module_bytes.is_empty() {
            let loader = self.loader.as_ref().ok_or_else(|| Error::ModuleLoadFailed {
                module_id: module_id.to_string(),
                reason: "module has bytes but no module loader is configured".to_string(),
            })?;
            return loader.load(module_id, module_bytes).await;
        }

        // No bytes: the module body lives in the embedding program.
        self.in_process_modules
            .get(module_id)
            .cloned()
            .ok_or_else(|| Error::ModuleLoadFailed {
                module_id: module_id.to_string(),
                reason: "in-process module is not registered with this server".to_string(),
            })
    }

    /// Instantiate and run `startup`, inserting into the cache on success.
    /// Runs under the exclusive state lock held by the caller, which is
    /// what coalesces concurrent first invocations.
    async fn instantiate_locked(
        &self,
        state: &mut State,
        module: &Arc<dyn Module>,
        reference: &VirtualRef,
    ) -> Result<ActivatedActor> {
        let host = self.host_for(reference);
        let mut instance = module
            .instantiate(reference.actor_id().id(), host)
            .await
            .map_err(|e| Error::InstantiationFailed {
                actor_id: reference.actor_id().to_string(),
                module_id: reference.module_id().to_string(),
                reason: e.to_string(),
            })?;

        // A startup failure is fatal to the activation: the instance is
        // not cached and the error propagates to the invoker.
        self.run_in_txn(reference, &mut *instance, OPERATION_STARTUP, &[])
            .await?;

        let actor = ActivatedActor {
            instance: Arc::new(Mutex::new(instance)),
            generation: reference.generation(),
        };
        state
            .actors
            .insert(reference.actor_id().clone(), actor.clone());
        Ok(actor)
    }

    async fn invoke_instance(
        &self,
        reference: &VirtualRef,
        actor: ActivatedActor,
        operation: &str,
        payload: Bytes,
    ) -> Result<Bytes> {
        let mut instance = actor.instance.lock().await;
        self.run_in_txn(reference, &mut **instance, operation, &payload)
            .await
    }

    /// Execute one operation inside the invocation's implicit KV
    /// transaction: committed iff the operation returns `Ok`.
    async fn run_in_txn(
        &self,
        reference: &VirtualRef,
        instance: &mut dyn ActorInstance,
        operation: &str,
        payload: &[u8],
    ) -> Result<Bytes> {
        match reference.kind() {
            ReferenceKind::Actor => {
                let server = {
                    let state = self.server_state.read().expect("server state poisoned");
                    state.clone()
                };
                let mut txn = self
                    .registry
                    .begin_transaction(
                        reference.namespace(),
                        reference.actor_id().id(),
                        &server.server_id,
                        server.server_version,
                    )
                    .await?;

                match instance.invoke(operation, payload, &mut *txn).await {
                    Ok(response) => {
                        txn.commit().await?;
                        Ok(response)
                    }
                    Err(e) => {
                        let _ = txn.cancel().await;
                        Err(e)
                    }
                }
            }
            ReferenceKind::Worker => {
                // Workers bypass the registry entirely; there is no
                // activation to fence a transaction against.
                let mut txn = WorkerKvTxn;
                instance.invoke(operation, payload, &mut txn).await
            }
        }
    }

    fn host_for(&self, reference: &VirtualRef) -> HostCapabilities {
        let surface = self
            .surface
            .get()
            .cloned()
            .unwrap_or_else(|| Weak::<DisconnectedSurface>::new() as Weak<dyn ActorSurface>);
        HostCapabilities::new(
            self.registry.clone(),
            surface,
            reference.namespace().to_string(),
            reference.actor_id().id().to_string(),
            reference.module_id().id().to_string(),
            self.custom_host_fns.clone(),
            self.timers.clone(),
            self.time.clone(),
        )
    }
}

/// Placeholder for the surface before `bind_surface` is called; upgrading
/// always fails.
struct DisconnectedSurface;

#[async_trait]
impl ActorSurface for DisconnectedSurface {
    async fn invoke_actor(
        &self,
        _namespace: &str,
        _actor_id: &str,
        _module_id: &str,
        _operation: &str,
        _payload: Bytes,
        _create: nixie_core::CreateIfNotExist,
    ) -> Result<Bytes> {
        Err(Error::internal("actor surface is not bound"))
    }
}

/// Transaction handle for worker invocations: workers have no durable KV.
struct WorkerKvTxn;

#[async_trait]
impl ActorKvTxn for WorkerKvTxn {
    async fn get(&self, _key: &[u8]) -> Result<Option<Bytes>> {
        Err(Error::KvUnavailable {
            context: "worker invocations have no durable KV".to_string(),
        })
    }

    async fn put(&mut self, _key: &[u8], _value: &[u8]) -> Result<()> {
        Err(Error::KvUnavailable {
            context: "worker invocations have no durable KV".to_string(),
        })
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        Ok(())
    }

    async fn cancel(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}
