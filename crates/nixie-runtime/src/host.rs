//! Host capabilities surface
//!
//! Every instantiated actor receives a [`HostCapabilities`] handle through
//! which it can create actors, invoke other actors, schedule single-shot
//! future invocations, and call server-configured custom host functions.
//!
//! Invocations route back into the environment through the abstract
//! [`ActorSurface`] rather than a concrete handle, which breaks the
//! otherwise cyclic dependency between the environment and the
//! activations manager.

use async_trait::async_trait;
use bytes::Bytes;
use nixie_core::{
    CreateActorRequest, CreateIfNotExist, Error, InvokeActorRequest, Result,
    ScheduleInvocationRequest, TimeProvider,
};
use nixie_registry::Registry;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use tokio::task::JoinHandle;
use tracing::warn;

/// A server-configured host function callable by actors
pub type CustomHostFn = Arc<dyn Fn(&[u8]) -> Result<Bytes> + Send + Sync>;

/// Invoke-actor surface injected into the activations manager
///
/// Implemented by the environment; abstract so the runtime crate does not
/// depend on it.
#[async_trait]
pub trait ActorSurface: Send + Sync {
    async fn invoke_actor(
        &self,
        namespace: &str,
        actor_id: &str,
        module_id: &str,
        operation: &str,
        payload: Bytes,
        create: CreateIfNotExist,
    ) -> Result<Bytes>;
}

/// Tracker for outstanding scheduled-invocation timers
///
/// Timers are aborted when the owning activations manager closes so a
/// scheduled invocation cannot outlive its server.
#[derive(Clone, Default)]
pub struct TimerSet {
    handles: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl TimerSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a timer task, dropping any already-finished handles
    pub fn track(&self, handle: JoinHandle<()>) {
        let mut handles = self.handles.lock().expect("timer lock poisoned");
        handles.retain(|h| !h.is_finished());
        handles.push(handle);
    }

    /// Abort every outstanding timer
    pub fn abort_all(&self) {
        let mut handles = self.handles.lock().expect("timer lock poisoned");
        for handle in handles.drain(..) {
            handle.abort();
        }
    }

    /// Number of timers not yet finished
    pub fn outstanding(&self) -> usize {
        let handles = self.handles.lock().expect("timer lock poisoned");
        handles.iter().filter(|h| !h.is_finished()).count()
    }
}

/// Capability handle held by one actor instance
pub struct HostCapabilities {
    registry: Arc<dyn Registry>,
    surface: Weak<dyn ActorSurface>,
    namespace: String,
    actor_id: String,
    module_id: String,
    custom_fns: Arc<HashMap<String, CustomHostFn>>,
    timers: TimerSet,
    time: Arc<dyn TimeProvider>,
}

impl HostCapabilities {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        registry: Arc<dyn Registry>,
        surface: Weak<dyn ActorSurface>,
        namespace: String,
        actor_id: String,
        module_id: String,
        custom_fns: Arc<HashMap<String, CustomHostFn>>,
        timers: TimerSet,
        time: Arc<dyn TimeProvider>,
    ) -> Self {
        Self {
            registry,
            surface,
            namespace,
            actor_id,
            module_id,
            custom_fns,
            timers,
            time,
        }
    }

    /// The ID of the actor holding this handle
    pub fn actor_id(&self) -> &str {
        &self.actor_id
    }

    fn surface(&self) -> Result<Arc<dyn ActorSurface>> {
        self.surface
            .upgrade()
            .ok_or_else(|| Error::internal("environment has shut down"))
    }

    /// Create another actor
    ///
    /// An empty `module_id` forks the calling actor: the new actor is
    /// created from the caller's own module.
    pub async fn create_actor(&self, mut req: CreateActorRequest) -> Result<()> {
        if req.module_id.is_empty() {
            req.module_id = self.module_id.clone();
        }
        self.registry
            .create_actor(
                &self.namespace,
                &req.actor_id,
                &req.module_id,
                Default::default(),
            )
            .await
    }

    /// Invoke an operation on another actor (or this one)
    ///
    /// The target may live on any server; routing goes through the
    /// environment.
    pub async fn invoke_actor(&self, req: InvokeActorRequest) -> Result<Bytes> {
        let surface = self.surface()?;
        // The module ID only matters if the target is created on the fly;
        // default to the caller's module like create_actor does.
        let module_id = if req.create_if_not_exist.is_set() {
            req.create_if_not_exist.module_id.clone()
        } else {
            self.module_id.clone()
        };
        surface
            .invoke_actor(
                &self.namespace,
                &req.actor_id,
                &module_id,
                &req.operation,
                Bytes::from(req.payload),
                req.create_if_not_exist,
            )
            .await
    }

    /// Schedule a single-shot invocation to run after a delay
    ///
    /// An empty target actor ID schedules the invocation on the calling
    /// actor (a self timer). The payload is copied now, so the caller may
    /// reuse its buffer. Timers are not durable and are aborted when the
    /// server shuts down.
    pub fn schedule_invoke(&self, mut req: ScheduleInvocationRequest) -> Result<()> {
        if req.invoke.actor_id.is_empty() {
            req.invoke.actor_id = self.actor_id.clone();
        }

        let surface = self.surface.clone();
        let time = self.time.clone();
        let namespace = self.namespace.clone();
        let module_id = self.module_id.clone();
        let scheduler_id = self.actor_id.clone();
        let payload = Bytes::copy_from_slice(&req.invoke.payload);

        let handle = tokio::spawn(async move {
            time.sleep_ms(req.after_millis).await;
            let Some(surface) = surface.upgrade() else {
                return;
            };
            if let Err(e) = surface
                .invoke_actor(
                    &namespace,
                    &req.invoke.actor_id,
                    &module_id,
                    &req.invoke.operation,
                    payload,
                    req.invoke.create_if_not_exist,
                )
                .await
            {
                warn!(
                    from = %scheduler_id,
                    to = %req.invoke.actor_id,
                    operation = %req.invoke.operation,
                    error = %e,
                    "scheduled invocation failed"
                );
            }
        });
        self.timers.track(handle);
        Ok(())
    }

    /// Call a server-configured custom host function
    pub fn custom_fn(&self, name: &str, payload: &[u8]) -> Result<Bytes> {
        let f = self
            .custom_fns
            .get(name)
            .ok_or_else(|| Error::UnknownHostFunction {
                name: name.to_string(),
            })?;
        f(payload)
    }
}
