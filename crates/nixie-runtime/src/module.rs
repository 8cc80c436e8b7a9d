//! Module and actor-instance seams
//!
//! The embedded code engine (a sandboxed bytecode runtime or an in-process
//! plugin) lives behind these traits. The activations manager neither
//! knows nor cares how an instance executes its operations.

use crate::host::HostCapabilities;
use async_trait::async_trait;
use bytes::Bytes;
use nixie_core::{ModuleId, Result};
use nixie_registry::ActorKvTxn;
use std::sync::Arc;

/// A loaded module: a factory for actor instances
#[async_trait]
pub trait Module: Send + Sync {
    /// Instantiate an actor from this module
    ///
    /// The returned instance owns the handed capabilities for the rest of
    /// its life.
    async fn instantiate(
        &self,
        actor_id: &str,
        host: HostCapabilities,
    ) -> Result<Box<dyn ActorInstance>>;

    /// Release resources held by the module
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// A live actor instance
///
/// Invocations on one instance are serialized by the caller; an instance
/// never sees concurrent `invoke` calls.
#[async_trait]
pub trait ActorInstance: Send {
    /// Execute one operation
    ///
    /// `txn` is the invocation's implicit KV transaction: everything the
    /// actor reads and writes through it is committed iff this call
    /// returns `Ok`.
    async fn invoke(
        &mut self,
        operation: &str,
        payload: &[u8],
        txn: &mut dyn ActorKvTxn,
    ) -> Result<Bytes>;

    /// Close the instance. Called on generation invalidation and server
    /// shutdown.
    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Compiles registered module bytes into a [`Module`]
///
/// Supplied by the embedding program; typically wraps a WASM engine.
/// Modules registered with empty bytes bypass the loader and resolve
/// against the in-process module table instead.
#[async_trait]
pub trait ModuleLoader: Send + Sync {
    async fn load(&self, module_id: &ModuleId, module_bytes: Bytes) -> Result<Arc<dyn Module>>;
}
