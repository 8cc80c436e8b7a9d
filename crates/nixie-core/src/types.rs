//! Identifier and reference types for Nixie
//!
//! Identifiers are validated on construction and immutable afterwards.
//! References are immutable values handed out by the registry; they pin an
//! actor to the server that owned it when the reference was minted.

use crate::constants::*;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

fn validate_component(kind: &str, value: &str, max_len: usize) -> Result<()> {
    if value.is_empty() {
        return Err(Error::invalid_argument(format!("{kind} cannot be empty")));
    }
    if value.len() > max_len {
        return Err(Error::invalid_argument(format!(
            "{kind} length {} exceeds limit {max_len}",
            value.len()
        )));
    }
    let valid = value
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-' || c == '_' || c == '.');
    if !valid {
        return Err(Error::invalid_argument(format!(
            "{kind}: {value} contains invalid characters"
        )));
    }
    Ok(())
}

// =============================================================================
// ActorId / ModuleId
// =============================================================================

/// Unique identifier for an actor: a namespace plus an ID
#[derive(Debug, Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
pub struct ActorId {
    namespace: String,
    id: String,
}

impl ActorId {
    /// Create a new ActorId with validation
    pub fn new(namespace: impl Into<String>, id: impl Into<String>) -> Result<Self> {
        let namespace = namespace.into();
        let id = id.into();
        validate_component("namespace", &namespace, NAMESPACE_LENGTH_BYTES_MAX)?;
        validate_component("actor id", &id, ACTOR_ID_LENGTH_BYTES_MAX)?;
        Ok(Self { namespace, id })
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.namespace, self.id)
    }
}

/// Unique identifier for a module: a namespace plus an ID
///
/// Modules are immutable once registered; actors are created from them.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
pub struct ModuleId {
    namespace: String,
    id: String,
}

impl ModuleId {
    /// Create a new ModuleId with validation
    pub fn new(namespace: impl Into<String>, id: impl Into<String>) -> Result<Self> {
        let namespace = namespace.into();
        let id = id.into();
        validate_component("namespace", &namespace, NAMESPACE_LENGTH_BYTES_MAX)?;
        validate_component("module id", &id, MODULE_ID_LENGTH_BYTES_MAX)?;
        Ok(Self { namespace, id })
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.namespace, self.id)
    }
}

// =============================================================================
// References
// =============================================================================

/// Whether a reference targets a registered actor or an activation-free worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReferenceKind {
    /// Singleton actor tracked by the registry
    Actor,
    /// Worker: bypasses the registry, no singleton guarantee, no durable KV
    Worker,
}

/// The location-independent half of an actor reference
///
/// Carries everything the activations manager needs to resolve or
/// instantiate the target: module, actor, generation, and kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VirtualRef {
    module: ModuleId,
    actor: ActorId,
    generation: u64,
    kind: ReferenceKind,
}

impl VirtualRef {
    /// Create a reference to a registered actor
    pub fn actor(module: ModuleId, actor: ActorId, generation: u64) -> Result<Self> {
        if module.namespace() != actor.namespace() {
            return Err(Error::invalid_argument(format!(
                "module namespace: {} does not match actor namespace: {}",
                module.namespace(),
                actor.namespace()
            )));
        }
        Ok(Self {
            module,
            actor,
            generation,
            kind: ReferenceKind::Actor,
        })
    }

    /// Create a synthetic worker reference. The actor ID equals the module ID
    /// so all worker invocations of one module share a cache entry.
    pub fn worker(module: ModuleId) -> Result<Self> {
        let actor = ActorId::new(module.namespace(), module.id())?;
        Ok(Self {
            module,
            actor,
            generation: 0,
            kind: ReferenceKind::Worker,
        })
    }

    pub fn namespace(&self) -> &str {
        self.actor.namespace()
    }

    pub fn module_id(&self) -> &ModuleId {
        &self.module
    }

    pub fn actor_id(&self) -> &ActorId {
        &self.actor
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn kind(&self) -> ReferenceKind {
        self.kind
    }
}

/// A full activation reference: a [`VirtualRef`] pinned to the server that
/// owned the actor when the registry minted the reference
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActorReference {
    server_id: String,
    server_version: i64,
    address: String,
    inner: VirtualRef,
}

impl ActorReference {
    pub fn new(
        server_id: impl Into<String>,
        server_version: i64,
        address: impl Into<String>,
        inner: VirtualRef,
    ) -> Result<Self> {
        let server_id = server_id.into();
        let address = address.into();
        if server_id.is_empty() {
            return Err(Error::invalid_argument("server id cannot be empty"));
        }
        if address.is_empty() {
            return Err(Error::invalid_argument("address cannot be empty"));
        }
        Ok(Self {
            server_id,
            server_version,
            address,
            inner,
        })
    }

    pub fn server_id(&self) -> &str {
        &self.server_id
    }

    pub fn server_version(&self) -> i64 {
        self.server_version
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn namespace(&self) -> &str {
        self.inner.namespace()
    }

    pub fn module_id(&self) -> &ModuleId {
        self.inner.module_id()
    }

    pub fn actor_id(&self) -> &ActorId {
        self.inner.actor_id()
    }

    pub fn generation(&self) -> u64 {
        self.inner.generation()
    }

    pub fn virtual_ref(&self) -> &VirtualRef {
        &self.inner
    }
}

// =============================================================================
// Options / Wire Requests
// =============================================================================

/// Options for a registered actor
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActorOptions {}

/// Options for a registered module
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleOptions {
    /// Allow the module to be registered with empty bytes. The module body
    /// is then supplied by the embedding program's in-process module table,
    /// and re-registration is idempotent.
    #[serde(default)]
    pub allow_empty_bytes: bool,
}

/// Arguments for creating an actor on first invocation if it does not exist
///
/// The zero value (empty `module_id`) means "do not create".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateIfNotExist {
    #[serde(default)]
    pub module_id: String,
    #[serde(default, rename = "actor_options")]
    pub options: ActorOptions,
}

impl CreateIfNotExist {
    pub fn with_module(module_id: impl Into<String>) -> Self {
        Self {
            module_id: module_id.into(),
            options: ActorOptions::default(),
        }
    }

    /// Whether creation was requested
    pub fn is_set(&self) -> bool {
        !self.module_id.is_empty()
    }
}

/// Request from an actor to create another actor
///
/// An empty `module_id` means "fork self": the new actor is created from
/// the requesting actor's own module.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateActorRequest {
    pub actor_id: String,
    #[serde(default)]
    pub module_id: String,
}

/// Request from an actor to invoke an operation on another actor
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InvokeActorRequest {
    /// Target actor ID. Omit inside [`ScheduleInvocationRequest`] to target
    /// the scheduling actor itself.
    #[serde(default)]
    pub actor_id: String,
    pub operation: String,
    #[serde(default)]
    pub payload: Vec<u8>,
    #[serde(default)]
    pub create_if_not_exist: CreateIfNotExist,
}

/// Request from an actor to schedule a single-shot future invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleInvocationRequest {
    pub invoke: InvokeActorRequest,
    pub after_millis: u64,
}
