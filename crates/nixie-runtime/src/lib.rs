//! Nixie Runtime
//!
//! The per-server activations manager: lazily loads modules, instantiates
//! actors, caches them, honors generation-count invalidation, and
//! serializes lifecycle transitions.
//!
//! # Overview
//!
//! - [`Module`] / [`ActorInstance`] are the seams to the embedded code
//!   engine. Non-empty module bytes go through a [`ModuleLoader`]; empty
//!   bytes resolve against the embedding program's in-process module
//!   table.
//! - [`Activations`] owns the module and instance caches and drives the
//!   per-invocation implicit KV transaction: begun before user code runs,
//!   committed on success, cancelled on error.
//! - [`HostCapabilities`] is the surface handed to every instantiated
//!   actor: create/invoke/schedule other actors and call server-configured
//!   host functions. Invocations route back through the injected
//!   [`ActorSurface`] rather than a concrete environment handle.

mod activations;
mod host;
mod module;

pub use activations::Activations;
pub use host::{ActorSurface, CustomHostFn, HostCapabilities, TimerSet};
pub use module::{ActorInstance, Module, ModuleLoader};
