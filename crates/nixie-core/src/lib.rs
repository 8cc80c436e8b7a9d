//! Nixie Core
//!
//! Shared types, errors, and constants for the Nixie virtual actor runtime.
//!
//! # Overview
//!
//! Nixie is a distributed virtual actor runtime: a cluster of peer servers
//! cooperatively hosts stateful, singleton actors addressed by
//! `(namespace, actor_id)`. This crate carries the vocabulary shared by the
//! other crates in the workspace:
//!
//! - Validated identifiers ([`ActorId`], [`ModuleId`]) and activation
//!   references ([`ActorReference`], [`VirtualRef`])
//! - The error taxonomy ([`Error`]) with retriability classification
//! - Explicit limits and protocol constants ([`constants`])
//! - The time abstraction ([`TimeProvider`]) that every TTL comparison in
//!   the system goes through

pub mod constants;
pub mod error;
pub mod io;
pub mod telemetry;
pub mod types;

pub use constants::*;
pub use error::{Error, Result};
pub use io::{MockClock, TimeProvider, WallClock};
pub use telemetry::init_telemetry;
pub use types::{
    ActorId, ActorOptions, ActorReference, CreateActorRequest, CreateIfNotExist,
    InvokeActorRequest, ModuleId, ModuleOptions, ReferenceKind, ScheduleInvocationRequest,
    VirtualRef,
};
