//! Nixie Cluster
//!
//! The per-server environment: heartbeats into the registry, routes
//! invocations to wherever the target actor is activated, enforces that
//! this server still owns an actor before executing it, and registers
//! itself into the process-local peer router so co-located environments
//! short-circuit the network.
//!
//! # Overview
//!
//! ```rust,ignore
//! use nixie_cluster::{Environment, EnvironmentOptions};
//! use nixie_registry::KvRegistry;
//! use nixie_storage::MemoryStore;
//! use std::sync::Arc;
//!
//! let registry = Arc::new(KvRegistry::new(Arc::new(MemoryStore::new())));
//! let env = Environment::new("server-1", registry, None, EnvironmentOptions::default()).await?;
//! let out = env
//!     .invoke_actor("ns-1", "a", "my-module", "inc", Bytes::new(), Default::default())
//!     .await?;
//! env.close().await?;
//! ```

mod cache;
mod config;
mod discovery;
mod environment;
mod router;
mod rpc;

pub use cache::ActivationCache;
pub use config::{DiscoveryOptions, DiscoveryType, EnvironmentOptions};
pub use environment::Environment;
pub use rpc::{NoRemoteClient, RemoteClient};
