//! Environment configuration
//!
//! Explicit defaults with validation.

use nixie_core::constants::HEARTBEAT_INTERVAL_MS;
use nixie_core::{Error, ModuleId, Result, TimeProvider, WallClock};
use nixie_runtime::{CustomHostFn, Module, ModuleLoader};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// How the environment advertises itself to the discovery mechanism
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscoveryType {
    /// Advertise as `127.0.0.1` (in-process and test mode)
    #[default]
    LocalHost,
    /// Advertise the first non-loopback, non-link-local IPv4 address
    Remote,
}

/// Discovery-related options
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DiscoveryOptions {
    #[serde(default)]
    pub discovery_type: DiscoveryType,
    /// Port advertised to peers. May be zero in localhost mode only.
    #[serde(default)]
    pub port: u16,
}

impl DiscoveryOptions {
    pub fn validate(&self) -> Result<()> {
        if self.port == 0 && self.discovery_type != DiscoveryType::LocalHost {
            return Err(Error::InvalidConfiguration {
                field: "discovery.port".to_string(),
                reason: "port cannot be zero in remote mode".to_string(),
            });
        }
        Ok(())
    }
}

/// Settings for an [`crate::Environment`]
#[derive(Clone)]
pub struct EnvironmentOptions {
    /// TTL of activation-location cache entries, in milliseconds.
    /// Defaults to the registry's heartbeat TTL.
    pub activation_cache_ttl_ms: Option<u64>,
    /// Disable the activation-location cache entirely (every invocation
    /// pays a registry round-trip).
    pub disable_activation_cache: bool,
    /// Interval between background heartbeats.
    pub heartbeat_interval_ms: u64,
    /// Discovery options.
    pub discovery: DiscoveryOptions,
    /// Modules implemented by the embedding program rather than as
    /// registered bytes. Registered idempotently on environment start.
    pub in_process_modules: HashMap<ModuleId, Arc<dyn Module>>,
    /// Server-configured host functions callable by actors.
    pub custom_host_fns: HashMap<String, CustomHostFn>,
    /// Compiler for registered module bytes (e.g. a WASM engine).
    pub module_loader: Option<Arc<dyn ModuleLoader>>,
    /// Clock used for cache expiry and background timing.
    pub time: Arc<dyn TimeProvider>,
}

impl Default for EnvironmentOptions {
    fn default() -> Self {
        Self {
            activation_cache_ttl_ms: None,
            disable_activation_cache: false,
            heartbeat_interval_ms: HEARTBEAT_INTERVAL_MS,
            discovery: DiscoveryOptions::default(),
            in_process_modules: HashMap::new(),
            custom_host_fns: HashMap::new(),
            module_loader: None,
            time: Arc::new(WallClock::new()),
        }
    }
}

impl EnvironmentOptions {
    pub fn validate(&self) -> Result<()> {
        if self.heartbeat_interval_ms == 0 {
            return Err(Error::InvalidConfiguration {
                field: "heartbeat_interval_ms".to_string(),
                reason: "must be positive".to_string(),
            });
        }
        self.discovery.validate()
    }
}
