//! Limits and protocol constants for Nixie
//!
//! All limits are explicit, use big-endian naming (most significant first),
//! and include units in the name.

// =============================================================================
// Identifier Limits
// =============================================================================

/// Maximum length of a namespace in bytes
pub const NAMESPACE_LENGTH_BYTES_MAX: usize = 128;

/// Maximum length of an actor ID in bytes
pub const ACTOR_ID_LENGTH_BYTES_MAX: usize = 256;

/// Maximum length of a module ID in bytes
pub const MODULE_ID_LENGTH_BYTES_MAX: usize = 256;

/// Maximum length of a server ID in bytes
pub const SERVER_ID_LENGTH_BYTES_MAX: usize = 256;

// =============================================================================
// Heartbeat / Liveness
// =============================================================================

/// Maximum gap between server heartbeats before the registry considers the
/// server dead, expressed in version-stamp ticks (~1 per microsecond).
pub const HEARTBEAT_TTL_MICROS: i64 = 5_000_000;

/// Interval between heartbeats sent by each environment (1 sec)
pub const HEARTBEAT_INTERVAL_MS: u64 = 1000;

// =============================================================================
// Storage Limits
// =============================================================================

/// Maximum size of a single stored value part in bytes. Module binaries
/// larger than this are sharded across multiple KV pairs.
pub const MODULE_PART_SIZE_BYTES_MAX: usize = 99_999;

// =============================================================================
// Activation Cache
// =============================================================================

/// Maximum number of entries in the per-server activation-location cache
pub const ACTIVATION_CACHE_ENTRIES_COUNT_MAX: usize = 1_000_000;

/// Interval at which the activation-location cache sweeps expired entries
pub const ACTIVATION_CACHE_SWEEP_INTERVAL_MS: u64 = 1000;

// =============================================================================
// Protocol
// =============================================================================

/// Operation invoked exactly once on a freshly instantiated actor before any
/// other operation. A failure here is fatal to the activation.
pub const OPERATION_STARTUP: &str = "startup";

/// Operation invoked on a cached actor instance when it is closed.
pub const OPERATION_SHUTDOWN: &str = "shutdown";

/// Sentinel server ID that disables the ownership server-ID check. Used by
/// DNS-style registries that hand the same server ID to every peer.
pub const SERVER_ID_WILDCARD: &str = "dns-wildcard";

// Compile-time validity checks.
const _: () = {
    assert!(HEARTBEAT_TTL_MICROS > 0);
    assert!(HEARTBEAT_TTL_MICROS as u64 / 1000 > HEARTBEAT_INTERVAL_MS);
    assert!(MODULE_PART_SIZE_BYTES_MAX < 100_000);
    assert!(ACTIVATION_CACHE_ENTRIES_COUNT_MAX >= 1000);
};
