//! Error types for Nixie
//!
//! One workspace-wide taxonomy with explicit context, using thiserror.
//! Retriable variants are classified by [`Error::is_retriable`] so callers
//! can refresh their version stamp / activation cache and try again.

use thiserror::Error;

/// Result type alias for Nixie operations
pub type Result<T> = std::result::Result<T, Error>;

/// Nixie error types
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Lookup Errors
    // =========================================================================
    #[error("actor: {actor_id} does not exist in namespace: {namespace}")]
    ActorNotFound {
        namespace: String,
        actor_id: String,
    },

    #[error("actor: {actor_id} already exists in namespace: {namespace}")]
    ActorAlreadyExists {
        namespace: String,
        actor_id: String,
    },

    #[error("module: {module_id} does not exist in namespace: {namespace}")]
    ModuleNotFound {
        namespace: String,
        module_id: String,
    },

    #[error("module: {module_id} already exists in namespace: {namespace}")]
    ModuleAlreadyExists {
        namespace: String,
        module_id: String,
    },

    #[error("server: {server_id} does not exist")]
    ServerNotFound { server_id: String },

    // =========================================================================
    // Placement / Ownership
    // =========================================================================
    #[error("0 live servers available for new activation")]
    NoLiveServers,

    #[error("request for server: {requested} received by server: {actual}, cannot fulfil")]
    WrongServer { requested: String, actual: String },

    #[error(
        "server heartbeat({heartbeat_version_stamp}) + ttl({heartbeat_ttl}) < version stamp({version_stamp})"
    )]
    StaleHeartbeat {
        heartbeat_version_stamp: i64,
        heartbeat_ttl: i64,
        version_stamp: i64,
    },

    #[error("server version({current}) != server version from reference({reference})")]
    ServerVersionMismatch { current: i64, reference: i64 },

    #[error(
        "cannot begin transaction for actor: {actor_id}, fencing mismatch: \
         activation is ({activation_server_id}, {activation_server_version}), \
         caller is ({caller_server_id}, {caller_server_version})"
    )]
    FencingMismatch {
        actor_id: String,
        activation_server_id: String,
        activation_server_version: i64,
        caller_server_id: String,
        caller_server_version: i64,
    },

    // =========================================================================
    // Module / Instantiation
    // =========================================================================
    #[error("error loading module: {module_id}, reason: {reason}")]
    ModuleLoadFailed { module_id: String, reason: String },

    #[error("error instantiating actor: {actor_id} from module: {module_id}, reason: {reason}")]
    InstantiationFailed {
        actor_id: String,
        module_id: String,
        reason: String,
    },

    #[error("unknown host function: {name}")]
    UnknownHostFunction { name: String },

    // =========================================================================
    // Storage / Transactions
    // =========================================================================
    #[error("storage error: {reason}")]
    Storage { reason: String },

    #[error("transaction already terminated")]
    TransactionTerminated,

    #[error("durable KV is not available: {context}")]
    KvUnavailable { context: String },

    // =========================================================================
    // Transport / Validation
    // =========================================================================
    #[error("transport error: {reason}")]
    Transport { reason: String },

    #[error("invalid argument: {reason}")]
    InvalidArgument { reason: String },

    #[error("invalid configuration: {field}, reason: {reason}")]
    InvalidConfiguration { field: String, reason: String },

    // =========================================================================
    // User / Internal
    // =========================================================================
    /// Error returned by actor code. Surfaced to the caller verbatim; the
    /// invocation's implicit KV transaction is cancelled.
    #[error("{message}")]
    UserError { message: String },

    #[error("serialization failed: {reason}")]
    SerializationFailed { reason: String },

    #[error("internal error: {message}")]
    Internal { message: String },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    pub fn actor_not_found(namespace: impl Into<String>, actor_id: impl Into<String>) -> Self {
        Self::ActorNotFound {
            namespace: namespace.into(),
            actor_id: actor_id.into(),
        }
    }

    pub fn module_not_found(namespace: impl Into<String>, module_id: impl Into<String>) -> Self {
        Self::ModuleNotFound {
            namespace: namespace.into(),
            module_id: module_id.into(),
        }
    }

    pub fn storage(reason: impl Into<String>) -> Self {
        Self::Storage {
            reason: reason.into(),
        }
    }

    pub fn transport(reason: impl Into<String>) -> Self {
        Self::Transport {
            reason: reason.into(),
        }
    }

    pub fn invalid_argument(reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            reason: reason.into(),
        }
    }

    pub fn user(message: impl Into<String>) -> Self {
        Self::UserError {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Whether the caller may retry after refreshing its version stamp and
    /// activation cache.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            Self::NoLiveServers
                | Self::StaleHeartbeat { .. }
                | Self::ServerVersionMismatch { .. }
                | Self::WrongServer { .. }
                | Self::Transport { .. }
        )
    }

    /// Whether this error indicates the target actor has never been created.
    ///
    /// Callers use this to decide whether `create_if_not_exist` applies.
    pub fn is_actor_not_found(&self) -> bool {
        matches!(self, Self::ActorNotFound { .. })
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::SerializationFailed {
            reason: err.to_string(),
        }
    }
}
