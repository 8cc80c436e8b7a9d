//! Inter-server invocation client seam
//!
//! The wire transport (HTTP, gRPC, ...) is supplied by the embedding
//! program. The environment only needs one call: deliver an invocation to
//! the server a reference is pinned to, carrying the ownership-gate
//! inputs.

use async_trait::async_trait;
use bytes::Bytes;
use nixie_core::{ActorReference, Error, Result};

/// Client used to invoke actors activated on remote servers
#[async_trait]
pub trait RemoteClient: Send + Sync {
    /// Invoke `operation` on the server the reference points at
    ///
    /// The receiving server verifies ownership against
    /// `(version_stamp, reference.server_id, reference.server_version)`
    /// before executing.
    async fn invoke_actor_remote(
        &self,
        version_stamp: i64,
        reference: &ActorReference,
        operation: &str,
        payload: Bytes,
    ) -> Result<Bytes>;
}

/// Client used when no transport is configured
///
/// Every call fails with a retriable transport error. In-process peers are
/// still reachable through the peer router, which is consulted first.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRemoteClient;

#[async_trait]
impl RemoteClient for NoRemoteClient {
    async fn invoke_actor_remote(
        &self,
        _version_stamp: i64,
        reference: &ActorReference,
        _operation: &str,
        _payload: Bytes,
    ) -> Result<Bytes> {
        Err(Error::transport(format!(
            "no remote client configured, cannot reach server: {} at address: {}",
            reference.server_id(),
            reference.address()
        )))
    }
}
