//! Collaborator access traits
//!
//! These traits define the gateway's view of its external collaborators -
//! the relational persistence layer and the notification side-channel -
//! without specifying an implementation. Production wires file- or
//! API-backed implementations; tests wire in-memory mocks.

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::{ApiKeyRecord, BackendServerRecord, GatewayEventEnvelope};

/// Result type for collaborator operations
pub type RepoResult<T> = anyhow::Result<T>;

/// Backend server configuration lookups.
///
/// Soft-deleted records are returned with their `deleted` flag set; callers
/// treat them as absent and evict any cache entries keyed by their id.
#[async_trait]
pub trait ServerRepository: Send + Sync {
    /// Look up one server by id.
    async fn lookup(&self, id: Uuid) -> RepoResult<Option<BackendServerRecord>>;

    /// Resolve a namespace prefix to its owning server, across all
    /// organizations. The router needs the cross-organization view to tell
    /// an unknown namespace apart from a foreign one.
    async fn find_by_namespace(&self, namespace: &str) -> RepoResult<Option<BackendServerRecord>>;

    /// All servers owned by one organization.
    async fn list_for_organization(
        &self,
        organization_id: Uuid,
    ) -> RepoResult<Vec<BackendServerRecord>>;
}

/// API key lookups.
#[async_trait]
pub trait ApiKeyRepository: Send + Sync {
    /// Find a key by its hex-encoded SHA-256 fingerprint. Revoked keys are
    /// returned (with `revoked` set) so the resolver can distinguish and
    /// still fail them.
    async fn find_by_hash(&self, key_hash: &str) -> RepoResult<Option<ApiKeyRecord>>;
}

/// Fire-and-forget notification side-channel (Slack or similar).
///
/// Implementations must not block request handling; failures are logged and
/// swallowed by the caller.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, event: GatewayEventEnvelope);
}
