//! Backend server records
//!
//! A `BackendServerRecord` describes one downstream tool server: where to
//! reach it, how to authenticate to it, and which transform settings apply to
//! traffic proxied through it. Records are owned by the persistence
//! collaborator and read-only to the gateway; the gateway caches them with a
//! TTL and must drop cache entries when a record is deleted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{PiiInfoType, PiiMaskingMode};

/// Separator between a server's namespace and a tool name in externally
/// visible tool identifiers. Namespaces must never contain it, which keeps
/// the composition reversible by splitting on the first occurrence.
pub const NAMESPACE_SEPARATOR: char = '_';

/// One configured backend tool server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendServerRecord {
    pub id: Uuid,
    /// Owning organization. Requests resolved to a different organization
    /// must fail with an organization-mismatch error.
    pub organization_id: Uuid,
    pub name: String,
    /// Namespace prefix for every tool this server exposes.
    pub namespace: String,
    /// Transport endpoint, `host:port` for the framed JSON transport.
    pub endpoint: String,
    /// Credential presented to the backend during the channel handshake.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
    /// Whether unauthenticated clients may address this server.
    #[serde(default)]
    pub allow_anonymous: bool,
    #[serde(default)]
    pub pii_masking_mode: PiiMaskingMode,
    #[serde(default)]
    pub pii_info_types: Vec<PiiInfoType>,
    #[serde(default)]
    pub compression_enabled: bool,
    /// Soft-delete marker. Deleted records behave as not-found and must be
    /// evicted from any cache keyed by `id`.
    #[serde(default)]
    pub deleted: bool,
    pub created_at: DateTime<Utc>,
}

impl BackendServerRecord {
    /// Validate the namespacing prefix: lowercase alphanumeric plus hyphen,
    /// non-empty, and free of the separator character.
    pub fn is_valid_namespace(namespace: &str) -> bool {
        !namespace.is_empty()
            && namespace
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    }
}
