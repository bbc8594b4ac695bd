//! API key records
//!
//! Opaque API keys are stored by the persistence collaborator as SHA-256
//! fingerprints; the gateway never sees stored plaintext. Lookup is by
//! fingerprint only.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A stored API key, as returned by the persistence collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKeyRecord {
    pub id: Uuid,
    pub organization_id: Uuid,
    /// Principal the key was issued to.
    pub user_id: String,
    /// Hex-encoded SHA-256 of the opaque key string.
    pub key_hash: String,
    /// Revoked keys fail validation regardless of any cached decision.
    #[serde(default)]
    pub revoked: bool,
    pub created_at: DateTime<Utc>,
}
