//! Gateway events for the notification side-channel
//!
//! Events are facts that already happened, never mutated after construction.
//! They are handed to the [`Notifier`](crate::repository::Notifier)
//! collaborator fire-and-forget; delivery failures must not affect request
//! handling.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Events emitted by the gateway core.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GatewayEvent {
    /// A session exceeded the inactivity timeout and was closed by the
    /// maintenance loop.
    SessionExpired {
        session_id: Uuid,
        organization_id: Uuid,
        idle_secs: u64,
    },
    /// A pooled backend connection hit the consecutive-failure ceiling and
    /// was removed from the pool.
    BackendConnectionClosed {
        server_id: Uuid,
        consecutive_failures: u32,
        last_error: Option<String>,
    },
    /// A ready backend connection observed a transport error and is
    /// scheduled for reconnection.
    BackendConnectionDegraded { server_id: Uuid, error: String },
    /// A credential failed validation. Carries no credential material.
    AuthenticationFailed {
        requested_server_id: Uuid,
        failure_kind: String,
    },
}

/// Envelope pairing an event with its emission time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayEventEnvelope {
    pub occurred_at: DateTime<Utc>,
    #[serde(flatten)]
    pub event: GatewayEvent,
}

impl GatewayEventEnvelope {
    pub fn now(event: GatewayEvent) -> Self {
        Self {
            occurred_at: Utc::now(),
            event,
        }
    }
}
