//! Error taxonomies
//!
//! Two public taxonomies:
//!
//! - [`AuthError`] - credential resolution failures. Terminal for the
//!   request, never retried, and deliberately uniform in response shape so
//!   callers cannot enumerate server existence from timing or payload
//!   differences.
//! - [`DomainError`] - everything the router can return to a client. Every
//!   backend/transport failure is normalized into one of these kinds before
//!   it crosses the protocol boundary; the backend transport's native error
//!   shape never leaks.

use thiserror::Error;
use uuid::Uuid;

/// Credential resolution failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    /// No credential was presented and the target server does not allow
    /// anonymous access.
    #[error("authentication required")]
    MissingCredential,
    /// The credential failed validation (unknown key, revoked key, bad
    /// signature, expired token). Collapsed into one kind on purpose.
    #[error("invalid credential")]
    InvalidCredential,
    /// The credential is valid but its organization does not own the
    /// requested server. Distinct from not-found; never merged with it.
    #[error("organization mismatch")]
    OrganizationMismatch,
    /// The requested server does not exist (or is deleted).
    #[error("server not found")]
    ServerNotFound,
}

impl AuthError {
    /// Stable identifier used in logs and notification events.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MissingCredential => "missing_credential",
            Self::InvalidCredential => "invalid_credential",
            Self::OrganizationMismatch => "organization_mismatch",
            Self::ServerNotFound => "server_not_found",
        }
    }
}

/// Request-visible failures, each with a stable protocol error code.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DomainError {
    /// Malformed tool identifier: no namespace separator, or a namespace
    /// unknown to the gateway.
    #[error("invalid tool name '{0}'")]
    InvalidToolName(String),
    /// Well-formed identifier whose tool is absent from the owning backend's
    /// catalog.
    #[error("tool '{0}' not found")]
    ToolNotFound(String),
    #[error("backend server {0} not found")]
    BackendServerNotFound(Uuid),
    /// The request reached routing without a resolved authorization context.
    #[error("authorization context missing")]
    AuthContextMissing,
    #[error("organization does not own the requested server")]
    OrganizationMismatch,
    /// The pooled connection for the backend is closed or past its retry
    /// ceiling.
    #[error("backend server {0} unavailable")]
    BackendUnavailable(Uuid),
    #[error("call timed out after {0} seconds")]
    CallTimeout(u64),
    #[error("transport error: {0}")]
    TransportError(String),
    #[error("unknown error: {0}")]
    UnknownError(String),
}

impl DomainError {
    /// Protocol-level error code, carried in the `error.code` field of a
    /// response envelope. Codes are stable contract; never renumber.
    pub fn code(&self) -> i32 {
        match self {
            Self::UnknownError(_) => -32000,
            Self::AuthContextMissing => -32001,
            Self::OrganizationMismatch => -32003,
            Self::BackendServerNotFound(_) => -32004,
            Self::InvalidToolName(_) => -32005,
            Self::ToolNotFound(_) => -32006,
            Self::BackendUnavailable(_) => -32007,
            Self::CallTimeout(_) => -32008,
            Self::TransportError(_) => -32009,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidToolName(_) => "invalid_tool_name",
            Self::ToolNotFound(_) => "tool_not_found",
            Self::BackendServerNotFound(_) => "backend_server_not_found",
            Self::AuthContextMissing => "auth_context_missing",
            Self::OrganizationMismatch => "organization_mismatch",
            Self::BackendUnavailable(_) => "backend_unavailable",
            Self::CallTimeout(_) => "call_timeout",
            Self::TransportError(_) => "transport_error",
            Self::UnknownError(_) => "unknown_error",
        }
    }
}
