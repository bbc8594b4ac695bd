//! Per-request authorization context
//!
//! An `AuthorizationContext` is produced by the credential resolver once per
//! request, carried immutably through routing and transformation, and
//! discarded when the request ends. Nothing downstream may widen it.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// How the caller authenticated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMethod {
    /// No credential; permitted only for servers that allow anonymous access
    Anonymous,
    /// Opaque API key validated against the persistence collaborator
    ApiKey,
    /// Bearer JWT verified against the identity provider's key set
    Bearer,
}

/// Which direction(s) of a tool call get sensitive-data masking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PiiMaskingMode {
    #[default]
    Disabled,
    Request,
    Response,
    Both,
}

impl PiiMaskingMode {
    pub fn masks_request(&self) -> bool {
        matches!(self, Self::Request | Self::Both)
    }

    pub fn masks_response(&self) -> bool {
        matches!(self, Self::Response | Self::Both)
    }
}

/// Detectable sensitive-data categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PiiInfoType {
    EmailAddress,
    PhoneNumber,
    CreditCardNumber,
    SocialSecurityNumber,
    IpAddress,
}

impl PiiInfoType {
    /// All known info types, used when a server enables masking without
    /// restricting the categories.
    pub fn all() -> Vec<PiiInfoType> {
        vec![
            Self::EmailAddress,
            Self::PhoneNumber,
            Self::CreditCardNumber,
            Self::SocialSecurityNumber,
            Self::IpAddress,
        ]
    }
}

/// Immutable per-request authorization context.
///
/// Invariant: `organization_id` owns `mcp_server_id`. The resolver enforces
/// this before construction; a mismatch is a hard authorization failure and
/// never silently corrected.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorizationContext {
    pub auth_method: AuthMethod,
    pub organization_id: Uuid,
    /// Authenticated principal. For API keys this is the key's owner; for
    /// bearer tokens the `sub` claim; anonymous callers have no user.
    pub user_id: Option<String>,
    /// The server the request was addressed to.
    pub mcp_server_id: Uuid,
    pub api_key_id: Option<Uuid>,
    pub pii_masking_mode: PiiMaskingMode,
    pub pii_info_types: Vec<PiiInfoType>,
    pub compression_enabled: bool,
}

impl AuthorizationContext {
    /// Context for a server that allows anonymous access. Transform settings
    /// still come from the server record.
    pub fn anonymous(server: &super::BackendServerRecord) -> Self {
        Self {
            auth_method: AuthMethod::Anonymous,
            organization_id: server.organization_id,
            user_id: None,
            mcp_server_id: server.id,
            api_key_id: None,
            pii_masking_mode: server.pii_masking_mode,
            pii_info_types: server.pii_info_types.clone(),
            compression_enabled: server.compression_enabled,
        }
    }
}
