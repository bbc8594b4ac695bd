//! Verified bearer-token claims

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Claims extracted from a verified bearer token.
///
/// The issuer embeds the organization in a private claim (`org_id`); tokens
/// without it cannot be resolved to an authorization context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (`sub`) - the authenticated user.
    pub sub: String,
    /// Organization the token was issued for.
    pub org_id: Uuid,
    /// Expiry as a unix timestamp (`exp`).
    pub exp: i64,
}
