//! Credential & Context Resolver
//!
//! Validates inbound credentials and produces the immutable per-request
//! [`AuthorizationContext`]. Three credential kinds are supported - none,
//! opaque API key, bearer JWT - resolved through one exhaustive match.
//!
//! Beyond cache population the resolver has no side effects: it is a pure
//! function of (credential, target server), which keeps it trivially
//! testable. All failures are terminal for the request and share one
//! response shape; in particular, organization mismatch is never folded into
//! not-found, and callers cannot probe server existence through shape or
//! detail differences.

mod verifier;

pub use verifier::{IdentityProvider, TokenVerifier};

use std::fmt::Write as _;
use std::sync::Arc;

use sha2::{Digest, Sha256};
use tracing::{debug, warn};
use uuid::Uuid;

use unigate_core::{
    AuthError, AuthMethod, AuthorizationContext, BackendServerRecord, ServerRepository,
};
use unigate_core::ApiKeyRepository;

use crate::cache::GatewayCaches;

/// Prefix carried by every issued API key. Lets the HTTP layer tell opaque
/// keys apart from JWTs inside a shared `Authorization: Bearer` scheme.
pub const API_KEY_PREFIX: &str = "ug_";

/// An inbound credential, extracted from transport headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credential {
    None,
    ApiKey(String),
    Bearer(String),
}

impl Credential {
    /// Classify the value of an `Authorization` header. `Bearer`-scheme
    /// values carrying the API key prefix are opaque keys, everything else
    /// under `Bearer` is treated as a JWT.
    pub fn from_authorization(header: Option<&str>) -> Self {
        match header {
            Some(value) => match value.strip_prefix("Bearer ") {
                Some(token) if token.starts_with(API_KEY_PREFIX) => {
                    Self::ApiKey(token.to_string())
                }
                Some(token) => Self::Bearer(token.to_string()),
                None => Self::None,
            },
            None => Self::None,
        }
    }
}

/// Hex-encoded SHA-256, used both for stored API key fingerprints and for
/// cache keys (raw credential material never becomes a cache key).
pub fn sha256_hex(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    digest.iter().fold(String::with_capacity(64), |mut out, b| {
        let _ = write!(out, "{:02x}", b);
        out
    })
}

/// Resolves credentials into authorization contexts.
pub struct CredentialResolver {
    servers: Arc<dyn ServerRepository>,
    api_keys: Arc<dyn ApiKeyRepository>,
    verifier: Arc<TokenVerifier>,
    caches: Arc<GatewayCaches>,
}

impl CredentialResolver {
    pub fn new(
        servers: Arc<dyn ServerRepository>,
        api_keys: Arc<dyn ApiKeyRepository>,
        verifier: Arc<TokenVerifier>,
        caches: Arc<GatewayCaches>,
    ) -> Self {
        Self {
            servers,
            api_keys,
            verifier,
            caches,
        }
    }

    /// Resolve a credential against a requested server.
    ///
    /// The resolved organization must own the requested server; a mismatch
    /// is `OrganizationMismatch`, a hard failure distinct from
    /// `ServerNotFound`.
    pub async fn resolve(
        &self,
        credential: &Credential,
        requested_server_id: Uuid,
    ) -> Result<AuthorizationContext, AuthError> {
        let server = self.server_record(requested_server_id).await?;

        match credential {
            Credential::None => {
                if server.allow_anonymous {
                    debug!(
                        server_id = %server.id,
                        "[CredentialResolver] Anonymous access permitted"
                    );
                    Ok(AuthorizationContext::anonymous(&server))
                } else {
                    Err(AuthError::MissingCredential)
                }
            }
            Credential::ApiKey(key) => self.resolve_api_key(key, &server).await,
            Credential::Bearer(token) => self.resolve_bearer(token, &server).await,
        }
    }

    async fn resolve_api_key(
        &self,
        key: &str,
        server: &BackendServerRecord,
    ) -> Result<AuthorizationContext, AuthError> {
        let fingerprint = sha256_hex(key);
        let cache_key = format!("{}:{}", fingerprint, server.id);
        if let Some(ctx) = self.caches.auth_decisions.get(&cache_key) {
            return Ok(ctx);
        }

        let record = self
            .api_keys
            .find_by_hash(&fingerprint)
            .await
            .map_err(|e| {
                warn!("[CredentialResolver] API key lookup failed: {}", e);
                AuthError::InvalidCredential
            })?
            .ok_or(AuthError::InvalidCredential)?;

        if record.revoked {
            debug!(api_key_id = %record.id, "[CredentialResolver] Revoked key presented");
            return Err(AuthError::InvalidCredential);
        }
        if record.organization_id != server.organization_id {
            return Err(AuthError::OrganizationMismatch);
        }

        let ctx = AuthorizationContext {
            auth_method: AuthMethod::ApiKey,
            organization_id: record.organization_id,
            user_id: Some(record.user_id.clone()),
            mcp_server_id: server.id,
            api_key_id: Some(record.id),
            pii_masking_mode: server.pii_masking_mode,
            pii_info_types: server.pii_info_types.clone(),
            compression_enabled: server.compression_enabled,
        };
        self.caches.auth_decisions.set(cache_key, ctx.clone());
        Ok(ctx)
    }

    async fn resolve_bearer(
        &self,
        token: &str,
        server: &BackendServerRecord,
    ) -> Result<AuthorizationContext, AuthError> {
        let cache_key = format!("{}:{}", sha256_hex(token), server.id);
        if let Some(ctx) = self.caches.auth_decisions.get(&cache_key) {
            return Ok(ctx);
        }

        let claims = self.verifier.verify(token).await?;
        if claims.org_id != server.organization_id {
            return Err(AuthError::OrganizationMismatch);
        }

        let ctx = AuthorizationContext {
            auth_method: AuthMethod::Bearer,
            organization_id: claims.org_id,
            user_id: Some(claims.sub),
            mcp_server_id: server.id,
            api_key_id: None,
            pii_masking_mode: server.pii_masking_mode,
            pii_info_types: server.pii_info_types.clone(),
            compression_enabled: server.compression_enabled,
        };
        self.caches.auth_decisions.set(cache_key, ctx.clone());
        Ok(ctx)
    }

    /// Server record lookup through the record cache. Deleted records evict
    /// their cache entries and resolve as not-found.
    async fn server_record(&self, id: Uuid) -> Result<BackendServerRecord, AuthError> {
        if let Some(record) = self.caches.server_records.get(&id) {
            if record.deleted {
                self.caches.invalidate_server(id);
                return Err(AuthError::ServerNotFound);
            }
            return Ok(record);
        }

        let record = self
            .servers
            .lookup(id)
            .await
            .map_err(|e| {
                warn!("[CredentialResolver] Server lookup failed: {}", e);
                AuthError::ServerNotFound
            })?
            .ok_or(AuthError::ServerNotFound)?;

        if record.deleted {
            self.caches.invalidate_server(id);
            return Err(AuthError::ServerNotFound);
        }

        self.caches.server_records.set(id, record.clone());
        Ok(record)
    }
}
