//! Bearer token verification
//!
//! Verifies JWT signatures against the identity provider's published key set.
//! The key set is cached: a fresh copy is served from memory, a `kid` missing
//! from the cached set forces one refresh (key rotation), and fetch failures
//! open a short negative-cache window so a flapping issuer cannot turn every
//! request into a key fetch.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use jsonwebtoken::jwk::{Jwk, JwkSet};
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};
use uuid::Uuid;

use unigate_core::{AuthError, Claims};

/// Identity-provider collaborator: exposes the signature key set the issuer
/// publishes for token verification.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn published_keys(&self) -> anyhow::Result<JwkSet>;
}

#[derive(Default)]
struct KeySetState {
    cached: Option<(Arc<JwkSet>, Instant)>,
    last_failure: Option<Instant>,
}

/// Raw claim set expected from the issuer.
#[derive(Debug, Deserialize)]
struct RawClaims {
    sub: String,
    org_id: Uuid,
    exp: i64,
}

/// Verifies bearer tokens against a cached identity-provider key set.
pub struct TokenVerifier {
    provider: Arc<dyn IdentityProvider>,
    ttl: Duration,
    negative_ttl: Duration,
    state: RwLock<KeySetState>,
    /// Serializes fetches so concurrent misses share one round-trip.
    fetch_lock: Mutex<()>,
}

impl TokenVerifier {
    pub fn new(provider: Arc<dyn IdentityProvider>, ttl: Duration, negative_ttl: Duration) -> Self {
        Self {
            provider,
            ttl,
            negative_ttl,
            state: RwLock::new(KeySetState::default()),
            fetch_lock: Mutex::new(()),
        }
    }

    /// Verify a token and extract its claims. Every failure collapses into
    /// `InvalidCredential`; the caller must not learn why verification
    /// failed.
    pub async fn verify(&self, token: &str) -> Result<Claims, AuthError> {
        let header = decode_header(token).map_err(|e| {
            debug!("[TokenVerifier] Unparseable token header: {}", e);
            AuthError::InvalidCredential
        })?;

        let key_set = self.key_set(false).await?;
        let jwk = match self.select_key(&key_set, header.kid.as_deref()) {
            Some(jwk) => jwk,
            None => {
                // kid absent from the cached set - the issuer may have
                // rotated keys since the last fetch. Refresh once.
                let key_set = self.key_set(true).await?;
                self.select_key(&key_set, header.kid.as_deref())
                    .ok_or(AuthError::InvalidCredential)?
            }
        };

        // A key that declares its algorithm pins the header to it.
        if let Some(declared) = jwk.common.key_algorithm {
            let declared: Result<Algorithm, _> = declared.to_string().parse();
            if declared.map(|a| a != header.alg).unwrap_or(true) {
                debug!("[TokenVerifier] Token algorithm does not match key");
                return Err(AuthError::InvalidCredential);
            }
        }

        let decoding_key =
            DecodingKey::from_jwk(&jwk).map_err(|_| AuthError::InvalidCredential)?;
        let mut validation = Validation::new(header.alg);
        validation.validate_aud = false;

        let data = decode::<RawClaims>(token, &decoding_key, &validation).map_err(|e| {
            debug!("[TokenVerifier] Token rejected: {}", e);
            AuthError::InvalidCredential
        })?;

        Ok(Claims {
            sub: data.claims.sub,
            org_id: data.claims.org_id,
            exp: data.claims.exp,
        })
    }

    fn select_key(&self, key_set: &JwkSet, kid: Option<&str>) -> Option<Jwk> {
        match kid {
            Some(kid) => key_set.find(kid).cloned(),
            None => key_set.keys.first().cloned(),
        }
    }

    /// Return the cached key set, fetching when stale or when `force` is set.
    async fn key_set(&self, force: bool) -> Result<Arc<JwkSet>, AuthError> {
        let now = Instant::now();
        if !force {
            let state = self.state.read().await;
            if let Some((keys, fetched_at)) = &state.cached {
                if now.duration_since(*fetched_at) < self.ttl {
                    return Ok(Arc::clone(keys));
                }
            }
            if let Some(failed_at) = state.last_failure {
                if now.duration_since(failed_at) < self.negative_ttl {
                    return Err(AuthError::InvalidCredential);
                }
            }
        }

        let _guard = self.fetch_lock.lock().await;

        // Another caller may have refreshed while we waited on the lock.
        if !force {
            let state = self.state.read().await;
            if let Some((keys, fetched_at)) = &state.cached {
                if Instant::now().duration_since(*fetched_at) < self.ttl {
                    return Ok(Arc::clone(keys));
                }
            }
        }

        match self.provider.published_keys().await {
            Ok(keys) => {
                let keys = Arc::new(keys);
                let mut state = self.state.write().await;
                state.cached = Some((Arc::clone(&keys), Instant::now()));
                state.last_failure = None;
                debug!("[TokenVerifier] Refreshed key set ({} keys)", keys.keys.len());
                Ok(keys)
            }
            Err(e) => {
                warn!("[TokenVerifier] Key set fetch failed: {}", e);
                let mut state = self.state.write().await;
                state.last_failure = Some(Instant::now());
                // A stale set is still better than nothing while the issuer
                // is unreachable.
                if let Some((keys, _)) = &state.cached {
                    return Ok(Arc::clone(keys));
                }
                Err(AuthError::InvalidCredential)
            }
        }
    }
}
