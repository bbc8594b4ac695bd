//! Standalone collaborator implementations
//!
//! The gateway consumes its collaborators through traits; this module holds
//! the implementations used by the `unigate` binary: a JSON-file-backed
//! repository pair for standalone deployments, a JWKS fetcher for the
//! identity provider, and a webhook notifier for the side-channel.

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use jsonwebtoken::jwk::JwkSet;
use rand::RngCore;
use tracing::warn;
use url::Url;
use uuid::Uuid;

use unigate_core::{
    ApiKeyRecord, ApiKeyRepository, BackendServerRecord, GatewayEventEnvelope, Notifier,
    RepoResult, ServerRepository,
};

use crate::auth::{IdentityProvider, API_KEY_PREFIX};

/// Generate a fresh opaque API key. The caller stores only its SHA-256
/// fingerprint; the plaintext is shown once.
pub fn generate_api_key() -> String {
    let mut bytes = [0u8; 24];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!("{}{}", API_KEY_PREFIX, URL_SAFE_NO_PAD.encode(bytes))
}

/// Server and API key records loaded from one JSON file.
#[derive(Debug, serde::Deserialize)]
struct GatewayFile {
    #[serde(default)]
    servers: Vec<BackendServerRecord>,
    #[serde(default)]
    api_keys: Vec<ApiKeyRecord>,
}

/// In-memory repository pair backed by a deployment config file.
pub struct FileBackedRepository {
    servers: HashMap<Uuid, BackendServerRecord>,
    by_namespace: HashMap<String, Uuid>,
    api_keys_by_hash: HashMap<String, ApiKeyRecord>,
}

impl FileBackedRepository {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let file: GatewayFile = serde_json::from_str(&raw)?;

        let mut servers = HashMap::new();
        let mut by_namespace = HashMap::new();
        for record in file.servers {
            if !BackendServerRecord::is_valid_namespace(&record.namespace) {
                anyhow::bail!(
                    "server {} has invalid namespace '{}'",
                    record.id,
                    record.namespace
                );
            }
            if let Some(previous) = by_namespace.insert(record.namespace.clone(), record.id) {
                anyhow::bail!(
                    "namespace '{}' is claimed by both {} and {}",
                    record.namespace,
                    previous,
                    record.id
                );
            }
            servers.insert(record.id, record);
        }

        let api_keys_by_hash = file
            .api_keys
            .into_iter()
            .map(|k| (k.key_hash.clone(), k))
            .collect();

        Ok(Self {
            servers,
            by_namespace,
            api_keys_by_hash,
        })
    }
}

#[async_trait]
impl ServerRepository for FileBackedRepository {
    async fn lookup(&self, id: Uuid) -> RepoResult<Option<BackendServerRecord>> {
        Ok(self.servers.get(&id).cloned())
    }

    async fn find_by_namespace(&self, namespace: &str) -> RepoResult<Option<BackendServerRecord>> {
        Ok(self
            .by_namespace
            .get(namespace)
            .and_then(|id| self.servers.get(id))
            .cloned())
    }

    async fn list_for_organization(
        &self,
        organization_id: Uuid,
    ) -> RepoResult<Vec<BackendServerRecord>> {
        Ok(self
            .servers
            .values()
            .filter(|r| r.organization_id == organization_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl ApiKeyRepository for FileBackedRepository {
    async fn find_by_hash(&self, key_hash: &str) -> RepoResult<Option<ApiKeyRecord>> {
        Ok(self.api_keys_by_hash.get(key_hash).cloned())
    }
}

/// Fetches the identity provider's published key set over HTTPS.
pub struct HttpIdentityProvider {
    client: reqwest::Client,
    jwks_url: Url,
}

impl HttpIdentityProvider {
    pub fn new(jwks_url: Url) -> Self {
        Self {
            client: reqwest::Client::new(),
            jwks_url,
        }
    }
}

#[async_trait]
impl IdentityProvider for HttpIdentityProvider {
    async fn published_keys(&self) -> anyhow::Result<JwkSet> {
        let response = self
            .client
            .get(self.jwks_url.clone())
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json().await?)
    }
}

/// Identity provider for deployments without an OIDC issuer: every bearer
/// token fails verification, leaving API keys as the only credential kind.
pub struct DisabledIdentityProvider;

#[async_trait]
impl IdentityProvider for DisabledIdentityProvider {
    async fn published_keys(&self) -> anyhow::Result<JwkSet> {
        anyhow::bail!("no identity provider configured")
    }
}

/// Posts gateway events to a webhook (Slack-compatible). Fire-and-forget:
/// failures are logged, never propagated.
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: Option<Url>,
}

impl WebhookNotifier {
    pub fn new(url: Option<Url>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url,
        }
    }

    /// Notifier that drops every event; used when no webhook is configured.
    pub fn disabled() -> Self {
        Self::new(None)
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, event: GatewayEventEnvelope) {
        let Some(url) = &self.url else {
            return;
        };
        let result = self.client.post(url.clone()).json(&event).send().await;
        if let Err(e) = result {
            warn!("[WebhookNotifier] Event delivery failed: {}", e);
        }
    }
}
