//! Mock collaborator implementations for testing
//!
//! In-memory repositories, a static-key identity provider, a capturing
//! notifier, and a scripted in-process backend reachable over duplex
//! streams - everything the gateway consumes through traits.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use jsonwebtoken::jwk::JwkSet;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};
use uuid::Uuid;

use unigate_core::{
    ApiKeyRecord, ApiKeyRepository, BackendServerRecord, GatewayEvent, GatewayEventEnvelope,
    Notifier, RepoResult, ServerRepository,
};
use unigate_gateway::auth::IdentityProvider;
use unigate_gateway::pool::{BackendConnector, BoxedStream};
use unigate_gateway::wire::{encode_frame, RequestEnvelope, ResponseEnvelope, PROTOCOL_VERSION};

// ============================================================================
// MockServerRepository
// ============================================================================

#[derive(Default)]
pub struct MockServerRepository {
    servers: DashMap<Uuid, BackendServerRecord>,
    pub lookups: AtomicUsize,
}

impl MockServerRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, record: BackendServerRecord) {
        self.servers.insert(record.id, record);
    }

    pub fn mark_deleted(&self, id: Uuid) {
        if let Some(mut record) = self.servers.get_mut(&id) {
            record.deleted = true;
        }
    }
}

#[async_trait]
impl ServerRepository for MockServerRepository {
    async fn lookup(&self, id: Uuid) -> RepoResult<Option<BackendServerRecord>> {
        self.lookups.fetch_add(1, Ordering::Relaxed);
        Ok(self.servers.get(&id).map(|r| r.clone()))
    }

    async fn find_by_namespace(&self, namespace: &str) -> RepoResult<Option<BackendServerRecord>> {
        Ok(self
            .servers
            .iter()
            .find(|r| r.namespace == namespace)
            .map(|r| r.clone()))
    }

    async fn list_for_organization(
        &self,
        organization_id: Uuid,
    ) -> RepoResult<Vec<BackendServerRecord>> {
        Ok(self
            .servers
            .iter()
            .filter(|r| r.organization_id == organization_id)
            .map(|r| r.clone())
            .collect())
    }
}

// ============================================================================
// MockApiKeyRepository
// ============================================================================

#[derive(Default)]
pub struct MockApiKeyRepository {
    keys: DashMap<String, ApiKeyRecord>,
    pub lookups: AtomicUsize,
}

impl MockApiKeyRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, record: ApiKeyRecord) {
        self.keys.insert(record.key_hash.clone(), record);
    }
}

#[async_trait]
impl ApiKeyRepository for MockApiKeyRepository {
    async fn find_by_hash(&self, key_hash: &str) -> RepoResult<Option<ApiKeyRecord>> {
        self.lookups.fetch_add(1, Ordering::Relaxed);
        Ok(self.keys.get(key_hash).map(|r| r.clone()))
    }
}

// ============================================================================
// MockIdentityProvider
// ============================================================================

/// Serves a static symmetric key set; tokens are minted with
/// [`crate::mint_token`] against the same secret.
pub struct MockIdentityProvider {
    key_set: JwkSet,
    pub fetches: AtomicUsize,
}

pub const TEST_JWT_SECRET: &str = "unigate-test-secret-0123456789abcdef";
pub const TEST_JWT_KID: &str = "test-key";

impl MockIdentityProvider {
    pub fn new() -> Self {
        use base64::engine::general_purpose::URL_SAFE_NO_PAD;
        use base64::Engine;
        use jsonwebtoken::jwk;

        let encoded = URL_SAFE_NO_PAD.encode(TEST_JWT_SECRET.as_bytes());
        let key_set: jwk::JwkSet = serde_json::from_value(json!({
            "keys": [{
                "kty": "oct",
                "kid": TEST_JWT_KID,
                "alg": "HS256",
                "k": encoded,
            }]
        }))
        .expect("static jwks");
        Self {
            key_set,
            fetches: AtomicUsize::new(0),
        }
    }
}

impl Default for MockIdentityProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl IdentityProvider for MockIdentityProvider {
    async fn published_keys(&self) -> anyhow::Result<JwkSet> {
        self.fetches.fetch_add(1, Ordering::Relaxed);
        Ok(self.key_set.clone())
    }
}

// ============================================================================
// CapturingNotifier
// ============================================================================

#[derive(Default)]
pub struct CapturingNotifier {
    events: Mutex<Vec<GatewayEventEnvelope>>,
}

impl CapturingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<GatewayEventEnvelope> {
        self.events.lock().clone()
    }

    pub fn count_matching(&self, predicate: impl Fn(&GatewayEvent) -> bool) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|e| predicate(&e.event))
            .count()
    }
}

#[async_trait]
impl Notifier for CapturingNotifier {
    async fn notify(&self, event: GatewayEventEnvelope) {
        self.events.lock().push(event);
    }
}

// ============================================================================
// MockConnector + scripted backend
// ============================================================================

#[derive(Clone)]
pub enum BackendBehavior {
    /// Accept connections and answer the wire protocol with these tools.
    Healthy { tools: Vec<String> },
    /// Refuse every connection attempt.
    Refuse,
}

/// Dials in-process scripted backends over duplex streams.
#[derive(Default)]
pub struct MockConnector {
    behaviors: DashMap<Uuid, BackendBehavior>,
    attempts: DashMap<Uuid, usize>,
    /// Total `tools/list` calls answered across all backends.
    pub catalog_fetches: Arc<AtomicUsize>,
    /// Artificial dial latency, to widen single-flight race windows.
    pub connect_delay: Mutex<Option<Duration>>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_behavior(&self, server_id: Uuid, behavior: BackendBehavior) {
        self.behaviors.insert(server_id, behavior);
    }

    pub fn healthy(&self, server_id: Uuid, tools: &[&str]) {
        self.set_behavior(
            server_id,
            BackendBehavior::Healthy {
                tools: tools.iter().map(|t| t.to_string()).collect(),
            },
        );
    }

    pub fn connect_attempts(&self, server_id: Uuid) -> usize {
        self.attempts.get(&server_id).map(|a| *a).unwrap_or(0)
    }

    pub fn set_connect_delay(&self, delay: Duration) {
        *self.connect_delay.lock() = Some(delay);
    }
}

#[async_trait]
impl BackendConnector for MockConnector {
    async fn connect(&self, record: &BackendServerRecord) -> anyhow::Result<BoxedStream> {
        *self.attempts.entry(record.id).or_insert(0) += 1;

        let delay = *self.connect_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let behavior = self
            .behaviors
            .get(&record.id)
            .map(|b| b.clone())
            .unwrap_or(BackendBehavior::Refuse);

        match behavior {
            BackendBehavior::Refuse => anyhow::bail!("connection refused"),
            BackendBehavior::Healthy { tools } => {
                let (client, server) = tokio::io::duplex(64 * 1024);
                let counter = Arc::clone(&self.catalog_fetches);
                tokio::spawn(run_scripted_backend(server, tools, counter));
                Ok(Box::new(client))
            }
        }
    }
}

/// A minimal backend speaking the wire protocol: handshake, catalog listing,
/// and tool calls. Each request is answered from its own task, so responses
/// complete (and arrive) out of order - tool `slow` stalls past any
/// reasonable test deadline without blocking the channel, and tool `boom`
/// answers with a protocol error.
async fn run_scripted_backend(
    stream: DuplexStream,
    tools: Vec<String>,
    catalog_fetches: Arc<AtomicUsize>,
) {
    let (read_half, write_half) = tokio::io::split(stream);
    let writer = Arc::new(tokio::sync::Mutex::new(write_half));
    let mut lines = BufReader::new(read_half).lines();

    while let Ok(Some(line)) = lines.next_line().await {
        let request: RequestEnvelope = match serde_json::from_str(&line) {
            Ok(request) => request,
            Err(_) => continue,
        };

        let tools = tools.clone();
        let catalog_fetches = Arc::clone(&catalog_fetches);
        let writer = Arc::clone(&writer);
        tokio::spawn(async move {
            let response = answer(request, &tools, &catalog_fetches).await;
            if let Ok(frame) = encode_frame(&response) {
                let mut writer = writer.lock().await;
                let _ = writer.write_all(frame.as_bytes()).await;
            }
        });
    }
}

async fn answer(
    request: RequestEnvelope,
    tools: &[String],
    catalog_fetches: &AtomicUsize,
) -> ResponseEnvelope {
    match request.method.as_str() {
        "initialize" => ResponseEnvelope::success(
            request.id,
            json!({
                "protocolVersion": PROTOCOL_VERSION,
                "serverInfo": {"name": "scripted-backend", "version": "0.0.0"},
            }),
        ),
        "tools/list" => {
            catalog_fetches.fetch_add(1, Ordering::Relaxed);
            let listed: Vec<Value> = tools
                .iter()
                .map(|t| json!({"name": t, "description": "scripted tool"}))
                .collect();
            ResponseEnvelope::success(request.id, json!({ "tools": listed }))
        }
        "tools/call" => {
            let params = request.params.unwrap_or(Value::Null);
            let name = params
                .get("name")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string();
            match name.as_str() {
                "slow" => {
                    tokio::time::sleep(Duration::from_secs(30)).await;
                    ResponseEnvelope::success(request.id, json!({"done": true}))
                }
                "boom" => ResponseEnvelope {
                    id: request.id,
                    result: None,
                    error: Some(unigate_gateway::wire::ErrorBody {
                        code: -32000,
                        message: "tool exploded".to_string(),
                        data: None,
                    }),
                },
                _ => ResponseEnvelope::success(
                    request.id,
                    json!({
                        "echo": name,
                        "arguments": params.get("arguments").cloned().unwrap_or(Value::Null),
                    }),
                ),
            }
        }
        _ => ResponseEnvelope::failure(
            Some(request.id),
            &unigate_core::DomainError::UnknownError("unsupported method".to_string()),
        ),
    }
}
