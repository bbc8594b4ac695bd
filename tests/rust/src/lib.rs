//! Shared test harness for Unigate integration tests

pub mod mocks;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use jsonwebtoken::{EncodingKey, Header};
use serde_json::json;
use uuid::Uuid;

use unigate_core::{ApiKeyRecord, BackendServerRecord, CacheConfig, GatewayConfig};
use unigate_gateway::auth::sha256_hex;
use unigate_gateway::services::{GatewayDependencies, GatewayServices};

use mocks::{
    CapturingNotifier, MockApiKeyRepository, MockConnector, MockIdentityProvider,
    MockServerRepository, TEST_JWT_KID, TEST_JWT_SECRET,
};

/// A fully wired gateway over mock collaborators. Every harness is a fresh
/// instance - no shared state between tests.
pub struct TestHarness {
    pub services: Arc<GatewayServices>,
    pub servers: Arc<MockServerRepository>,
    pub api_keys: Arc<MockApiKeyRepository>,
    pub identity: Arc<MockIdentityProvider>,
    pub notifier: Arc<CapturingNotifier>,
    pub connector: Arc<MockConnector>,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: GatewayConfig) -> Self {
        let servers = Arc::new(MockServerRepository::new());
        let api_keys = Arc::new(MockApiKeyRepository::new());
        let identity = Arc::new(MockIdentityProvider::new());
        let notifier = Arc::new(CapturingNotifier::new());
        let connector = Arc::new(MockConnector::new());

        let services = GatewayServices::build(
            config,
            GatewayDependencies {
                servers: servers.clone(),
                api_keys: api_keys.clone(),
                identity: identity.clone(),
                notifier: notifier.clone(),
                connector: connector.clone(),
            },
        );

        Self {
            services,
            servers,
            api_keys,
            identity,
            notifier,
            connector,
        }
    }

    /// Register a healthy scripted backend and return its record.
    pub fn add_backend(&self, organization_id: Uuid, namespace: &str, tools: &[&str]) -> BackendServerRecord {
        let record = make_server(organization_id, namespace);
        self.connector.healthy(record.id, tools);
        self.servers.insert(record.clone());
        record
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// Gateway configuration with timeouts tightened for tests.
pub fn test_config() -> GatewayConfig {
    GatewayConfig {
        call_timeout: Duration::from_secs(2),
        connect_timeout: Duration::from_secs(2),
        session_inactivity_timeout: Duration::from_millis(200),
        connection_idle_grace: Duration::from_millis(50),
        max_consecutive_failures: 3,
        backoff_base: Duration::from_millis(10),
        backoff_cap: Duration::from_millis(50),
        key_set_ttl: Duration::from_secs(60),
        key_set_negative_ttl: Duration::from_millis(100),
        tool_catalog_cache: CacheConfig::new(32, Duration::from_secs(30)),
        auth_decision_cache: CacheConfig::new(32, Duration::from_secs(30)),
        session_meta_cache: CacheConfig::new(32, Duration::from_secs(30)),
        data_cache: CacheConfig::new(32, Duration::from_secs(30)),
        ..GatewayConfig::default()
    }
}

pub fn make_server(organization_id: Uuid, namespace: &str) -> BackendServerRecord {
    BackendServerRecord {
        id: Uuid::new_v4(),
        organization_id,
        name: format!("{} backend", namespace),
        namespace: namespace.to_string(),
        endpoint: format!("{}.test:9000", namespace),
        auth_token: Some("backend-secret".to_string()),
        allow_anonymous: false,
        pii_masking_mode: Default::default(),
        pii_info_types: vec![],
        compression_enabled: false,
        deleted: false,
        created_at: Utc::now(),
    }
}

pub fn make_api_key(organization_id: Uuid, plaintext: &str) -> ApiKeyRecord {
    ApiKeyRecord {
        id: Uuid::new_v4(),
        organization_id,
        user_id: "user-1".to_string(),
        key_hash: sha256_hex(plaintext),
        revoked: false,
        created_at: Utc::now(),
    }
}

/// Mint a bearer token against the mock identity provider's key.
pub fn mint_token(organization_id: Uuid, sub: &str, ttl_secs: i64) -> String {
    let claims = json!({
        "sub": sub,
        "org_id": organization_id,
        "exp": Utc::now().timestamp() + ttl_secs,
    });
    let mut header = Header::new(jsonwebtoken::Algorithm::HS256);
    header.kid = Some(TEST_JWT_KID.to_string());
    jsonwebtoken::encode(
        &header,
        &claims,
        &EncodingKey::from_secret(TEST_JWT_SECRET.as_bytes()),
    )
    .expect("token minting")
}
