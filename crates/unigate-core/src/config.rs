//! Gateway configuration
//!
//! All knobs live in one struct with production defaults; `from_env` applies
//! `UNIGATE_*` environment overrides on top. Tests construct the struct
//! directly with tightened timeouts.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Sizing and TTL for one cache instance.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CacheConfig {
    pub capacity: usize,
    #[serde(with = "duration_secs")]
    pub ttl: Duration,
}

impl CacheConfig {
    pub const fn new(capacity: usize, ttl: Duration) -> Self {
        Self { capacity, ttl }
    }
}

/// Top-level gateway configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,

    /// Deadline for one backend tool call.
    #[serde(with = "duration_secs")]
    pub call_timeout: Duration,
    /// Deadline for establishing one backend connection attempt.
    #[serde(with = "duration_secs")]
    pub connect_timeout: Duration,

    /// Sessions idle longer than this are closed by the maintenance loop.
    #[serde(with = "duration_secs")]
    pub session_inactivity_timeout: Duration,
    /// Pooled connections with zero referencing sessions are closed after
    /// this grace period.
    #[serde(with = "duration_secs")]
    pub connection_idle_grace: Duration,

    /// Consecutive reconnect failures before a connection is closed for good.
    pub max_consecutive_failures: u32,
    /// First reconnect delay; doubles per attempt.
    #[serde(with = "duration_millis")]
    pub backoff_base: Duration,
    /// Ceiling on the reconnect delay.
    #[serde(with = "duration_secs")]
    pub backoff_cap: Duration,

    /// How long a fetched identity-provider key set stays fresh.
    #[serde(with = "duration_secs")]
    pub key_set_ttl: Duration,
    /// Negative-cache window after a failed key set fetch, bounding the cost
    /// of verifying against a rotating issuer.
    #[serde(with = "duration_secs")]
    pub key_set_negative_ttl: Duration,

    pub tool_catalog_cache: CacheConfig,
    pub auth_decision_cache: CacheConfig,
    pub session_meta_cache: CacheConfig,
    pub data_cache: CacheConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8787,
            call_timeout: Duration::from_secs(120),
            connect_timeout: Duration::from_secs(30),
            session_inactivity_timeout: Duration::from_secs(300),
            connection_idle_grace: Duration::from_secs(60),
            max_consecutive_failures: 5,
            backoff_base: Duration::from_millis(500),
            backoff_cap: Duration::from_secs(30),
            key_set_ttl: Duration::from_secs(600),
            key_set_negative_ttl: Duration::from_secs(15),
            tool_catalog_cache: CacheConfig::new(256, Duration::from_secs(60)),
            auth_decision_cache: CacheConfig::new(1024, Duration::from_secs(30)),
            session_meta_cache: CacheConfig::new(1024, Duration::from_secs(300)),
            data_cache: CacheConfig::new(512, Duration::from_secs(120)),
        }
    }
}

impl GatewayConfig {
    /// Interval for the maintenance loop: half the inactivity timeout, so an
    /// idle session is detected within one timeout window.
    pub fn sweep_interval(&self) -> Duration {
        self.session_inactivity_timeout / 2
    }

    /// Socket address string for binding.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Defaults overridden by `UNIGATE_*` environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(host) = std::env::var("UNIGATE_HOST") {
            config.host = host;
        }
        if let Some(port) = env_parse("UNIGATE_PORT") {
            config.port = port;
        }
        if let Some(secs) = env_parse("UNIGATE_CALL_TIMEOUT_SECS") {
            config.call_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = env_parse("UNIGATE_SESSION_TIMEOUT_SECS") {
            config.session_inactivity_timeout = Duration::from_secs(secs);
        }
        if let Some(n) = env_parse("UNIGATE_MAX_CONSECUTIVE_FAILURES") {
            config.max_consecutive_failures = n;
        }
        config
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}

mod duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}
