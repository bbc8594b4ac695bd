//! # Unigate Gateway
//!
//! Protocol-level proxy between AI clients and a fleet of backend tool
//! servers. The gateway authenticates every request, routes namespaced tool
//! calls over pooled multiplexed connections, and transforms successful
//! results before they reach the client.
//!
//! ## Modules
//!
//! - `auth` - credential resolution into per-request authorization contexts
//! - `cache` - bounded LRU/TTL caches shared by every other component
//! - `pool` - backend connection lifecycle, wire channels, sessions
//! - `router` - namespaced tool resolution and dispatch
//! - `transform` - PII redaction and structural payload compression
//! - `maintenance` - background sweeper for idle sessions and connections
//! - `wire` - request/response envelope types and error codes
//! - `server` - HTTP surface (request channel, SSE streams, health, stats)

pub mod auth;
pub mod cache;
pub mod maintenance;
pub mod pool;
pub mod providers;
pub mod router;
pub mod server;
pub mod services;
pub mod transform;
pub mod wire;
