//! Connection pool orchestration
//!
//! The manager holds at most one pooled connection per backend identity.
//! Concurrent requests for the same backend share the in-flight attempt
//! (single-flight: the first caller inserts the entry and starts the
//! dial driver; everyone else waits on the entry's state channel).
//!
//! A connection that fails its reconnect ceiling transitions to `Closed`
//! and is removed, so the next lookup dials a fresh instance instead of
//! waiting on a dead handle.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use serde_json::json;
use tracing::{debug, info, warn};
use uuid::Uuid;

use unigate_core::{
    BackendServerRecord, DomainError, GatewayConfig, GatewayEvent, GatewayEventEnvelope, Notifier,
};

use crate::wire::{METHOD_INITIALIZE, PROTOCOL_VERSION};

use super::channel::WireChannel;
use super::connection::{ConnectionState, PooledConnection};
use super::session::SessionRegistry;
use super::BackendConnector;

/// Read-only pool counters, for observability only - never for control
/// decisions.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PoolStats {
    pub total_connections: usize,
    pub ready_connections: usize,
    pub connecting_connections: usize,
    pub degraded_connections: usize,
    pub active_sessions: usize,
}

/// Owns pooled backend connections and session bookkeeping.
pub struct ConnectionManager {
    connections: Arc<DashMap<Uuid, Arc<PooledConnection>>>,
    connector: Arc<dyn BackendConnector>,
    notifier: Arc<dyn Notifier>,
    sessions: Arc<SessionRegistry>,
    config: Arc<GatewayConfig>,
}

impl ConnectionManager {
    pub fn new(
        connector: Arc<dyn BackendConnector>,
        notifier: Arc<dyn Notifier>,
        config: Arc<GatewayConfig>,
    ) -> Self {
        Self {
            connections: Arc::new(DashMap::new()),
            connector,
            notifier,
            sessions: Arc::new(SessionRegistry::new()),
            config,
        }
    }

    pub fn sessions(&self) -> Arc<SessionRegistry> {
        Arc::clone(&self.sessions)
    }

    /// Resolve the live channel for a backend, dialing if necessary.
    ///
    /// Single-flight per backend identity: only the caller that inserts the
    /// pool entry starts a dial driver; concurrent callers await the same
    /// entry's state. A `Closed` entry is removed and reported as
    /// `BackendUnavailable` - the next lookup starts a fresh instance.
    pub async fn channel_for(
        &self,
        record: &BackendServerRecord,
    ) -> Result<Arc<WireChannel>, DomainError> {
        let conn = match self.connections.entry(record.id) {
            Entry::Occupied(entry) => Arc::clone(entry.get()),
            Entry::Vacant(entry) => {
                let conn = Arc::new(PooledConnection::new(record.id));
                entry.insert(Arc::clone(&conn));
                self.spawn_dial_driver(Arc::clone(&conn), record.clone());
                conn
            }
        };

        match conn.wait_until_settled(self.config.connect_timeout).await {
            ConnectionState::Ready => conn
                .channel()
                .ok_or(DomainError::BackendUnavailable(record.id)),
            ConnectionState::Closed => {
                self.remove_entry(&conn);
                Err(DomainError::BackendUnavailable(record.id))
            }
            state => {
                debug!(
                    server_id = %record.id,
                    state = ?state,
                    "[ConnectionManager] Connection did not settle within budget"
                );
                Err(DomainError::BackendUnavailable(record.id))
            }
        }
    }

    /// Explicit teardown of one backend's connection.
    pub fn close_connection(&self, server_id: Uuid) {
        if let Some((_, conn)) = self.connections.remove(&server_id) {
            conn.mark_closed();
            info!(server_id = %server_id, "[ConnectionManager] Connection closed");
        }
    }

    /// Close pooled connections that no live session references and that
    /// have been idle past the grace period. Called by the maintenance loop.
    pub fn sweep_idle_connections(&self) -> usize {
        let referenced = self.sessions.referenced_backends();
        let now = std::time::Instant::now();
        let grace = self.config.connection_idle_grace;

        let mut to_close = Vec::new();
        for entry in self.connections.iter() {
            let conn = entry.value();
            if referenced.contains(&conn.server_id) {
                conn.clear_idle();
            } else if conn.note_idle(now, grace) {
                to_close.push(Arc::clone(conn));
            }
        }

        for conn in &to_close {
            info!(
                server_id = %conn.server_id,
                "[ConnectionManager] Closing idle connection (no referencing sessions)"
            );
            conn.mark_closed();
            self.remove_entry(conn);
        }
        to_close.len()
    }

    pub fn pool_stats(&self) -> PoolStats {
        let mut stats = PoolStats {
            total_connections: self.connections.len(),
            active_sessions: self.sessions.len(),
            ..PoolStats::default()
        };
        for entry in self.connections.iter() {
            match entry.value().state() {
                ConnectionState::Ready => stats.ready_connections += 1,
                ConnectionState::Connecting => stats.connecting_connections += 1,
                ConnectionState::Degraded => stats.degraded_connections += 1,
                ConnectionState::Closed => {}
            }
        }
        stats
    }

    /// Remove a pool entry, but only if it still maps to this exact
    /// connection - a fresh instance may already have replaced it.
    fn remove_entry(&self, conn: &Arc<PooledConnection>) {
        self.connections
            .remove_if(&conn.server_id, |_, current| Arc::ptr_eq(current, conn));
    }

    /// Drive one connection through its lifecycle: dial, serve until the
    /// transport dies, back off, redial - until the failure ceiling closes
    /// it for good.
    fn spawn_dial_driver(&self, conn: Arc<PooledConnection>, record: BackendServerRecord) {
        let connector = Arc::clone(&self.connector);
        let notifier = Arc::clone(&self.notifier);
        let config = Arc::clone(&self.config);
        let connections = Arc::clone(&self.connections);

        tokio::spawn(async move {
            loop {
                conn.mark_connecting();
                match Self::establish(connector.as_ref(), &record, &config).await {
                    Ok(channel) => {
                        info!(
                            server_id = %record.id,
                            endpoint = %record.endpoint,
                            "[ConnectionManager] Backend connection ready"
                        );
                        conn.mark_ready(Arc::clone(&channel));

                        channel.closed().cancelled().await;
                        if conn.state() == ConnectionState::Closed {
                            // Explicit teardown, not a transport failure.
                            return;
                        }

                        warn!(
                            server_id = %record.id,
                            "[ConnectionManager] Transport failure, scheduling reconnect"
                        );
                        conn.mark_degraded("transport failure");
                        notifier
                            .notify(GatewayEventEnvelope::now(
                                GatewayEvent::BackendConnectionDegraded {
                                    server_id: record.id,
                                    error: "transport failure".to_string(),
                                },
                            ))
                            .await;
                    }
                    Err(e) => {
                        let failures = conn.record_failure(e.to_string());
                        warn!(
                            server_id = %record.id,
                            consecutive_failures = failures,
                            "[ConnectionManager] Connection attempt failed: {}",
                            e
                        );
                        if failures >= config.max_consecutive_failures {
                            conn.mark_closed();
                            connections
                                .remove_if(&record.id, |_, current| Arc::ptr_eq(current, &conn));
                            notifier
                                .notify(GatewayEventEnvelope::now(
                                    GatewayEvent::BackendConnectionClosed {
                                        server_id: record.id,
                                        consecutive_failures: failures,
                                        last_error: conn.last_error(),
                                    },
                                ))
                                .await;
                            return;
                        }
                    }
                }

                let delay = conn.next_backoff(config.backoff_base, config.backoff_cap);
                debug!(
                    server_id = %record.id,
                    delay_ms = delay.as_millis() as u64,
                    "[ConnectionManager] Backing off before reconnect"
                );
                tokio::time::sleep(delay).await;

                if conn.state() == ConnectionState::Closed {
                    return;
                }
            }
        });
    }

    /// Dial the transport and run the protocol handshake. The backend
    /// credential from the server record rides in the handshake params.
    async fn establish(
        connector: &dyn BackendConnector,
        record: &BackendServerRecord,
        config: &GatewayConfig,
    ) -> anyhow::Result<Arc<WireChannel>> {
        let stream = tokio::time::timeout(config.connect_timeout, connector.connect(record))
            .await
            .map_err(|_| anyhow::anyhow!("connect timed out"))??;

        let channel = WireChannel::new(stream);
        let params = json!({
            "protocolVersion": PROTOCOL_VERSION,
            "client": { "name": "unigate", "version": env!("CARGO_PKG_VERSION") },
            "authToken": record.auth_token,
        });
        if let Err(e) = channel
            .call(METHOD_INITIALIZE, Some(params), config.connect_timeout)
            .await
        {
            channel.close();
            anyhow::bail!("handshake failed: {}", e);
        }
        Ok(channel)
    }
}
