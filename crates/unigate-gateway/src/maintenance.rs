//! Lifecycle/Maintenance Loop
//!
//! Background sweeper that runs at half the session inactivity timeout, so
//! an idle session is detected within one timeout window. Each tick closes
//! sessions idle past the timeout (dropping their session-metadata cache
//! entries and notifying the side-channel) and closes pooled connections
//! that no live session references once their grace period runs out.
//!
//! The loop runs independently of request flow and touches only the
//! Connection Manager and the Cache Layer.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use unigate_core::{GatewayConfig, GatewayEvent, GatewayEventEnvelope, Notifier};

use crate::cache::GatewayCaches;
use crate::pool::ConnectionManager;

pub struct MaintenanceLoop {
    manager: Arc<ConnectionManager>,
    caches: Arc<GatewayCaches>,
    notifier: Arc<dyn Notifier>,
    config: Arc<GatewayConfig>,
}

impl MaintenanceLoop {
    pub fn new(
        manager: Arc<ConnectionManager>,
        caches: Arc<GatewayCaches>,
        notifier: Arc<dyn Notifier>,
        config: Arc<GatewayConfig>,
    ) -> Self {
        Self {
            manager,
            caches,
            notifier,
            config,
        }
    }

    /// Start the sweeper. It runs until the cancellation token fires.
    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        let interval = self.config.sweep_interval();
        info!(
            interval_secs = interval.as_secs(),
            "[Maintenance] Sweeper started"
        );
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The immediate first tick would sweep an empty gateway.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        info!("[Maintenance] Sweeper stopped");
                        return;
                    }
                    _ = ticker.tick() => self.tick().await,
                }
            }
        })
    }

    /// One sweep pass. Public so tests can drive ticks directly.
    pub async fn tick(&self) {
        let timeout = self.config.session_inactivity_timeout;
        let expired = self.manager.sessions().expire_idle(timeout);
        for session in &expired {
            self.caches.session_meta.delete(&session.id);
            self.notifier
                .notify(GatewayEventEnvelope::now(GatewayEvent::SessionExpired {
                    session_id: session.id,
                    organization_id: session.context.organization_id,
                    idle_secs: session.idle_for().as_secs(),
                }))
                .await;
        }

        let closed = self.manager.sweep_idle_connections();
        if !expired.is_empty() || closed > 0 {
            info!(
                expired_sessions = expired.len(),
                closed_connections = closed,
                "[Maintenance] Sweep pass complete"
            );
        } else {
            debug!("[Maintenance] Sweep pass complete, nothing to do");
        }
    }
}
