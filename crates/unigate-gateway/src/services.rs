//! Service container
//!
//! The pool and the caches are the only process-wide mutable state. Both are
//! constructed exactly once here and injected into every component - no
//! ambient globals - so tests can stand up a fresh gateway per case.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use unigate_core::{ApiKeyRepository, GatewayConfig, Notifier, ServerRepository};

use crate::auth::{CredentialResolver, IdentityProvider, TokenVerifier};
use crate::cache::GatewayCaches;
use crate::maintenance::MaintenanceLoop;
use crate::pool::{BackendConnector, ConnectionManager};
use crate::router::ToolRouter;

/// External collaborators, injected at construction.
pub struct GatewayDependencies {
    pub servers: Arc<dyn ServerRepository>,
    pub api_keys: Arc<dyn ApiKeyRepository>,
    pub identity: Arc<dyn IdentityProvider>,
    pub notifier: Arc<dyn Notifier>,
    pub connector: Arc<dyn BackendConnector>,
}

/// Fully wired gateway components.
pub struct GatewayServices {
    pub config: Arc<GatewayConfig>,
    pub caches: Arc<GatewayCaches>,
    pub resolver: Arc<CredentialResolver>,
    pub manager: Arc<ConnectionManager>,
    pub router: Arc<ToolRouter>,
    pub notifier: Arc<dyn Notifier>,
}

impl GatewayServices {
    pub fn build(config: GatewayConfig, deps: GatewayDependencies) -> Arc<Self> {
        let config = Arc::new(config);
        let caches = Arc::new(GatewayCaches::new(&config));

        let verifier = Arc::new(TokenVerifier::new(
            Arc::clone(&deps.identity),
            config.key_set_ttl,
            config.key_set_negative_ttl,
        ));
        let resolver = Arc::new(CredentialResolver::new(
            Arc::clone(&deps.servers),
            Arc::clone(&deps.api_keys),
            verifier,
            Arc::clone(&caches),
        ));
        let manager = Arc::new(ConnectionManager::new(
            Arc::clone(&deps.connector),
            Arc::clone(&deps.notifier),
            Arc::clone(&config),
        ));
        let router = Arc::new(ToolRouter::new(
            Arc::clone(&deps.servers),
            Arc::clone(&manager),
            Arc::clone(&caches),
            Arc::clone(&config),
        ));

        info!("[Services] Gateway components initialized");
        Arc::new(Self {
            config,
            caches,
            resolver,
            manager,
            router,
            notifier: deps.notifier,
        })
    }

    /// Start the background sweeper for idle sessions and connections.
    pub fn spawn_maintenance(&self, shutdown: CancellationToken) -> JoinHandle<()> {
        MaintenanceLoop::new(
            Arc::clone(&self.manager),
            Arc::clone(&self.caches),
            Arc::clone(&self.notifier),
            Arc::clone(&self.config),
        )
        .spawn(shutdown)
    }
}
