//! Tool Router
//!
//! Resolves namespaced tool identifiers to a backend server, forwards the
//! call over the pooled channel, and normalizes every failure into the
//! `DomainError` taxonomy before it reaches the protocol boundary.
//!
//! Error discrimination is deliberate: a name with no separator or an
//! unknown namespace is `InvalidToolName` (malformed call); a namespace
//! owned by another organization is `OrganizationMismatch`; a recognized
//! namespace whose catalog lacks the tool is `ToolNotFound`. Clients need to
//! tell these apart for diagnostics, and the mismatch case must never
//! degrade into not-found.

use std::sync::Arc;

use dashmap::DashMap;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use unigate_core::{
    AuthorizationContext, BackendServerRecord, DomainError, GatewayConfig, ServerRepository,
    ToolDescriptor,
};

use crate::cache::GatewayCaches;
use crate::pool::{ChannelError, ConnectionManager, Session};
use crate::transform;
use crate::wire::{METHOD_CALL_TOOL, METHOD_LIST_TOOLS};

/// Catalog payload returned by a backend's `tools/list`.
#[derive(Debug, Deserialize)]
struct BackendCatalog {
    #[serde(default)]
    tools: Vec<BackendTool>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BackendTool {
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    input_schema: Option<Value>,
}

/// Routes namespaced tool calls to backend servers.
pub struct ToolRouter {
    servers: Arc<dyn ServerRepository>,
    manager: Arc<ConnectionManager>,
    caches: Arc<GatewayCaches>,
    config: Arc<GatewayConfig>,
    /// One fetch guard per backend id: a catalog cache miss is resolved by a
    /// single backend fetch shared by all concurrent callers.
    catalog_flights: DashMap<Uuid, Arc<Mutex<()>>>,
}

impl ToolRouter {
    pub fn new(
        servers: Arc<dyn ServerRepository>,
        manager: Arc<ConnectionManager>,
        caches: Arc<GatewayCaches>,
        config: Arc<GatewayConfig>,
    ) -> Self {
        Self {
            servers,
            manager,
            caches,
            config,
            catalog_flights: DashMap::new(),
        }
    }

    /// Aggregate the catalogs of every backend server reachable under the
    /// caller's organization, each tool prefixed with its owning server's
    /// namespace. Unreachable backends are skipped, not fatal.
    pub async fn list_tools(
        &self,
        ctx: &AuthorizationContext,
    ) -> Result<Vec<ToolDescriptor>, DomainError> {
        let records = self
            .servers
            .list_for_organization(ctx.organization_id)
            .await
            .map_err(|e| DomainError::UnknownError(e.to_string()))?;

        let mut tools = Vec::new();
        for record in records.iter().filter(|r| !r.deleted) {
            match self.catalog(record).await {
                Ok(catalog) => tools.extend(catalog.iter().cloned()),
                Err(e) => {
                    warn!(
                        server_id = %record.id,
                        namespace = %record.namespace,
                        "[ToolRouter] Skipping unreachable backend in listing: {}",
                        e
                    );
                }
            }
        }

        debug!(
            organization_id = %ctx.organization_id,
            count = tools.len(),
            "[ToolRouter] Aggregated tool listing"
        );
        Ok(tools)
    }

    /// Dispatch one namespaced tool call. When a session is supplied, the
    /// resolved backend identity is recorded on it (weak reference only).
    pub async fn call_tool(
        &self,
        ctx: &AuthorizationContext,
        session: Option<&Session>,
        qualified_name: &str,
        arguments: Value,
    ) -> Result<Value, DomainError> {
        let (namespace, tool_name) = ToolDescriptor::parse_qualified(qualified_name)
            .ok_or_else(|| DomainError::InvalidToolName(qualified_name.to_string()))?;

        let record = self.resolve_namespace(ctx, namespace, qualified_name).await?;
        if let Some(session) = session {
            session.add_backend(record.id);
        }

        // Catalog membership gates dispatch: a recognized namespace with an
        // unknown tool is ToolNotFound, not a backend round-trip.
        let catalog = self.catalog(&record).await?;
        if !catalog.iter().any(|t| t.name == tool_name) {
            return Err(DomainError::ToolNotFound(qualified_name.to_string()));
        }

        let arguments = if ctx.pii_masking_mode.masks_request() {
            transform::mask_request(ctx, arguments)
        } else {
            arguments
        };

        let channel = match self.manager.channel_for(&record).await {
            Ok(channel) => channel,
            // The pooled handle was dead and has been removed; one fresh
            // lookup dials a new instance instead of retrying the dead one.
            Err(DomainError::BackendUnavailable(_)) => self.manager.channel_for(&record).await?,
            Err(e) => return Err(e),
        };

        info!(
            server_id = %record.id,
            tool = tool_name,
            "[ToolRouter] Dispatching tool call"
        );

        let params = json!({ "name": tool_name, "arguments": arguments });
        let deadline = self.config.call_timeout;
        match channel.call(METHOD_CALL_TOOL, Some(params), deadline).await {
            Ok(result) => Ok(result),
            Err(ChannelError::Timeout(_)) => Err(DomainError::CallTimeout(deadline.as_secs())),
            Err(ChannelError::Closed) => Err(DomainError::BackendUnavailable(record.id)),
            Err(ChannelError::Io(e)) => Err(DomainError::TransportError(e)),
            Err(ChannelError::Remote(body)) => Err(DomainError::UnknownError(format!(
                "backend error {}: {}",
                body.code, body.message
            ))),
        }
    }

    /// Resolve a namespace prefix to its backend record, enforcing the
    /// organization boundary.
    async fn resolve_namespace(
        &self,
        ctx: &AuthorizationContext,
        namespace: &str,
        qualified_name: &str,
    ) -> Result<BackendServerRecord, DomainError> {
        let record = self
            .servers
            .find_by_namespace(namespace)
            .await
            .map_err(|e| DomainError::UnknownError(e.to_string()))?
            .ok_or_else(|| DomainError::InvalidToolName(qualified_name.to_string()))?;

        if record.deleted {
            self.caches.invalidate_server(record.id);
            return Err(DomainError::BackendServerNotFound(record.id));
        }
        if record.organization_id != ctx.organization_id {
            return Err(DomainError::OrganizationMismatch);
        }
        Ok(record)
    }

    /// Fetch (or serve from cache) one backend's catalog, namespaced. Cache
    /// misses are single-flighted per backend identity.
    async fn catalog(
        &self,
        record: &BackendServerRecord,
    ) -> Result<Arc<Vec<ToolDescriptor>>, DomainError> {
        if let Some(catalog) = self.caches.tool_catalogs.get(&record.id) {
            return Ok(catalog);
        }

        let flight = self
            .catalog_flights
            .entry(record.id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = flight.lock().await;

        // Losers of the fetch race find the winner's result here.
        if let Some(catalog) = self.caches.tool_catalogs.get(&record.id) {
            return Ok(catalog);
        }

        let channel = self.manager.channel_for(record).await?;
        let raw = channel
            .call(METHOD_LIST_TOOLS, None, self.config.call_timeout)
            .await
            .map_err(|e| match e {
                ChannelError::Timeout(d) => DomainError::CallTimeout(d.as_secs()),
                ChannelError::Closed => DomainError::BackendUnavailable(record.id),
                ChannelError::Io(msg) => DomainError::TransportError(msg),
                ChannelError::Remote(body) => DomainError::UnknownError(body.message),
            })?;

        let catalog: BackendCatalog = serde_json::from_value(raw)
            .map_err(|e| DomainError::TransportError(format!("malformed catalog: {}", e)))?;

        let descriptors: Vec<ToolDescriptor> = catalog
            .tools
            .into_iter()
            .map(|t| ToolDescriptor {
                namespace: record.namespace.clone(),
                name: t.name,
                description: t.description,
                input_schema: t.input_schema,
            })
            .collect();

        debug!(
            server_id = %record.id,
            namespace = %record.namespace,
            count = descriptors.len(),
            "[ToolRouter] Cached backend catalog"
        );
        let descriptors = Arc::new(descriptors);
        self.caches
            .tool_catalogs
            .set(record.id, Arc::clone(&descriptors));
        Ok(descriptors)
    }
}
