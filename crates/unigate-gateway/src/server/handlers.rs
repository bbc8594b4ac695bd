//! Request handlers
//!
//! `initialize` resolves the credential, registers a session, and always
//! answers on the POST body. Every other method requires the session id and
//! is answered on the session's event stream when one is attached (in
//! completion order, correlated by call id), falling back to the POST body
//! otherwise.
//!
//! Authentication failures share one response shape regardless of kind, so
//! the response surface never narrates which check failed first.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::stream::Stream;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};
use uuid::Uuid;

use unigate_core::{AuthError, AuthorizationContext, DomainError, GatewayEvent, GatewayEventEnvelope};

use crate::auth::Credential;
use crate::pool::Session;
use crate::services::GatewayServices;
use crate::transform;
use crate::wire::{
    Capabilities, ErrorBody, InitializeResult, RequestEnvelope, ResponseEnvelope, ServerIdentity,
    METHOD_CALL_TOOL, METHOD_INITIALIZE, METHOD_LIST_TOOLS, PROTOCOL_VERSION,
};

use super::SESSION_HEADER;

type AppState = State<Arc<GatewayServices>>;

#[derive(Debug, Deserialize)]
pub struct StreamQuery {
    session_id: Option<Uuid>,
}

pub async fn handle_health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

pub async fn handle_stats(State(services): AppState) -> Json<Value> {
    Json(json!({
        "pool": services.manager.pool_stats(),
        "caches": {
            "tool_catalogs": services.caches.tool_catalogs.stats(),
            "auth_decisions": services.caches.auth_decisions.stats(),
            "session_meta": services.caches.session_meta.stats(),
            "server_records": services.caches.server_records.stats(),
        },
    }))
}

pub async fn handle_post(
    State(services): AppState,
    Path(server_id): Path<Uuid>,
    headers: HeaderMap,
    payload: Result<Json<RequestEnvelope>, axum::extract::rejection::JsonRejection>,
) -> Response {
    // A frame that cannot be parsed has no correlation id; the error
    // envelope carries `id: null`.
    let Json(request) = match payload {
        Ok(payload) => payload,
        Err(rejection) => {
            let response = ResponseEnvelope::failure(
                None,
                &DomainError::UnknownError(format!("unparseable request: {}", rejection)),
            );
            return (StatusCode::BAD_REQUEST, Json(response)).into_response();
        }
    };

    if request.method == METHOD_INITIALIZE {
        return handle_initialize(services, server_id, &headers, request).await;
    }

    // Follow-up request: the session carries the authorization context.
    let Some(session_id) = session_id_from(&headers) else {
        let response =
            ResponseEnvelope::failure(Some(request.id), &DomainError::AuthContextMissing);
        return Json(response).into_response();
    };

    let Some(session) = services.manager.sessions().get(&session_id) else {
        let response =
            ResponseEnvelope::failure(Some(request.id), &DomainError::AuthContextMissing);
        return Json(response).into_response();
    };

    // Message receipt refreshes the activity timestamp.
    session.touch();

    let ctx = match services.caches.session_meta.get(&session_id) {
        Some(ctx) => ctx,
        None => {
            let ctx = session.context.clone();
            services.caches.session_meta.set(session_id, ctx.clone());
            ctx
        }
    };

    if ctx.mcp_server_id != server_id {
        let response =
            ResponseEnvelope::failure(Some(request.id), &DomainError::AuthContextMissing);
        return Json(response).into_response();
    }

    if session.has_stream() {
        // Deliver on the event stream in completion order; the POST only
        // acknowledges acceptance. A client disconnect cancels the call,
        // discarding its result without disturbing the shared connection.
        let token = session.call_token();
        let services = Arc::clone(&services);
        let session_for_task = Arc::clone(&session);
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {
                    debug!(session_id = %session_for_task.id, "[Handlers] Call cancelled, result discarded");
                }
                response = dispatch(&services, &ctx, &session_for_task, request) => {
                    if !session_for_task.deliver(response) {
                        debug!(session_id = %session_for_task.id, "[Handlers] No live stream, response dropped");
                    }
                }
            }
        });
        return StatusCode::ACCEPTED.into_response();
    }

    let response = dispatch(&services, &ctx, &session, request).await;
    Json(response).into_response()
}

/// Handshake: resolve the credential, create the session, answer inline.
async fn handle_initialize(
    services: Arc<GatewayServices>,
    server_id: Uuid,
    headers: &HeaderMap,
    request: RequestEnvelope,
) -> Response {
    let credential = Credential::from_authorization(
        headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok()),
    );

    let ctx = match services.resolver.resolve(&credential, server_id).await {
        Ok(ctx) => ctx,
        Err(err) => return auth_failure_response(&services, server_id, err),
    };

    let session = services.manager.sessions().register(ctx.clone());
    services.caches.session_meta.set(session.id, ctx);

    let result = InitializeResult {
        protocol_version: PROTOCOL_VERSION.to_string(),
        capabilities: Capabilities::default(),
        server_info: ServerIdentity::default(),
        session_id: session.id.to_string(),
    };
    let response = ResponseEnvelope::success(
        request.id,
        serde_json::to_value(result).unwrap_or(Value::Null),
    );
    Json(response).into_response()
}

/// Per-session event stream. Responses and notifications arrive here while
/// the stream is attached; dropping it cancels calls dispatched against it.
pub async fn handle_stream(
    State(services): AppState,
    Path(server_id): Path<Uuid>,
    Query(query): Query<StreamQuery>,
    headers: HeaderMap,
) -> Response {
    let session_id = query.session_id.or_else(|| session_id_from(&headers));
    let Some(session_id) = session_id else {
        return constant_denial(StatusCode::UNAUTHORIZED);
    };
    let Some(session) = services.manager.sessions().get(&session_id) else {
        return constant_denial(StatusCode::UNAUTHORIZED);
    };
    if session.context.mcp_server_id != server_id {
        return constant_denial(StatusCode::FORBIDDEN);
    }

    session.touch();
    let (receiver, guard) = session.attach_stream();
    debug!(session_id = %session_id, "[Handlers] Event stream attached");

    Sse::new(event_stream(receiver, guard))
        .keep_alive(
            KeepAlive::new()
                .interval(Duration::from_secs(15))
                .text("keep-alive"),
        )
        .into_response()
}

fn event_stream(
    receiver: tokio::sync::mpsc::Receiver<ResponseEnvelope>,
    guard: tokio_util::sync::CancellationToken,
) -> impl Stream<Item = Result<Event, Infallible>> {
    // The drop guard propagates a client disconnect to in-flight calls.
    let cancelled = guard.clone();
    let drop_guard = guard.drop_guard();
    futures::stream::unfold(
        (receiver, cancelled, drop_guard),
        |(mut receiver, cancelled, drop_guard)| async move {
            tokio::select! {
                _ = cancelled.cancelled() => None,
                message = receiver.recv() => {
                    let envelope = message?;
                    let data = serde_json::to_string(&envelope)
                        .unwrap_or_else(|_| "{}".to_string());
                    Some((
                        Ok(Event::default().event("message").data(data)),
                        (receiver, cancelled, drop_guard),
                    ))
                }
            }
        },
    )
}

/// Route one non-handshake request to the router.
async fn dispatch(
    services: &GatewayServices,
    ctx: &AuthorizationContext,
    session: &Session,
    request: RequestEnvelope,
) -> ResponseEnvelope {
    match request.method.as_str() {
        METHOD_LIST_TOOLS => match services.router.list_tools(ctx).await {
            Ok(tools) => {
                let listed: Vec<Value> = tools
                    .iter()
                    .map(|t| {
                        json!({
                            "name": t.qualified_name(),
                            "description": t.description,
                            "inputSchema": t.input_schema,
                        })
                    })
                    .collect();
                ResponseEnvelope::success(request.id, json!({ "tools": listed }))
            }
            Err(err) => ResponseEnvelope::failure(Some(request.id), &err),
        },
        METHOD_CALL_TOOL => {
            let params = request.params.unwrap_or(Value::Null);
            let Some(name) = params.get("name").and_then(|v| v.as_str()) else {
                return ResponseEnvelope::failure(
                    Some(request.id),
                    &DomainError::InvalidToolName(String::new()),
                );
            };
            let arguments = params.get("arguments").cloned().unwrap_or(Value::Null);

            match services
                .router
                .call_tool(ctx, Some(session), name, arguments)
                .await
            {
                Ok(result) => {
                    // Transforms apply to successful results only.
                    let result = transform::transform_response(ctx, result);
                    ResponseEnvelope::success(request.id, result)
                }
                Err(err) => ResponseEnvelope::failure(Some(request.id), &err),
            }
        }
        other => {
            warn!(method = other, "[Handlers] Unknown method");
            ResponseEnvelope {
                id: request.id,
                result: None,
                error: Some(ErrorBody {
                    code: -32601,
                    message: format!("method '{}' not found", other),
                    data: None,
                }),
            }
        }
    }
}

fn session_id_from(headers: &HeaderMap) -> Option<Uuid> {
    headers
        .get(SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
}

/// Constant-shape denial for the stream endpoint.
fn constant_denial(status: StatusCode) -> Response {
    (status, Json(json!({ "error": { "message": "access denied" } }))).into_response()
}

/// Auth failures: one body shape for every kind, 401 for credential
/// problems, 403 for ownership problems. The side-channel is notified
/// fire-and-forget.
fn auth_failure_response(
    services: &Arc<GatewayServices>,
    server_id: Uuid,
    err: AuthError,
) -> Response {
    let status = match err {
        AuthError::MissingCredential | AuthError::InvalidCredential => StatusCode::UNAUTHORIZED,
        AuthError::OrganizationMismatch | AuthError::ServerNotFound => StatusCode::FORBIDDEN,
    };

    let notifier = Arc::clone(&services.notifier);
    let kind = err.kind();
    tokio::spawn(async move {
        notifier
            .notify(GatewayEventEnvelope::now(GatewayEvent::AuthenticationFailed {
                requested_server_id: server_id,
                failure_kind: kind.to_string(),
            }))
            .await;
    });

    (
        status,
        Json(json!({ "error": { "kind": kind, "message": err.to_string() } })),
    )
        .into_response()
}
