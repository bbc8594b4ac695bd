//! Session registry tests
//!
//! Registration, activity refresh, stream attachment semantics, and the
//! discard-on-disconnect contract for stream delivery.

use pretty_assertions::assert_eq;
use serde_json::json;
use unigate_core::{AuthMethod, AuthorizationContext};
use unigate_gateway::wire::ResponseEnvelope;
use uuid::Uuid;

use tests::TestHarness;

fn test_context() -> AuthorizationContext {
    AuthorizationContext {
        auth_method: AuthMethod::ApiKey,
        organization_id: Uuid::new_v4(),
        user_id: Some("user-1".to_string()),
        mcp_server_id: Uuid::new_v4(),
        api_key_id: Some(Uuid::new_v4()),
        pii_masking_mode: Default::default(),
        pii_info_types: vec![],
        compression_enabled: false,
    }
}

#[tokio::test]
async fn test_register_touch_close_lifecycle() {
    let harness = TestHarness::new();
    let registry = harness.services.manager.sessions();

    let session = registry.register(test_context());
    assert_eq!(registry.len(), 1);
    assert!(registry.touch(&session.id));

    registry.close(&session.id);
    assert_eq!(registry.len(), 0);
    assert!(!registry.touch(&session.id));
}

#[tokio::test]
async fn test_backend_references_are_identity_only() {
    let harness = TestHarness::new();
    let registry = harness.services.manager.sessions();

    let session = registry.register(test_context());
    let backend_a = Uuid::new_v4();
    let backend_b = Uuid::new_v4();
    session.add_backend(backend_a);
    session.add_backend(backend_b);
    session.add_backend(backend_a);

    let referenced = registry.referenced_backends();
    assert_eq!(referenced.len(), 2);
    assert!(referenced.contains(&backend_a));
    assert!(referenced.contains(&backend_b));
}

#[tokio::test]
async fn test_stream_delivery_and_fallback() {
    let harness = TestHarness::new();
    let registry = harness.services.manager.sessions();
    let session = registry.register(test_context());

    // Without a stream, delivery reports failure so callers answer inline.
    let envelope = ResponseEnvelope::success(json!(1), json!({"ok": true}));
    assert!(!session.deliver(envelope.clone()));

    let (mut receiver, _guard) = session.attach_stream();
    assert!(session.has_stream());
    assert!(session.deliver(envelope));

    let received = receiver.recv().await.expect("stream receives");
    assert_eq!(received.result, Some(json!({"ok": true})));
}

#[tokio::test]
async fn test_dropped_stream_discards_deliveries() {
    let harness = TestHarness::new();
    let registry = harness.services.manager.sessions();
    let session = registry.register(test_context());

    let (_receiver, guard) = session.attach_stream();
    // Client disconnect: the stream's drop guard cancels the attachment.
    guard.cancel();

    assert!(!session.has_stream());
    let envelope = ResponseEnvelope::success(json!(2), json!({"late": true}));
    assert!(!session.deliver(envelope));
}

#[tokio::test]
async fn test_reattach_replaces_previous_stream() {
    let harness = TestHarness::new();
    let registry = harness.services.manager.sessions();
    let session = registry.register(test_context());

    let (_old_receiver, old_guard) = session.attach_stream();
    let (mut new_receiver, _new_guard) = session.attach_stream();

    // The replaced attachment was cancelled; the new one receives.
    assert!(old_guard.is_cancelled());
    assert!(session.deliver(ResponseEnvelope::success(json!(3), json!("fresh"))));
    let received = new_receiver.recv().await.expect("new stream receives");
    assert_eq!(received.result, Some(json!("fresh")));
}

#[tokio::test]
async fn test_session_close_cancels_call_token() {
    let harness = TestHarness::new();
    let registry = harness.services.manager.sessions();
    let session = registry.register(test_context());

    let token = session.call_token();
    assert!(!token.is_cancelled());

    registry.close(&session.id);
    assert!(token.is_cancelled());
}
