//! Pooled connection tests
//!
//! Single-flight dialing, the consecutive-failure ceiling, recovery after
//! transport loss, and call correlation over a shared channel.

use std::time::Duration;

use pretty_assertions::assert_eq;
use serde_json::json;
use unigate_core::{DomainError, GatewayEvent};
use unigate_gateway::wire::METHOD_CALL_TOOL;
use uuid::Uuid;

use tests::{make_server, mocks::BackendBehavior, TestHarness};

#[tokio::test]
async fn test_concurrent_lookups_share_one_connection_attempt() {
    let harness = TestHarness::new();
    let org = Uuid::new_v4();
    let record = harness.add_backend(org, "github", &["get_me"]);
    // Widen the race window so both lookups overlap the dial.
    harness.connector.set_connect_delay(Duration::from_millis(100));

    let manager = &harness.services.manager;
    let (first, second) = tokio::join!(manager.channel_for(&record), manager.channel_for(&record));

    assert!(first.is_ok());
    assert!(second.is_ok());
    assert_eq!(harness.connector.connect_attempts(record.id), 1);
    assert_eq!(harness.services.manager.pool_stats().total_connections, 1);
}

#[tokio::test]
async fn test_failure_ceiling_closes_and_removes_connection() {
    let harness = TestHarness::new();
    let org = Uuid::new_v4();
    let record = make_server(org, "github");
    harness.servers.insert(record.clone());
    harness
        .connector
        .set_behavior(record.id, BackendBehavior::Refuse);

    let err = harness
        .services
        .manager
        .channel_for(&record)
        .await
        .unwrap_err();
    assert_eq!(err, DomainError::BackendUnavailable(record.id));

    // Configured ceiling of three attempts, then closed and gone.
    assert_eq!(harness.connector.connect_attempts(record.id), 3);
    assert_eq!(harness.services.manager.pool_stats().total_connections, 0);

    // The driver emits the closed event just after publishing the state.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(
        harness
            .notifier
            .count_matching(|e| matches!(e, GatewayEvent::BackendConnectionClosed { .. })),
        1
    );
}

#[tokio::test]
async fn test_closed_backend_gets_fresh_instance_on_next_lookup() {
    let harness = TestHarness::new();
    let org = Uuid::new_v4();
    let record = make_server(org, "github");
    harness.servers.insert(record.clone());
    harness
        .connector
        .set_behavior(record.id, BackendBehavior::Refuse);

    harness
        .services
        .manager
        .channel_for(&record)
        .await
        .unwrap_err();
    let attempts_after_first = harness.connector.connect_attempts(record.id);

    // The closed handle is absent from the pool; a new lookup dials fresh
    // rather than returning the dead instance.
    harness.connector.healthy(record.id, &["get_me"]);
    let channel = harness
        .services
        .manager
        .channel_for(&record)
        .await
        .expect("fresh instance connects");
    assert!(!channel.is_closed());
    assert!(harness.connector.connect_attempts(record.id) > attempts_after_first);
}

#[tokio::test]
async fn test_transport_loss_degrades_then_reconnects() {
    let harness = TestHarness::new();
    let org = Uuid::new_v4();
    let record = harness.add_backend(org, "github", &["get_me"]);

    let manager = &harness.services.manager;
    let channel = manager.channel_for(&record).await.expect("connects");

    // Simulate transport death underneath a ready connection.
    channel.close();
    tokio::time::sleep(Duration::from_millis(150)).await;

    let replacement = manager.channel_for(&record).await.expect("reconnects");
    assert!(!replacement.is_closed());
    assert!(harness.connector.connect_attempts(record.id) >= 2);
    assert!(
        harness
            .notifier
            .count_matching(|e| matches!(e, GatewayEvent::BackendConnectionDegraded { .. }))
            >= 1
    );
}

#[tokio::test]
async fn test_concurrent_calls_correlate_on_one_channel() {
    let harness = TestHarness::new();
    let org = Uuid::new_v4();
    let record = harness.add_backend(org, "github", &["alpha", "beta"]);

    let channel = harness
        .services
        .manager
        .channel_for(&record)
        .await
        .expect("connects");

    let call_a = channel.call(
        METHOD_CALL_TOOL,
        Some(json!({"name": "alpha", "arguments": {"n": 1}})),
        Duration::from_secs(2),
    );
    let call_b = channel.call(
        METHOD_CALL_TOOL,
        Some(json!({"name": "beta", "arguments": {"n": 2}})),
        Duration::from_secs(2),
    );
    let (result_a, result_b) = tokio::join!(call_a, call_b);

    let result_a = result_a.expect("alpha succeeds");
    let result_b = result_b.expect("beta succeeds");
    assert_eq!(result_a["echo"], "alpha");
    assert_eq!(result_a["arguments"]["n"], 1);
    assert_eq!(result_b["echo"], "beta");
    assert_eq!(result_b["arguments"]["n"], 2);
}
