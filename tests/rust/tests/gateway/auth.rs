//! Credential resolver tests
//!
//! Covers the three credential kinds, the four failure kinds, the
//! organization-ownership cross-check, and decision/key-set caching.

use std::sync::atomic::Ordering;

use pretty_assertions::assert_eq;
use unigate_core::{AuthError, AuthMethod};
use unigate_gateway::auth::Credential;
use uuid::Uuid;

use tests::{make_api_key, make_server, mint_token, TestHarness};

#[tokio::test]
async fn test_api_key_resolves_to_context() {
    let harness = TestHarness::new();
    let org = Uuid::new_v4();
    let server = harness.add_backend(org, "github", &["get_me"]);
    harness.api_keys.insert(make_api_key(org, "ug_valid"));

    let ctx = harness
        .services
        .resolver
        .resolve(&Credential::ApiKey("ug_valid".to_string()), server.id)
        .await
        .expect("resolution succeeds");

    assert_eq!(ctx.auth_method, AuthMethod::ApiKey);
    assert_eq!(ctx.organization_id, org);
    assert_eq!(ctx.mcp_server_id, server.id);
    assert_eq!(ctx.user_id.as_deref(), Some("user-1"));
    assert!(ctx.api_key_id.is_some());
}

#[tokio::test]
async fn test_unknown_api_key_is_invalid_credential() {
    let harness = TestHarness::new();
    let org = Uuid::new_v4();
    let server = harness.add_backend(org, "github", &[]);

    let err = harness
        .services
        .resolver
        .resolve(&Credential::ApiKey("ug_unknown".to_string()), server.id)
        .await
        .unwrap_err();
    assert_eq!(err, AuthError::InvalidCredential);
}

#[tokio::test]
async fn test_revoked_api_key_is_invalid_credential() {
    let harness = TestHarness::new();
    let org = Uuid::new_v4();
    let server = harness.add_backend(org, "github", &[]);
    let mut key = make_api_key(org, "ug_revoked");
    key.revoked = true;
    harness.api_keys.insert(key);

    let err = harness
        .services
        .resolver
        .resolve(&Credential::ApiKey("ug_revoked".to_string()), server.id)
        .await
        .unwrap_err();
    assert_eq!(err, AuthError::InvalidCredential);
}

#[tokio::test]
async fn test_missing_credential_rejected_unless_anonymous_allowed() {
    let harness = TestHarness::new();
    let org = Uuid::new_v4();
    let server = harness.add_backend(org, "github", &[]);

    let err = harness
        .services
        .resolver
        .resolve(&Credential::None, server.id)
        .await
        .unwrap_err();
    assert_eq!(err, AuthError::MissingCredential);

    let mut open_server = make_server(org, "public");
    open_server.allow_anonymous = true;
    harness.servers.insert(open_server.clone());

    let ctx = harness
        .services
        .resolver
        .resolve(&Credential::None, open_server.id)
        .await
        .expect("anonymous access allowed");
    assert_eq!(ctx.auth_method, AuthMethod::Anonymous);
    assert_eq!(ctx.user_id, None);
}

#[tokio::test]
async fn test_foreign_organization_key_is_mismatch_not_not_found() {
    let harness = TestHarness::new();
    let org_a = Uuid::new_v4();
    let org_b = Uuid::new_v4();
    let server_b = harness.add_backend(org_b, "jira", &[]);
    harness.api_keys.insert(make_api_key(org_a, "ug_org_a"));

    let err = harness
        .services
        .resolver
        .resolve(&Credential::ApiKey("ug_org_a".to_string()), server_b.id)
        .await
        .unwrap_err();
    assert_eq!(err, AuthError::OrganizationMismatch);
}

#[tokio::test]
async fn test_unknown_server_is_server_not_found() {
    let harness = TestHarness::new();
    let org = Uuid::new_v4();
    harness.api_keys.insert(make_api_key(org, "ug_valid"));

    let err = harness
        .services
        .resolver
        .resolve(&Credential::ApiKey("ug_valid".to_string()), Uuid::new_v4())
        .await
        .unwrap_err();
    assert_eq!(err, AuthError::ServerNotFound);
}

#[tokio::test]
async fn test_bearer_token_resolves_to_context() {
    let harness = TestHarness::new();
    let org = Uuid::new_v4();
    let server = harness.add_backend(org, "github", &[]);
    let token = mint_token(org, "alice", 3600);

    let ctx = harness
        .services
        .resolver
        .resolve(&Credential::Bearer(token), server.id)
        .await
        .expect("bearer resolution succeeds");

    assert_eq!(ctx.auth_method, AuthMethod::Bearer);
    assert_eq!(ctx.organization_id, org);
    assert_eq!(ctx.user_id.as_deref(), Some("alice"));
    assert_eq!(ctx.api_key_id, None);
}

#[tokio::test]
async fn test_bearer_for_other_organization_is_mismatch() {
    let harness = TestHarness::new();
    let org_a = Uuid::new_v4();
    let org_b = Uuid::new_v4();
    let server_b = harness.add_backend(org_b, "jira", &[]);
    let token = mint_token(org_a, "alice", 3600);

    let err = harness
        .services
        .resolver
        .resolve(&Credential::Bearer(token), server_b.id)
        .await
        .unwrap_err();
    assert_eq!(err, AuthError::OrganizationMismatch);
}

#[tokio::test]
async fn test_expired_bearer_is_invalid_credential() {
    let harness = TestHarness::new();
    let org = Uuid::new_v4();
    let server = harness.add_backend(org, "github", &[]);
    let token = mint_token(org, "alice", -3600);

    let err = harness
        .services
        .resolver
        .resolve(&Credential::Bearer(token), server.id)
        .await
        .unwrap_err();
    assert_eq!(err, AuthError::InvalidCredential);
}

#[tokio::test]
async fn test_garbage_bearer_is_invalid_credential() {
    let harness = TestHarness::new();
    let org = Uuid::new_v4();
    let server = harness.add_backend(org, "github", &[]);

    let err = harness
        .services
        .resolver
        .resolve(
            &Credential::Bearer("not-a-jwt-at-all".to_string()),
            server.id,
        )
        .await
        .unwrap_err();
    assert_eq!(err, AuthError::InvalidCredential);
}

#[tokio::test]
async fn test_successful_decision_is_cached() {
    let harness = TestHarness::new();
    let org = Uuid::new_v4();
    let server = harness.add_backend(org, "github", &[]);
    harness.api_keys.insert(make_api_key(org, "ug_cached"));

    let credential = Credential::ApiKey("ug_cached".to_string());
    for _ in 0..3 {
        harness
            .services
            .resolver
            .resolve(&credential, server.id)
            .await
            .expect("resolution succeeds");
    }

    // One repository lookup; the rest served from the decision cache.
    assert_eq!(harness.api_keys.lookups.load(Ordering::Relaxed), 1);
}

#[tokio::test]
async fn test_key_set_fetched_once_across_tokens() {
    let harness = TestHarness::new();
    let org = Uuid::new_v4();
    let server = harness.add_backend(org, "github", &[]);

    for sub in ["alice", "bob", "carol"] {
        let token = mint_token(org, sub, 3600);
        harness
            .services
            .resolver
            .resolve(&Credential::Bearer(token), server.id)
            .await
            .expect("bearer resolution succeeds");
    }

    assert_eq!(harness.identity.fetches.load(Ordering::Relaxed), 1);
}
