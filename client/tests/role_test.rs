//! Role Resolver Tests

mod helpers;

use std::time::Duration;

use helpers::{drain, FakeBackend, Harness};
use larder_client::config::ResolverConfig;
use larder_client::resolvers::RoleStatus;

#[tokio::test(start_paused = true)]
async fn test_admin_assignment_resolves_true() {
    let backend = FakeBackend::new();
    let admin = backend.add_admin("owner@larder.test");
    let harness = Harness::signed_out(backend.clone(), ResolverConfig::default()).await;

    harness.sign_in("owner@larder.test").await;
    let status = harness.role_settled().await;
    assert!(status.is_admin);
    assert_eq!(status.user_id, Some(admin.id));
    assert_eq!(backend.role_calls(), 1);
    harness.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_no_assignment_resolves_false() {
    let backend = FakeBackend::new();
    backend.add_account("cook@larder.test");
    let harness = Harness::signed_out(backend.clone(), ResolverConfig::default()).await;

    harness.sign_in("cook@larder.test").await;
    assert!(!harness.role_settled().await.is_admin);
    harness.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_no_query_without_identity() {
    let backend = FakeBackend::new();
    let harness = Harness::signed_out(backend.clone(), ResolverConfig::default()).await;
    drain().await;

    assert_eq!(harness.context.role().current(), RoleStatus::default());
    assert_eq!(backend.role_calls(), 0);
    harness.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_query_failure_resolves_false() {
    let backend = FakeBackend::new();
    backend.add_admin("owner@larder.test");
    backend.fail_role_queries(true);
    let harness = Harness::signed_out(backend.clone(), ResolverConfig::default()).await;

    harness.sign_in("owner@larder.test").await;
    let status = harness.role_settled().await;
    assert!(!status.is_admin);
    assert!(!status.loading);

    // Failures are not cached; an explicit refresh asks again.
    backend.fail_role_queries(false);
    harness.context.role().refresh();
    drain().await;
    assert!(harness.context.role().current().is_admin);
    assert_eq!(backend.role_calls(), 2);
    harness.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_answer_reused_for_same_account_until_stale() {
    let backend = FakeBackend::new();
    backend.add_admin("owner@larder.test");
    let harness = Harness::signed_out(backend.clone(), ResolverConfig::default()).await;

    harness.sign_in("owner@larder.test").await;
    harness.role_settled().await;
    harness.sign_out().await;
    assert!(!harness.context.role().current().is_admin);

    harness.sign_in("owner@larder.test").await;
    assert!(harness.context.role().current().is_admin);
    assert_eq!(backend.role_calls(), 1);

    harness.sign_out().await;
    tokio::time::sleep(Duration::from_secs(61)).await;
    harness.sign_in("owner@larder.test").await;
    assert!(harness.role_settled().await.is_admin);
    assert_eq!(backend.role_calls(), 2);
    harness.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_switching_accounts_requeries() {
    let backend = FakeBackend::new();
    backend.add_admin("owner@larder.test");
    let cook = backend.add_account("cook@larder.test");
    let harness = Harness::signed_out(backend.clone(), ResolverConfig::default()).await;

    harness.sign_in("owner@larder.test").await;
    assert!(harness.role_settled().await.is_admin);

    harness.sign_out().await;
    harness.sign_in("cook@larder.test").await;
    let status = harness.role_settled().await;
    assert!(!status.is_admin);
    assert_eq!(status.user_id, Some(cook.id));
    assert_eq!(backend.role_calls(), 2);
    harness.shutdown().await;
}
