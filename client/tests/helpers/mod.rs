//! Reusable test helpers for resolver and gate integration tests.
//!
//! Provides [`FakeBackend`], an in-memory auth and query service with call
//! counters, per-account latency and failure injection, plus
//! [`spawn_test_server`] for exercising the REST binding over real HTTP.
#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use larder_client::backend::{AuthService, BackendError, QueryService};
use larder_client::config::ResolverConfig;
use larder_client::{AccessContext, RouteTable, SessionSource};
use larder_common::{Identity, UserId};
use tokio::task::JoinHandle;
use uuid::Uuid;

pub const PASSWORD: &str = "correct horse";

// ============================================================================
// Fake backend
// ============================================================================

/// In-memory stand-in for the hosted auth and table services.
#[derive(Default)]
pub struct FakeBackend {
    accounts: Mutex<HashMap<String, Identity>>,
    signed_in: Mutex<Option<Identity>>,
    admins: Mutex<HashSet<UserId>>,
    /// Profile rows; a missing key means no profile row exists.
    profiles: Mutex<HashMap<UserId, Option<bool>>>,
    block_delays: Mutex<HashMap<UserId, Duration>>,
    fail_blocked: AtomicBool,
    fail_roles: AtomicBool,
    block_calls: AtomicUsize,
    role_calls: AtomicUsize,
    block_in_flight: AtomicUsize,
    max_block_in_flight: AtomicUsize,
}

impl FakeBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register an account with an unblocked profile row.
    pub fn add_account(&self, email: &str) -> Identity {
        let identity = Identity {
            id: UserId::new(Uuid::new_v4()),
            email: Some(email.to_string()),
        };
        self.accounts
            .lock()
            .unwrap()
            .insert(email.to_string(), identity.clone());
        self.profiles.lock().unwrap().insert(identity.id, Some(false));
        identity
    }

    pub fn add_admin(&self, email: &str) -> Identity {
        let identity = self.add_account(email);
        self.admins.lock().unwrap().insert(identity.id);
        identity
    }

    pub fn set_blocked(&self, user: UserId, blocked: bool) {
        self.profiles.lock().unwrap().insert(user, Some(blocked));
    }

    pub fn set_block_flag(&self, user: UserId, flag: Option<bool>) {
        self.profiles.lock().unwrap().insert(user, flag);
    }

    pub fn remove_profile(&self, user: UserId) {
        self.profiles.lock().unwrap().remove(&user);
    }

    pub fn set_block_delay(&self, user: UserId, delay: Duration) {
        self.block_delays.lock().unwrap().insert(user, delay);
    }

    pub fn fail_block_queries(&self, fail: bool) {
        self.fail_blocked.store(fail, Ordering::SeqCst);
    }

    pub fn fail_role_queries(&self, fail: bool) {
        self.fail_roles.store(fail, Ordering::SeqCst);
    }

    pub fn block_calls(&self) -> usize {
        self.block_calls.load(Ordering::SeqCst)
    }

    pub fn role_calls(&self) -> usize {
        self.role_calls.load(Ordering::SeqCst)
    }

    /// Highest number of block-status queries that were outstanding at once.
    pub fn max_block_in_flight(&self) -> usize {
        self.max_block_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AuthService for FakeBackend {
    async fn current_identity(&self) -> Result<Option<Identity>, BackendError> {
        Ok(self.signed_in.lock().unwrap().clone())
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<Identity, BackendError> {
        let identity = self.accounts.lock().unwrap().get(email).cloned();
        match identity {
            Some(identity) if password == PASSWORD => {
                *self.signed_in.lock().unwrap() = Some(identity.clone());
                Ok(identity)
            }
            _ => Err(BackendError::InvalidCredentials),
        }
    }

    async fn sign_out(&self) -> Result<(), BackendError> {
        *self.signed_in.lock().unwrap() = None;
        Ok(())
    }
}

#[async_trait]
impl QueryService for FakeBackend {
    async fn has_role(&self, user: UserId, role: &str) -> Result<bool, BackendError> {
        self.role_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_roles.load(Ordering::SeqCst) {
            return Err(BackendError::from_status(503, "unavailable".into()));
        }
        Ok(role == "admin" && self.admins.lock().unwrap().contains(&user))
    }

    async fn is_blocked(&self, user: UserId) -> Result<Option<bool>, BackendError> {
        self.block_calls.fetch_add(1, Ordering::SeqCst);
        let now = self.block_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_block_in_flight.fetch_max(now, Ordering::SeqCst);

        let delay = self.block_delays.lock().unwrap().get(&user).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        self.block_in_flight.fetch_sub(1, Ordering::SeqCst);
        if self.fail_blocked.load(Ordering::SeqCst) {
            return Err(BackendError::from_status(503, "unavailable".into()));
        }
        // Read after the delay so flips during a slow query are observed.
        Ok(self.profiles.lock().unwrap().get(&user).copied().flatten())
    }
}

// ============================================================================
// Harness
// ============================================================================

/// A session source and running access context over a [`FakeBackend`].
pub struct Harness {
    pub backend: Arc<FakeBackend>,
    pub session: SessionSource,
    pub context: AccessContext,
}

impl Harness {
    /// Start resolvers without restoring the session, so it is still loading.
    pub fn start(backend: Arc<FakeBackend>, config: ResolverConfig) -> Self {
        let session = SessionSource::new(backend.clone());
        let context = AccessContext::start(
            &session.handle(),
            backend.clone(),
            &config,
            RouteTable::dashboard("/", "/dashboard"),
        );
        Self {
            backend,
            session,
            context,
        }
    }

    /// Start and restore to a signed-out session.
    pub async fn signed_out(backend: Arc<FakeBackend>, config: ResolverConfig) -> Self {
        let harness = Self::start(backend, config);
        harness.session.restore().await;
        drain().await;
        harness
    }

    /// Sign in and give the resolvers a turn to observe it.
    pub async fn sign_in(&self, email: &str) -> Identity {
        let identity = self
            .session
            .sign_in(email, PASSWORD)
            .await
            .expect("sign-in failed");
        drain().await;
        identity
    }

    pub async fn sign_out(&self) {
        self.session.sign_out().await;
        drain().await;
    }

    /// Wait until block status has an answer for the current account.
    pub async fn block_settled(&self) -> larder_client::resolvers::BlockStatus {
        let mut rx = self.context.block_status().subscribe();
        let status = tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|s| !s.loading))
            .await
            .expect("block status did not settle")
            .expect("block resolver stopped");
        status.clone()
    }

    /// Wait until the role answer is in.
    pub async fn role_settled(&self) -> larder_client::resolvers::RoleStatus {
        let mut rx = self.context.role().subscribe();
        let status = tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|s| !s.loading))
            .await
            .expect("role did not settle")
            .expect("role resolver stopped");
        *status
    }

    pub async fn shutdown(self) {
        self.context.shutdown().await;
    }
}

/// Let spawned tasks run without moving the paused clock far.
pub async fn drain() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

// ============================================================================
// Test servers
// ============================================================================

/// A running test HTTP server.
pub struct TestServer {
    pub url: String,
    handle: JoinHandle<()>,
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Serve `router` on an ephemeral local port.
pub async fn spawn_test_server(router: Router) -> TestServer {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind test server");
    let addr = listener.local_addr().expect("Failed to get local addr");
    let url = format!("http://{addr}");

    let handle = tokio::spawn(async move {
        axum::serve(listener, router)
            .await
            .expect("Test server failed");
    });

    TestServer { url, handle }
}
