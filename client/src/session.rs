//! Session Source
//!
//! Holds the one active identity for this client. [`SessionSource`] is the
//! only writer; everything downstream observes it through a cloned
//! [`SessionHandle`].

use std::sync::Arc;

use larder_common::{Identity, UserId};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::backend::{AuthService, BackendError};

/// Snapshot of the session as seen by resolvers and gates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionState {
    /// Signed-in identity, `None` when unauthenticated.
    pub identity: Option<Identity>,
    /// True until the first restore attempt has finished.
    pub loading: bool,
    /// Incremented on every change of signed-in account.
    pub epoch: u64,
}

impl SessionState {
    const fn initial() -> Self {
        Self {
            identity: None,
            loading: true,
            epoch: 0,
        }
    }

    /// ID of the signed-in account.
    pub fn user_id(&self) -> Option<UserId> {
        self.identity.as_ref().map(|i| i.id)
    }
}

/// Session operation errors.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Email or password was blank.
    #[error("Email and password are required")]
    MissingCredentials,

    /// The auth service refused or could not be reached.
    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// Read-only view of the session with change notification.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    rx: watch::Receiver<SessionState>,
}

impl SessionHandle {
    /// Current session snapshot.
    pub fn current(&self) -> SessionState {
        self.rx.borrow().clone()
    }

    /// A receiver that wakes on every session change.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.rx.clone()
    }

    /// Wait until the session has finished loading and return it.
    pub async fn resolved(&self) -> SessionState {
        let mut rx = self.rx.clone();
        let state = match rx.wait_for(|s| !s.loading).await {
            Ok(state) => state.clone(),
            // Source dropped: whatever was last published is final.
            Err(_) => self.current(),
        };
        state
    }
}

/// Owner of the session state.
pub struct SessionSource {
    auth: Arc<dyn AuthService>,
    tx: watch::Sender<SessionState>,
}

impl SessionSource {
    /// Create a source in the loading state. Call [`Self::restore`] to resolve it.
    pub fn new(auth: Arc<dyn AuthService>) -> Self {
        let (tx, _rx) = watch::channel(SessionState::initial());
        Self { auth, tx }
    }

    /// A read-only handle for downstream consumers.
    pub fn handle(&self) -> SessionHandle {
        SessionHandle {
            rx: self.tx.subscribe(),
        }
    }

    /// Resolve the initial session from whatever the auth service has stored.
    ///
    /// A failure to reach the auth service resolves to "signed out".
    pub async fn restore(&self) -> SessionState {
        let identity = match self.auth.current_identity().await {
            Ok(identity) => identity,
            Err(e) => {
                warn!("Session restore failed, continuing signed out: {}", e);
                None
            }
        };
        debug!(signed_in = identity.is_some(), "Session restored");
        self.publish(identity);
        self.tx.borrow().clone()
    }

    /// Sign in and make the returned identity current.
    pub async fn sign_in(&self, email: &str, password: &str) -> Result<Identity, SessionError> {
        if email.trim().is_empty() || password.is_empty() {
            return Err(SessionError::MissingCredentials);
        }

        match self.auth.sign_in(email.trim(), password).await {
            Ok(identity) => {
                self.publish(Some(identity.clone()));
                Ok(identity)
            }
            Err(e) => {
                // A failed attempt still settles a session that was loading.
                self.tx.send_if_modified(|state| std::mem::replace(&mut state.loading, false));
                Err(e.into())
            }
        }
    }

    /// Sign out. Local state is cleared even if the remote call fails.
    pub async fn sign_out(&self) {
        if let Err(e) = self.auth.sign_out().await {
            warn!("Sign-out request failed: {}", e);
        }
        self.publish(None);
        info!("Session cleared");
    }

    fn publish(&self, identity: Option<Identity>) {
        self.tx.send_if_modified(|state| {
            let changed_account = state.user_id() != identity.as_ref().map(|i| i.id);
            if !changed_account && !state.loading && state.identity == identity {
                return false;
            }
            if changed_account {
                state.epoch += 1;
            }
            state.identity = identity;
            state.loading = false;
            true
        });
    }
}
