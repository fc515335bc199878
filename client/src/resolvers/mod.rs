//! Access resolvers.
//!
//! Each resolver is a background task that follows the session, queries the
//! backend for one fact about the signed-in account and publishes the answer
//! on a `watch` channel. The task is the only writer of its cache and its
//! channel; handles only read.

pub mod block_status;
pub mod role;

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::backend::BackendError;

pub use block_status::{BlockStatus, BlockStatusHandle, BlockStatusResolver};
pub use role::{RoleHandle, RoleResolver, RoleStatus};

/// How long `shutdown` waits for a resolver task before giving up on it.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(3);

/// What caused a refresh request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshTrigger {
    /// The signed-in account changed.
    Session,
    /// The poll interval elapsed.
    Timer,
    /// The application regained focus.
    Focus,
    /// A caller asked for an immediate re-check.
    Forced,
}

impl RefreshTrigger {
    /// Whether this trigger re-queries even when the cached answer is fresh.
    /// Only a session change reuses a fresh answer.
    pub const fn bypasses_freshness(self) -> bool {
        matches!(self, Self::Timer | Self::Focus | Self::Forced)
    }
}

/// A running resolver task and its shutdown signal.
pub(crate) struct ResolverTask {
    name: &'static str,
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl ResolverTask {
    pub(crate) fn spawn<F, Fut>(name: &'static str, run: F) -> Self
    where
        F: FnOnce(watch::Receiver<bool>) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(run(shutdown_rx));
        Self {
            name,
            shutdown_tx,
            handle,
        }
    }

    /// Signal the task and wait for it to finish.
    pub(crate) async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        match tokio::time::timeout(SHUTDOWN_GRACE, self.handle).await {
            Ok(_) => info!(resolver = self.name, "Resolver stopped"),
            Err(_) => warn!(resolver = self.name, "Resolver did not stop in time"),
        }
    }
}

/// Run a backend query, turning a panic inside it into an error so the
/// resolver always gets its ticket back.
pub(crate) async fn guarded<T, F>(query: F) -> Result<T, BackendError>
where
    F: Future<Output = Result<T, BackendError>>,
{
    AssertUnwindSafe(query)
        .catch_unwind()
        .await
        .unwrap_or_else(|_| Err(BackendError::Internal("query panicked".into())))
}
