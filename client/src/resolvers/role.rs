//! Role Resolver
//!
//! Answers "does the signed-in account hold the admin role?". Any failure to
//! answer counts as "no".

use std::sync::Arc;
use std::time::Duration;

use larder_common::{UserId, ADMIN_ROLE};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tracing::{debug, warn};

use super::{guarded, RefreshTrigger, ResolverTask};
use crate::backend::{BackendError, QueryService};
use crate::config::ResolverConfig;
use crate::query_cache::{QueryCache, Ticket};
use crate::session::{SessionHandle, SessionState};

/// Published role answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RoleStatus {
    /// Account the answer is about.
    pub user_id: Option<UserId>,
    pub is_admin: bool,
    pub loading: bool,
}

type Completion = (Ticket, Result<bool, BackendError>);

/// Read side of the role resolver.
#[derive(Debug, Clone)]
pub struct RoleHandle {
    rx: watch::Receiver<RoleStatus>,
    refresh_tx: mpsc::Sender<RefreshTrigger>,
}

impl RoleHandle {
    /// Current answer.
    pub fn current(&self) -> RoleStatus {
        *self.rx.borrow()
    }

    /// A receiver that wakes whenever the answer changes.
    pub fn subscribe(&self) -> watch::Receiver<RoleStatus> {
        self.rx.clone()
    }

    /// Re-query the role assignment for the signed-in account.
    pub fn refresh(&self) {
        if let Err(mpsc::error::TrySendError::Closed(_)) =
            self.refresh_tx.try_send(RefreshTrigger::Forced)
        {
            debug!("Role resolver stopped, refresh ignored");
        }
    }
}

/// Background resolver for the admin role assignment.
pub struct RoleResolver {
    handle: RoleHandle,
    task: ResolverTask,
}

impl RoleResolver {
    /// Start following `session`.
    pub fn spawn(
        session: &SessionHandle,
        queries: Arc<dyn QueryService>,
        config: &ResolverConfig,
    ) -> Self {
        let (status_tx, status_rx) = watch::channel(RoleStatus::default());
        let (refresh_tx, refresh_rx) = mpsc::channel(8);

        let driver = Driver {
            session_rx: session.subscribe(),
            queries,
            cache: QueryCache::new(),
            status_tx,
            refresh_rx,
            in_flight: JoinSet::new(),
            current: None,
            stale_after: config.role_stale_after,
        };
        let task = ResolverTask::spawn("role", move |shutdown| driver.run(shutdown));

        Self {
            handle: RoleHandle {
                rx: status_rx,
                refresh_tx,
            },
            task,
        }
    }

    /// A read handle for gates and callers.
    pub fn handle(&self) -> RoleHandle {
        self.handle.clone()
    }

    /// Stop the resolver and discard outstanding queries.
    pub async fn shutdown(self) {
        self.task.shutdown().await;
    }
}

struct Driver {
    session_rx: watch::Receiver<SessionState>,
    queries: Arc<dyn QueryService>,
    cache: QueryCache<bool>,
    status_tx: watch::Sender<RoleStatus>,
    refresh_rx: mpsc::Receiver<RefreshTrigger>,
    in_flight: JoinSet<Completion>,
    current: Option<UserId>,
    stale_after: Duration,
}

impl Driver {
    async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        self.on_session_change();

        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                changed = self.session_rx.changed() => {
                    if changed.is_err() {
                        debug!("Session source dropped, stopping role resolver");
                        break;
                    }
                    self.on_session_change();
                }
                Some(trigger) = self.refresh_rx.recv() => self.refresh(trigger),
                Some(joined) = self.in_flight.join_next() => match joined {
                    Ok((ticket, result)) => self.on_complete(ticket, result),
                    Err(e) => warn!("Role query task ended abnormally: {}", e),
                },
            }
        }

        self.in_flight.abort_all();
    }

    fn on_session_change(&mut self) {
        let state = self.session_rx.borrow_and_update().clone();
        let next = if state.loading { None } else { state.user_id() };
        if next == self.current {
            return;
        }

        if let Some(previous) = self.current.take() {
            if self.cache.cancel_in_flight(previous) {
                debug!(user_id = %previous, "Discarding role query for signed-out account");
            }
        }
        self.current = next;

        match next {
            None => self.publish(RoleStatus::default()),
            Some(user) => {
                let cached = self
                    .cache
                    .get(user)
                    .filter(|_| self.cache.is_fresh(user, self.stale_after));
                match cached {
                    Some(cached) => self.publish(RoleStatus {
                        user_id: next,
                        is_admin: cached.value,
                        loading: false,
                    }),
                    None => {
                        self.publish(RoleStatus {
                            user_id: next,
                            is_admin: false,
                            loading: true,
                        });
                        self.refresh(RefreshTrigger::Session);
                    }
                }
            }
        }
    }

    fn refresh(&mut self, trigger: RefreshTrigger) {
        let Some(user) = self.current else {
            return;
        };
        let Some(ticket) = self.cache.begin(user) else {
            debug!(?trigger, user_id = %user, "Role query already in flight");
            return;
        };

        debug!(?trigger, user_id = %user, "Querying admin role");
        let queries = Arc::clone(&self.queries);
        self.in_flight.spawn(async move {
            let result = guarded(queries.has_role(user, ADMIN_ROLE)).await;
            (ticket, result)
        });
    }

    fn on_complete(&mut self, ticket: Ticket, result: Result<bool, BackendError>) {
        let user = ticket.key();
        let is_admin = match result {
            Ok(is_admin) => {
                if !self.cache.complete(ticket, Some(is_admin)) {
                    debug!(user_id = %user, "Dropping stale role answer");
                    return;
                }
                is_admin
            }
            Err(e) => {
                warn!(
                    user_id = %user,
                    error = %e,
                    transient = e.is_transient(),
                    "Role query failed, treating as not admin"
                );
                if !self.cache.complete(ticket, None) {
                    return;
                }
                false
            }
        };

        if self.current == Some(user) {
            self.publish(RoleStatus {
                user_id: Some(user),
                is_admin,
                loading: false,
            });
        }
    }

    fn publish(&self, status: RoleStatus) {
        self.status_tx.send_if_modified(|current| {
            if *current == status {
                return false;
            }
            *current = status;
            true
        });
    }
}
