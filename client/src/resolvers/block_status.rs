//! Block Status Resolver
//!
//! Tracks whether the signed-in account has been suspended. The flag can be
//! flipped out-of-band by an administrator, so the answer is re-checked:
//!
//! - every poll interval,
//! - whenever the application regains focus,
//! - on [`BlockStatusHandle::force_refresh`].
//!
//! All three funnel into one refresh path that issues at most one query per
//! account at a time. Only a session change reuses an answer younger than the
//! freshness window.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use larder_common::UserId;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinSet;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::{guarded, RefreshTrigger, ResolverTask};
use crate::backend::{BackendError, QueryService};
use crate::config::{BlockFailPolicy, ResolverConfig};
use crate::lifecycle::{next_event, LifecycleEvent};
use crate::query_cache::{QueryCache, Ticket};
use crate::session::{SessionHandle, SessionState};

/// Published block-status answer.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BlockStatus {
    /// Account the answer is about.
    pub user_id: Option<UserId>,
    /// Whether the account is suspended.
    pub is_blocked: bool,
    /// True until the first answer for the current account arrives.
    pub loading: bool,
    /// When the backend last answered for this account.
    pub checked_at: Option<DateTime<Utc>>,
    /// Error from the most recent query, if it failed.
    pub last_error: Option<String>,
}

impl BlockStatus {
    fn pending(user: UserId) -> Self {
        Self {
            user_id: Some(user),
            loading: true,
            ..Self::default()
        }
    }
}

type Completion = (Ticket, Result<Option<bool>, BackendError>);

/// Read side of the block-status resolver.
#[derive(Debug, Clone)]
pub struct BlockStatusHandle {
    rx: watch::Receiver<BlockStatus>,
    refresh_tx: mpsc::Sender<RefreshTrigger>,
}

impl BlockStatusHandle {
    /// Current answer.
    pub fn current(&self) -> BlockStatus {
        self.rx.borrow().clone()
    }

    /// A receiver that wakes whenever the answer changes.
    pub fn subscribe(&self) -> watch::Receiver<BlockStatus> {
        self.rx.clone()
    }

    /// Re-check now, ignoring freshness. Calls made while a query is already
    /// outstanding for the account are absorbed by it.
    pub fn force_refresh(&self) {
        match self.refresh_tx.try_send(RefreshTrigger::Forced) {
            Ok(()) | Err(mpsc::error::TrySendError::Full(_)) => {}
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("Block-status resolver stopped, refresh ignored");
            }
        }
    }
}

/// Background resolver for the profile block flag.
pub struct BlockStatusResolver {
    handle: BlockStatusHandle,
    task: ResolverTask,
}

impl BlockStatusResolver {
    /// Start following `session`. `lifecycle` supplies focus events; pass
    /// `None` when the host has none.
    pub fn spawn(
        session: &SessionHandle,
        queries: Arc<dyn QueryService>,
        config: &ResolverConfig,
        lifecycle: Option<broadcast::Receiver<LifecycleEvent>>,
    ) -> Self {
        let (status_tx, status_rx) = watch::channel(BlockStatus::default());
        let (refresh_tx, refresh_rx) = mpsc::channel(8);

        let driver = Driver {
            session_rx: session.subscribe(),
            queries,
            cache: QueryCache::new(),
            status_tx,
            refresh_rx,
            lifecycle,
            in_flight: JoinSet::new(),
            current: None,
            stale_after: config.block_stale_after,
            poll_interval: config.block_poll_interval,
            fail_policy: config.block_fail_policy,
        };
        let task = ResolverTask::spawn("block_status", move |shutdown| driver.run(shutdown));

        Self {
            handle: BlockStatusHandle {
                rx: status_rx,
                refresh_tx,
            },
            task,
        }
    }

    /// A read handle for gates and callers.
    pub fn handle(&self) -> BlockStatusHandle {
        self.handle.clone()
    }

    /// Stop polling and discard outstanding queries.
    pub async fn shutdown(self) {
        self.task.shutdown().await;
    }
}

struct Driver {
    session_rx: watch::Receiver<SessionState>,
    queries: Arc<dyn QueryService>,
    cache: QueryCache<bool>,
    status_tx: watch::Sender<BlockStatus>,
    refresh_rx: mpsc::Receiver<RefreshTrigger>,
    lifecycle: Option<broadcast::Receiver<LifecycleEvent>>,
    in_flight: JoinSet<Completion>,
    current: Option<UserId>,
    stale_after: Duration,
    poll_interval: Duration,
    fail_policy: BlockFailPolicy,
}

impl Driver {
    async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval_at(Instant::now() + self.poll_interval, self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        self.on_session_change();

        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                changed = self.session_rx.changed() => {
                    if changed.is_err() {
                        debug!("Session source dropped, stopping block-status resolver");
                        break;
                    }
                    self.on_session_change();
                }
                Some(trigger) = self.refresh_rx.recv() => self.refresh(trigger),
                _ = ticker.tick() => self.refresh(RefreshTrigger::Timer),
                event = next_event(&mut self.lifecycle) => {
                    if event == LifecycleEvent::FocusGained {
                        self.refresh(RefreshTrigger::Focus);
                    }
                }
                Some(joined) = self.in_flight.join_next() => match joined {
                    Ok((ticket, result)) => self.on_complete(ticket, result),
                    Err(e) => warn!("Block-status query task ended abnormally: {}", e),
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
                debug!(user_id = %previous, "Discarding block-status query for signed-out account");
            }
        }
        self.current = next;

        match next {
            None => self.publish(BlockStatus::default()),
            Some(user) => {
                let cached = self
                    .cache
                    .get(user)
                    .filter(|_| self.cache.is_fresh(user, self.stale_after));
                match cached {
                    Some(cached) => self.publish(BlockStatus {
                        user_id: next,
                        is_blocked: cached.value,
                        loading: false,
                        checked_at: Some(cached.checked_at),
                        last_error: None,
                    }),
                    None => self.publish(BlockStatus::pending(user)),
                }
                self.refresh(RefreshTrigger::Session);
            }
        }
    }

    fn refresh(&mut self, trigger: RefreshTrigger) {
        let Some(user) = self.current else {
            return;
        };
        if !trigger.bypasses_freshness() && self.cache.is_fresh(user, self.stale_after) {
            debug!(?trigger, user_id = %user, "Block status still fresh");
            return;
        }
        let Some(ticket) = self.cache.begin(user) else {
            debug!(?trigger, user_id = %user, "Block-status query already in flight");
            return;
        };

        debug!(?trigger, user_id = %user, "Querying block status");
        let queries = Arc::clone(&self.queries);
        self.in_flight.spawn(async move {
            let result = guarded(queries.is_blocked(user)).await;
            (ticket, result)
        });
    }

    fn on_complete(&mut self, ticket: Ticket, result: Result<Option<bool>, BackendError>) {
        let user = ticket.key();
        match result {
            Ok(flag) => {
                // No profile row yet: nothing has blocked the account.
                let blocked = flag.unwrap_or(false);
                if !self.cache.complete(ticket, Some(blocked)) || self.current != Some(user) {
                    debug!(user_id = %user, "Dropping stale block-status answer");
                    return;
                }
                if blocked {
                    info!(user_id = %user, "Account is blocked");
                }
                let checked_at = self.cache.get(user).map(|c| c.checked_at);
                self.publish(BlockStatus {
                    user_id: Some(user),
                    is_blocked: blocked,
                    loading: false,
                    checked_at,
                    last_error: None,
                });
            }
            Err(e) => {
                warn!(
                    user_id = %user,
                    error = %e,
                    transient = e.is_transient(),
                    "Block-status query failed"
                );
                let previous = self.cache.get(user);
                if !self.cache.complete(ticket, None) || self.current != Some(user) {
                    return;
                }
                let status = match previous {
                    // Keep the last answer the backend gave for this account.
                    Some(previous) => BlockStatus {
                        user_id: Some(user),
                        is_blocked: previous.value,
                        loading: false,
                        checked_at: Some(previous.checked_at),
                        last_error: Some(e.to_string()),
                    },
                    None => BlockStatus {
                        user_id: Some(user),
                        is_blocked: self.fail_policy == BlockFailPolicy::Closed,
                        loading: false,
                        checked_at: None,
                        last_error: Some(e.to_string()),
                    },
                };
                self.publish(status);
            }
        }
    }

    fn publish(&self, status: BlockStatus) {
        self.status_tx.send_if_modified(|current| {
            if *current == status {
                return false;
            }
            *current = status;
            true
        });
    }
}
