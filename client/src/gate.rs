//! Access Gate
//!
//! Decides whether a guarded route may render for the current session.
//!
//! Resolution order:
//! 1. Anything still loading: pending, no redirect
//! 2. No identity: redirect to the entry route
//! 3. Blocked account: redirect to the dashboard, except that a confinement
//!    guard lets the dashboard route itself through
//! 4. Admin capability required but not held: redirect to the dashboard
//! 5. Otherwise: grant
//!
//! The decision is a pure function of the current snapshots and is
//! re-evaluated on every check.

use larder_common::{Capability, Confinement};

use crate::resolvers::{BlockStatusHandle, RoleHandle};
use crate::session::SessionHandle;

/// Outcome of evaluating a guard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessState {
    Pending,
    DeniedBlocked,
    DeniedUnauthorized,
    DeniedUnauthenticated,
    Granted,
}

/// What the routing layer should do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Show a neutral placeholder and check again later.
    Pending,
    /// Render the route.
    Grant,
    /// Navigate to another route instead.
    RedirectTo(String),
}

impl Decision {
    pub const fn is_pending(&self) -> bool {
        matches!(self, Self::Pending)
    }
}

/// A guard evaluation together with the action it maps to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessDecision {
    pub state: AccessState,
    pub decision: Decision,
}

/// Where each kind of denial sends the visitor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DenialRedirects {
    /// Target for visitors without a session.
    pub unauthenticated: String,
    /// Target for blocked accounts. Also the one route a confinement guard
    /// lets blocked accounts see.
    pub blocked: String,
    /// Target for accounts lacking the required capability.
    pub unauthorized: String,
}

impl DenialRedirects {
    /// Unauthenticated visitors go to `entry`; every other denial goes to `dashboard`.
    pub fn new(entry: &str, dashboard: &str) -> Self {
        Self {
            unauthenticated: entry.to_string(),
            blocked: dashboard.to_string(),
            unauthorized: dashboard.to_string(),
        }
    }
}

/// Guard configuration for a route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteGuard {
    pub capability: Capability,
    pub confinement: Confinement,
    pub redirects: DenialRedirects,
}

impl RouteGuard {
    /// Any signed-in, unblocked account.
    pub const fn protected(redirects: DenialRedirects) -> Self {
        Self {
            capability: Capability::None,
            confinement: Confinement::None,
            redirects,
        }
    }

    /// App-shell guard: blocked accounts are held on the dashboard route.
    pub const fn confined(redirects: DenialRedirects) -> Self {
        Self {
            capability: Capability::None,
            confinement: Confinement::DashboardOnly,
            redirects,
        }
    }

    /// Admin area: requires the admin capability, never admits blocked accounts.
    pub const fn admin_only(redirects: DenialRedirects) -> Self {
        Self {
            capability: Capability::Admin,
            confinement: Confinement::None,
            redirects,
        }
    }

    /// Run the resolution ladder.
    pub fn evaluate(&self, inputs: &GateInputs<'_>) -> AccessState {
        if inputs.session_loading || inputs.role_loading || inputs.block_loading {
            return AccessState::Pending;
        }
        if !inputs.authenticated {
            return AccessState::DeniedUnauthenticated;
        }
        if inputs.is_blocked {
            let on_dashboard =
                normalize_path(inputs.current_path) == normalize_path(&self.redirects.blocked);
            let admitted = self.capability == Capability::None
                && self.confinement == Confinement::DashboardOnly
                && on_dashboard;
            if !admitted {
                return AccessState::DeniedBlocked;
            }
        }
        if self.capability == Capability::Admin && !inputs.is_admin {
            return AccessState::DeniedUnauthorized;
        }
        AccessState::Granted
    }

    /// Map an evaluation to the routing action.
    pub fn action(&self, state: AccessState) -> Decision {
        match state {
            AccessState::Pending => Decision::Pending,
            AccessState::Granted => Decision::Grant,
            AccessState::DeniedUnauthenticated => {
                Decision::RedirectTo(self.redirects.unauthenticated.clone())
            }
            AccessState::DeniedBlocked => Decision::RedirectTo(self.redirects.blocked.clone()),
            AccessState::DeniedUnauthorized => {
                Decision::RedirectTo(self.redirects.unauthorized.clone())
            }
        }
    }

    /// Evaluate and map in one step.
    pub fn decide(&self, inputs: &GateInputs<'_>) -> AccessDecision {
        let state = self.evaluate(inputs);
        AccessDecision {
            state,
            decision: self.action(state),
        }
    }
}

/// Everything the ladder looks at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GateInputs<'a> {
    pub session_loading: bool,
    pub role_loading: bool,
    pub block_loading: bool,
    pub authenticated: bool,
    pub is_admin: bool,
    pub is_blocked: bool,
    pub current_path: &'a str,
}

/// Strip query, fragment and trailing slash so `/dashboard/?tab=1` matches `/dashboard`.
pub(crate) fn normalize_path(path: &str) -> &str {
    let end = path.find(['?', '#']).unwrap_or(path.len());
    let path = &path[..end];
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        "/"
    } else {
        trimmed
    }
}

/// Reads the session and resolver snapshots and applies route guards.
#[derive(Debug, Clone)]
pub struct AccessGate {
    session: SessionHandle,
    role: RoleHandle,
    block: BlockStatusHandle,
}

impl AccessGate {
    pub const fn new(session: SessionHandle, role: RoleHandle, block: BlockStatusHandle) -> Self {
        Self {
            session,
            role,
            block,
        }
    }

    /// Snapshot the current inputs for `path`. No I/O.
    ///
    /// A resolver answer about a different account than the session's
    /// counts as loading: the resolver has not caught up yet.
    pub fn inputs<'a>(&self, path: &'a str) -> GateInputs<'a> {
        let session = self.session.current();
        let role = self.role.current();
        let block = self.block.current();
        let user = session.user_id();
        GateInputs {
            session_loading: session.loading,
            role_loading: role.loading || role.user_id != user,
            block_loading: block.loading || block.user_id != user,
            authenticated: session.identity.is_some(),
            is_admin: role.is_admin,
            is_blocked: block.is_blocked,
            current_path: path,
        }
    }

    /// Decide now from current snapshots.
    pub fn check(&self, guard: &RouteGuard, path: &str) -> AccessDecision {
        guard.decide(&self.inputs(path))
    }

    /// Wait until the decision for `path` is no longer pending.
    ///
    /// Returns the pending decision if a resolver stops before settling.
    pub async fn settle(&self, guard: &RouteGuard, path: &str) -> AccessDecision {
        let mut session = self.session.subscribe();
        let mut role = self.role.subscribe();
        let mut block = self.block.subscribe();

        loop {
            let decision = self.check(guard, path);
            if !decision.decision.is_pending() {
                return decision;
            }
            let alive = tokio::select! {
                r = session.changed() => r.is_ok(),
                r = role.changed() => r.is_ok(),
                r = block.changed() => r.is_ok(),
            };
            if !alive {
                return self.check(guard, path);
            }
        }
    }
}
