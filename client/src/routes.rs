//! Route Table
//!
//! Maps dashboard paths to the guard that protects them.

use tracing::debug;

use crate::config::Config;
use crate::gate::{normalize_path, AccessGate, Decision, DenialRedirects, RouteGuard};

/// How a path is matched.
#[derive(Debug, Clone, PartialEq, Eq)]
enum RoutePattern {
    /// `/auth`
    Exact(String),
    /// `/admin/*` matches `/admin` and everything below it.
    Prefix(String),
}

impl RoutePattern {
    fn parse(pattern: &str) -> Self {
        match pattern.strip_suffix("/*") {
            Some(base) => Self::Prefix(normalize_path(base).to_string()),
            None => Self::Exact(normalize_path(pattern).to_string()),
        }
    }

    fn matches(&self, path: &str) -> bool {
        match self {
            Self::Exact(p) => p == path,
            Self::Prefix(base) if base == "/" => true,
            Self::Prefix(base) => {
                path == base
                    || path
                        .strip_prefix(base.as_str())
                        .is_some_and(|rest| rest.starts_with('/'))
            }
        }
    }

    fn specificity(&self) -> usize {
        match self {
            // Exact routes win over any prefix.
            Self::Exact(_) => usize::MAX,
            Self::Prefix(base) => base.len(),
        }
    }
}

/// Access requirement attached to a route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteAccess {
    /// Rendered for everyone, no gate.
    Public,
    /// Rendered only when the guard grants.
    Guarded(RouteGuard),
}

/// Ordered set of routes plus the guard for paths nobody registered.
#[derive(Debug, Clone)]
pub struct RouteTable {
    routes: Vec<(RoutePattern, RouteAccess)>,
    fallback: RouteGuard,
}

impl RouteTable {
    /// An empty table that guards every path with `fallback`.
    pub const fn new(fallback: RouteGuard) -> Self {
        Self {
            routes: Vec::new(),
            fallback,
        }
    }

    /// Register a route. `pattern` is either an exact path or `base/*`.
    #[must_use]
    pub fn route(mut self, pattern: &str, access: RouteAccess) -> Self {
        self.routes.push((RoutePattern::parse(pattern), access));
        self
    }

    /// The dashboard's routes.
    ///
    /// Storefront and sign-in pages are public, the admin area needs the
    /// admin role, everything else sits behind the confining app-shell guard.
    pub fn dashboard(entry_route: &str, dashboard_route: &str) -> Self {
        let redirects = DenialRedirects::new(entry_route, dashboard_route);
        let shell = RouteGuard::confined(redirects.clone());
        let admin = RouteGuard::admin_only(redirects);

        let mut table = Self::new(shell.clone())
            .route(entry_route, RouteAccess::Public)
            .route("/auth", RouteAccess::Public)
            .route("/store/*", RouteAccess::Public)
            .route(dashboard_route, RouteAccess::Guarded(shell.clone()));
        for section in ["/orders/*", "/recipes/*", "/payables/*", "/resale/*", "/settings/*"] {
            table = table.route(section, RouteAccess::Guarded(shell.clone()));
        }
        table.route("/admin/*", RouteAccess::Guarded(admin))
    }

    /// [`Self::dashboard`] with routes taken from configuration.
    pub fn from_config(config: &Config) -> Self {
        Self::dashboard(&config.entry_route, &config.dashboard_route)
    }

    /// Access requirement for `path`: exact match first, then the longest
    /// matching prefix, then the fallback guard.
    pub fn lookup(&self, path: &str) -> RouteAccess {
        let path = normalize_path(path);
        self.routes
            .iter()
            .filter(|(pattern, _)| pattern.matches(path))
            .max_by_key(|(pattern, _)| pattern.specificity())
            .map_or_else(
                || RouteAccess::Guarded(self.fallback.clone()),
                |(_, access)| access.clone(),
            )
    }

    /// Decide what to do when navigating to `path`.
    pub fn navigate(&self, path: &str, gate: &AccessGate) -> Decision {
        match self.lookup(path) {
            RouteAccess::Public => Decision::Grant,
            RouteAccess::Guarded(guard) => {
                let decision = gate.check(&guard, path);
                debug!(path, state = ?decision.state, "Route checked");
                decision.decision
            }
        }
    }

    /// Like [`Self::navigate`], but waits out the pending state.
    pub async fn navigate_settled(&self, path: &str, gate: &AccessGate) -> Decision {
        match self.lookup(path) {
            RouteAccess::Public => Decision::Grant,
            RouteAccess::Guarded(guard) => {
                let decision = gate.settle(&guard, path).await;
                debug!(path, state = ?decision.state, "Route settled");
                decision.decision
            }
        }
    }
}
