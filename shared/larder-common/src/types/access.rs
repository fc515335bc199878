//! Access Types
//!
//! Capabilities a route may require and the confinement applied to
//! suspended accounts.

use serde::{Deserialize, Serialize};

/// Role name that grants [`Capability::Admin`].
pub const ADMIN_ROLE: &str = "admin";

/// Capability a route requires beyond being signed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// Any authenticated account.
    #[default]
    None,
    /// Accounts holding the `admin` role assignment.
    Admin,
}

/// How a guard treats a suspended (blocked) account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confinement {
    /// Blocked accounts are turned away from the route.
    #[default]
    None,
    /// Blocked accounts are confined to the dashboard route; every other path
    /// under the guard redirects there.
    DashboardOnly,
}
