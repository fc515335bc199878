//! Hosted Backend Collaborators
//!
//! The dashboard owns no server. Identity comes from the hosted auth service
//! and role/profile rows from its relational query service; both are reached
//! through the traits below so resolvers can run against any implementation.

mod error;
pub mod rest;

use async_trait::async_trait;
use larder_common::{Identity, UserId};

pub use error::BackendError;
pub use rest::RestBackend;

/// Hosted authentication service.
#[async_trait]
pub trait AuthService: Send + Sync {
    /// Identity for the currently stored session, or `None` when signed out
    /// or the stored session is no longer accepted.
    async fn current_identity(&self) -> Result<Option<Identity>, BackendError>;

    /// Exchange credentials for a session.
    async fn sign_in(&self, email: &str, password: &str) -> Result<Identity, BackendError>;

    /// End the stored session.
    async fn sign_out(&self) -> Result<(), BackendError>;
}

/// Point queries against the relational tables.
#[async_trait]
pub trait QueryService: Send + Sync {
    /// Whether a role-assignment row exists for `(user, role)`.
    async fn has_role(&self, user: UserId, role: &str) -> Result<bool, BackendError>;

    /// The profile's block flag, or `None` when the profile row does not exist.
    async fn is_blocked(&self, user: UserId) -> Result<Option<bool>, BackendError>;
}
