//! Larder Dashboard Access Layer
//!
//! Session tracking, role and block-status resolution, and the route gate
//! for the Larder admin dashboard.

pub mod backend;
pub mod config;
pub mod context;
pub mod gate;
pub mod lifecycle;
pub mod query_cache;
pub mod resolvers;
pub mod routes;
pub mod session;

pub use context::AccessContext;
pub use gate::{AccessDecision, AccessGate, AccessState, Decision, DenialRedirects, RouteGuard};
pub use routes::{RouteAccess, RouteTable};
pub use session::{SessionHandle, SessionSource, SessionState};
