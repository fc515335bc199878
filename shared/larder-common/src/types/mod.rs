//! Shared Types

mod access;
mod user;

pub use access::{Capability, Confinement, ADMIN_ROLE};
pub use user::{Identity, UserId};
