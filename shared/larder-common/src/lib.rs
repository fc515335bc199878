//! `Larder` Common Library
//!
//! Identity and access types shared by the dashboard client and its tooling.

pub mod types;

pub use types::*;
