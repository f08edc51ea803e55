//! Shared types, error taxonomy, configuration, and observability hooks.
//!
//! Everything here is consumed by at least two other crates in the
//! workspace. Subsystem-specific types live with their subsystem.

pub mod config;
pub mod error;
pub mod observe;
pub mod types;

pub use error::{ConfabError, Result};
pub use types::Principal;
