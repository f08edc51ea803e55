//! Persistence layer — the only storage contract the core depends on.
//!
//! The [`Repository`] trait is what every other crate programs against;
//! [`SqliteRepository`] is the shipped implementation. Read misses are
//! `Ok(None)`/empty, never errors.

pub mod db;
pub mod error;
pub mod repo;
pub mod types;

pub use error::StoreError;
pub use repo::{Repository, SqliteRepository};
pub use types::*;
