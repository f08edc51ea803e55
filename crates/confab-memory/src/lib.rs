//! Per-user encrypted conversational memory.
//!
//! The decrypted in-memory shape is [`MemoryView`]; on disk it is one
//! opaque ciphertext string per user. The [`MemoryManager`] owns the view
//! for the duration of a turn and re-encrypts on flush.

pub mod error;
pub mod filter;
pub mod manager;
pub mod types;

pub use error::MemoryError;
pub use filter::is_internal_prompt;
pub use manager::{MemoryManager, MemoryStats};
pub use types::*;
