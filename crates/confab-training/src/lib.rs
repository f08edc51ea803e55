//! Training progress tracking: default skill trainings, milestone ladders,
//! and the login/message/progress/logout hooks the agent graph calls.
//! All per-user training state lives inside the encrypted memory blob;
//! the relational rows exist for querying and reporting.

pub mod catalog;
pub mod tracker;

pub use catalog::{default_trainings, next_milestone, TrainingSpec};
pub use tracker::{login_reminder, prompt_context, TrainingError, TrainingTracker};
