use thiserror::Error;

/// Top-level error taxonomy for operations that cross subsystem boundaries.
///
/// Individual crates define their own narrow error enums; this is the shape
/// the `AgentService` facade and future transport adapters see.
#[derive(Debug, Error)]
pub enum ConfabError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Not authenticated: {0}")]
    NotAuthenticated(String),

    #[error("User not found: {id}")]
    UserNotFound { id: i64 },

    #[error("Repository error: {0}")]
    Repository(String),

    #[error("Encryption error: {0}")]
    Crypto(String),

    #[error("All LLM providers exhausted: {last_error}")]
    AllProvidersExhausted { last_error: String },

    #[error("LLM provider error: {0}")]
    Provider(String),

    #[error("Tool error ({tool}): {reason}")]
    Tool { tool: String, reason: String },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("operation cancelled")]
    Cancelled,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ConfabError {
    /// Short stable code string for structured logging and transport frames.
    pub fn code(&self) -> &'static str {
        match self {
            ConfabError::Config(_) => "CONFIG_ERROR",
            ConfabError::NotAuthenticated(_) => "NOT_AUTHENTICATED",
            ConfabError::UserNotFound { .. } => "USER_NOT_FOUND",
            ConfabError::Repository(_) => "REPOSITORY_ERROR",
            ConfabError::Crypto(_) => "CRYPTO_ERROR",
            ConfabError::AllProvidersExhausted { .. } => "ALL_PROVIDERS_EXHAUSTED",
            ConfabError::Provider(_) => "PROVIDER_ERROR",
            ConfabError::Tool { .. } => "TOOL_ERROR",
            ConfabError::Validation(_) => "VALIDATION_ERROR",
            ConfabError::Serialization(_) => "SERIALIZATION_ERROR",
            ConfabError::Cancelled => "CANCELLED",
            ConfabError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, ConfabError>;
