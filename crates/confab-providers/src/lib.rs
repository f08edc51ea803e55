//! LLM provider multiplexing: rate limiting, usage accounting, per-family
//! HTTP clients, and priority-ordered failover.

pub mod anthropic;
pub mod client;
pub mod config;
pub mod limiter;
pub mod mux;
pub mod ollama;
pub mod openai;
pub mod stats;

pub use client::{
    ChatMessage, ChatPrompt, ChatRequest, ChatResponse, LlmProvider, ProviderError, ToolCall,
    ToolDefinition,
};
pub use config::{ProviderConfig, ProviderFamily};
pub use limiter::RateLimiter;
pub use mux::{MuxResponse, ProviderMux};
pub use stats::UsageStats;
