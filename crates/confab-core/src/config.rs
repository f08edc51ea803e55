use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{ConfabError, Result};

/// Hard cap on the tool loop regardless of configuration.
pub const TOOL_LOOP_HARD_CAP: u32 = 50;
/// Minimum outer timeout for a single LLM call, seconds.
pub const MIN_LLM_TIMEOUT_SECS: u64 = 30;

/// Top-level config (confab.toml + CONFAB_* env overrides).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfabConfig {
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    /// LLM providers in declaration order; priority decides selection order.
    #[serde(default)]
    pub providers: Vec<ProviderSettings>,
    #[serde(default)]
    pub search: SearchConfig,
}

impl Default for ConfabConfig {
    fn default() -> Self {
        Self {
            agent: AgentConfig::default(),
            memory: MemoryConfig::default(),
            database: DatabaseConfig::default(),
            providers: Vec::new(),
            search: SearchConfig::default(),
        }
    }
}

impl ConfabConfig {
    /// Load from `confab.toml` in the working directory, then apply
    /// `CONFAB_*` environment overrides (nested keys split on `__`).
    pub fn load() -> Result<Self> {
        Self::load_from("confab.toml")
    }

    pub fn load_from(path: &str) -> Result<Self> {
        Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("CONFAB_").split("__"))
            .extract()
            .map_err(|e| ConfabError::Config(e.to_string()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Maximum tool-loop iterations per turn. Clamped to [1, 50].
    #[serde(default = "default_tool_loop_cap")]
    pub tool_loop_cap: u32,
    /// How many recalled messages feed the system prompt.
    #[serde(default = "default_recall_window")]
    pub recall_window: usize,
    /// Outer timeout for one LLM call, seconds (floor 30).
    #[serde(default = "default_llm_timeout")]
    pub llm_timeout_secs: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            tool_loop_cap: default_tool_loop_cap(),
            recall_window: default_recall_window(),
            llm_timeout_secs: default_llm_timeout(),
        }
    }
}

impl AgentConfig {
    /// The effective loop cap after clamping against the hard limit.
    pub fn effective_tool_loop_cap(&self) -> u32 {
        self.tool_loop_cap.clamp(1, TOOL_LOOP_HARD_CAP)
    }

    pub fn effective_llm_timeout_secs(&self) -> u64 {
        self.llm_timeout_secs.max(MIN_LLM_TIMEOUT_SECS)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Retained general-chat messages per user.
    #[serde(default = "default_max_general")]
    pub max_general: usize,
    /// Retained AI-conversation messages per user.
    #[serde(default = "default_max_ai")]
    pub max_ai: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            max_general: default_max_general(),
            max_ai: default_max_ai(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// One LLM provider entry. Validation happens when the multiplexer
/// registers the provider, not at deserialization time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderSettings {
    /// Provider name: openai, claude, gemini, lm_studio, ollama.
    pub name: String,
    pub model: String,
    #[serde(default)]
    pub api_key: Option<String>,
    /// Custom endpoint; required for local providers on non-default ports.
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default = "default_rpm")]
    pub max_requests_per_minute: u32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    /// Lower value = tried earlier.
    #[serde(default)]
    pub priority: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Web search API endpoint; empty disables live search.
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_search_timeout")]
    pub timeout_secs: u64,
}

fn default_tool_loop_cap() -> u32 {
    8
}

fn default_recall_window() -> usize {
    10
}

fn default_llm_timeout() -> u64 {
    60
}

fn default_max_general() -> usize {
    10
}

fn default_max_ai() -> usize {
    20
}

fn default_db_path() -> String {
    "confab.db".to_string()
}

fn default_rpm() -> u32 {
    60
}

fn default_max_tokens() -> u32 {
    4096
}

fn default_temperature() -> f64 {
    0.7
}

fn default_search_timeout() -> u64 {
    15
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_sane() {
        let cfg = ConfabConfig::default();
        assert_eq!(cfg.agent.effective_tool_loop_cap(), 8);
        assert_eq!(cfg.memory.max_general, 10);
        assert_eq!(cfg.memory.max_ai, 20);
        assert!(cfg.providers.is_empty());
    }

    #[test]
    fn loop_cap_clamps_to_hard_limit() {
        let agent = AgentConfig {
            tool_loop_cap: 500,
            ..AgentConfig::default()
        };
        assert_eq!(agent.effective_tool_loop_cap(), TOOL_LOOP_HARD_CAP);

        let agent = AgentConfig {
            tool_loop_cap: 0,
            ..AgentConfig::default()
        };
        assert_eq!(agent.effective_tool_loop_cap(), 1);
    }

    #[test]
    fn llm_timeout_has_a_floor() {
        let agent = AgentConfig {
            llm_timeout_secs: 5,
            ..AgentConfig::default()
        };
        assert_eq!(agent.effective_llm_timeout_secs(), MIN_LLM_TIMEOUT_SECS);
    }

    #[test]
    fn loads_toml_with_providers() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
[agent]
tool_loop_cap = 4

[[providers]]
name = "openai"
model = "gpt-4o-mini"
api_key = "sk-test"
priority = 1

[[providers]]
name = "lm_studio"
model = "local-model"
endpoint = "http://localhost:1234/v1"
priority = 9
"#
        )
        .unwrap();

        let cfg = ConfabConfig::load_from(file.path().to_str().unwrap()).unwrap();
        assert_eq!(cfg.agent.tool_loop_cap, 4);
        assert_eq!(cfg.providers.len(), 2);
        assert_eq!(cfg.providers[0].name, "openai");
        assert_eq!(cfg.providers[1].max_requests_per_minute, 60);
    }
}
