use serde::{Deserialize, Serialize};

use confab_core::config::ProviderSettings;

use crate::client::ProviderError;

/// Ports local inference servers conventionally listen on
/// (LM Studio, Ollama).
const LOCAL_PORTS: &[&str] = &[":1234", ":11434"];
/// Host prefixes treated as local/private endpoints.
const LOCAL_HOSTS: &[&str] = &[
    "localhost",
    "127.0.0.1",
    "192.168.",
    "10.",
    "172.16.",
    "172.17.",
    "172.18.",
    "172.19.",
    "172.20.",
    "172.21.",
    "172.22.",
    "172.23.",
    "172.24.",
    "172.25.",
    "172.26.",
    "172.27.",
    "172.28.",
    "172.29.",
    "172.30.",
    "172.31.",
];
/// Model-name markers for locally hosted models.
const LOCAL_MODEL_MARKERS: &[&str] = &["local", "lm-studio", "lmstudio", "ollama", "gguf", "ggml"];

/// Which tool-calling contract and cleanup path a provider uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderFamily {
    OpenAi,
    Claude,
    Gemini,
    /// Locally hosted model — triggers the response normalizer and the
    /// MCP-style prompt block.
    Local,
}

impl ProviderFamily {
    /// Classify a provider from its name, model, and endpoint.
    /// Name wins; endpoint/model heuristics catch self-hosted setups
    /// registered under other names.
    pub fn detect(name: &str, model: &str, endpoint: Option<&str>) -> Self {
        match name {
            "openai" => return ProviderFamily::OpenAi,
            "claude" | "anthropic" => return ProviderFamily::Claude,
            "gemini" => return ProviderFamily::Gemini,
            "lm_studio" | "lmstudio" | "ollama" => return ProviderFamily::Local,
            _ => {}
        }
        if endpoint.map(is_local_endpoint).unwrap_or(false) || is_local_model_name(model) {
            ProviderFamily::Local
        } else {
            ProviderFamily::OpenAi
        }
    }

    pub fn is_local(&self) -> bool {
        matches!(self, ProviderFamily::Local)
    }
}

/// Endpoint pattern check: local ports or private-range hosts.
pub fn is_local_endpoint(endpoint: &str) -> bool {
    let lower = endpoint.to_lowercase();
    LOCAL_PORTS.iter().any(|p| lower.contains(p))
        || LOCAL_HOSTS.iter().any(|h| lower.contains(h))
}

/// Model-name marker check.
pub fn is_local_model_name(model: &str) -> bool {
    let lower = model.to_lowercase();
    LOCAL_MODEL_MARKERS.iter().any(|m| lower.contains(m))
}

/// Validated configuration for one registered provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub name: String,
    pub model: String,
    pub api_key: Option<String>,
    pub endpoint: Option<String>,
    pub max_requests_per_minute: u32,
    pub max_tokens: u32,
    pub temperature: f64,
    /// Lower value = tried earlier.
    pub priority: u32,
    pub is_available: bool,
    pub family: ProviderFamily,
}

impl ProviderConfig {
    /// Validate raw settings into a usable config.
    pub fn from_settings(settings: &ProviderSettings) -> Result<Self, ProviderError> {
        if settings.name.trim().is_empty() {
            return Err(ProviderError::InvalidConfig("provider name is empty".into()));
        }
        if settings.model.trim().is_empty() {
            return Err(ProviderError::InvalidConfig(format!(
                "provider '{}' has no model",
                settings.name
            )));
        }
        if settings.max_requests_per_minute == 0 {
            return Err(ProviderError::InvalidConfig(format!(
                "provider '{}': max_requests_per_minute must be positive",
                settings.name
            )));
        }
        if settings.max_tokens == 0 {
            return Err(ProviderError::InvalidConfig(format!(
                "provider '{}': max_tokens must be positive",
                settings.name
            )));
        }
        if !(0.0..=1.0).contains(&settings.temperature) {
            return Err(ProviderError::InvalidConfig(format!(
                "provider '{}': temperature {} outside [0,1]",
                settings.name, settings.temperature
            )));
        }

        let family = ProviderFamily::detect(
            &settings.name,
            &settings.model,
            settings.endpoint.as_deref(),
        );

        // Remote families need credentials; local ones don't.
        let is_available = family.is_local()
            || settings
                .api_key
                .as_deref()
                .map(|k| !k.trim().is_empty())
                .unwrap_or(false);

        Ok(Self {
            name: settings.name.clone(),
            model: settings.model.clone(),
            api_key: settings.api_key.clone(),
            endpoint: settings.endpoint.clone(),
            max_requests_per_minute: settings.max_requests_per_minute,
            max_tokens: settings.max_tokens,
            temperature: settings.temperature,
            priority: settings.priority,
            is_available,
            family,
        })
    }
}
