use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use confab_core::config::ProviderSettings;

use crate::anthropic::AnthropicClient;
use crate::client::{
    ChatPrompt, ChatRequest, ChatResponse, LlmProvider, ProviderError,
};
use crate::config::{ProviderConfig, ProviderFamily};
use crate::limiter::RateLimiter;
use crate::ollama::OllamaClient;
use crate::openai::OpenAiClient;
use crate::stats::{estimate_cost, UsageStats};

/// Attempts per provider before moving down the priority list.
const ATTEMPTS_PER_PROVIDER: u32 = 2;
/// Consecutive failures that mark a provider unavailable (process-local).
const ERROR_CUTOFF: u32 = 3;

struct ProviderEntry {
    config: Mutex<ProviderConfig>,
    limiter: RateLimiter,
    stats: Mutex<UsageStats>,
    client: Box<dyn LlmProvider>,
}

/// Result of a successful multiplexed chat call.
#[derive(Debug)]
pub struct MuxResponse {
    pub response: ChatResponse,
    /// Name of the provider that actually answered.
    pub provider: String,
    pub family: ProviderFamily,
    /// Rate-limiter wait incurred before the call.
    pub waited: Duration,
}

/// Priority-ordered LLM provider pool with rate limiting, usage accounting,
/// and automatic failover. Safe for concurrent use; all interior state is
/// behind fine-grained locks.
pub struct ProviderMux {
    entries: Mutex<HashMap<String, Arc<ProviderEntry>>>,
}

impl Default for ProviderMux {
    fn default() -> Self {
        Self::new()
    }
}

impl ProviderMux {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Register a provider, constructing the family-appropriate client.
    /// Rejects duplicates and invalid configs.
    pub fn add_provider(&self, settings: &ProviderSettings) -> Result<(), ProviderError> {
        let config = ProviderConfig::from_settings(settings)?;
        let client = build_client(&config)?;
        self.insert(config, client)
    }

    /// Register a provider with a caller-supplied client. Used by tests and
    /// by deployments with bespoke backends.
    pub fn add_provider_with_client(
        &self,
        settings: &ProviderSettings,
        client: Box<dyn LlmProvider>,
    ) -> Result<(), ProviderError> {
        let config = ProviderConfig::from_settings(settings)?;
        self.insert(config, client)
    }

    fn insert(
        &self,
        config: ProviderConfig,
        client: Box<dyn LlmProvider>,
    ) -> Result<(), ProviderError> {
        let mut entries = self.entries.lock().unwrap();
        if entries.contains_key(&config.name) {
            return Err(ProviderError::InvalidConfig(format!(
                "duplicate provider: {}",
                config.name
            )));
        }
        info!(
            provider = %config.name,
            model = %config.model,
            priority = config.priority,
            "provider registered"
        );
        let limiter = RateLimiter::per_minute(config.max_requests_per_minute as usize);
        entries.insert(
            config.name.clone(),
            Arc::new(ProviderEntry {
                config: Mutex::new(config),
                limiter,
                stats: Mutex::new(UsageStats::default()),
                client,
            }),
        );
        Ok(())
    }

    /// Available providers sorted by ascending priority, with `preferred`
    /// (when present and available) moved to the front.
    fn candidates(&self, preferred: Option<&str>) -> Vec<(String, Arc<ProviderEntry>)> {
        let entries = self.entries.lock().unwrap();
        let mut list: Vec<(String, u32, Arc<ProviderEntry>)> = entries
            .iter()
            .filter(|(_, e)| e.config.lock().unwrap().is_available)
            .map(|(name, e)| (name.clone(), e.config.lock().unwrap().priority, Arc::clone(e)))
            .collect();
        list.sort_by_key(|(_, priority, _)| *priority);

        if let Some(pref) = preferred {
            if let Some(pos) = list.iter().position(|(name, _, _)| name == pref) {
                let entry = list.remove(pos);
                list.insert(0, entry);
            }
        }

        list.into_iter().map(|(name, _, e)| (name, e)).collect()
    }

    /// Run one chat call with rate limiting and failover.
    ///
    /// Each candidate gets two attempts; quota errors skip straight to the
    /// next provider and mark the current one unavailable. Cancellation
    /// aborts immediately, recording the in-flight attempt as a failure.
    pub async fn chat(
        &self,
        prompt: &ChatPrompt,
        preferred: Option<&str>,
        temperature_override: Option<f64>,
        cancel: Option<&CancellationToken>,
    ) -> Result<MuxResponse, ProviderError> {
        let candidates = self.candidates(preferred);
        if candidates.is_empty() {
            return Err(ProviderError::Exhausted {
                last: "no providers available".to_string(),
            });
        }

        let mut last_err: Option<ProviderError> = None;

        for (name, entry) in candidates {
            let waited = entry.limiter.wait_if_needed().await;

            let req = {
                let config = entry.config.lock().unwrap();
                ChatRequest {
                    model: config.model.clone(),
                    system: prompt.system.clone(),
                    messages: prompt.messages.clone(),
                    max_tokens: config.max_tokens,
                    temperature: temperature_override.unwrap_or(config.temperature),
                    tools: prompt.tools.clone(),
                }
            };

            for attempt in 0..ATTEMPTS_PER_PROVIDER {
                let result = match cancel {
                    Some(token) => {
                        tokio::select! {
                            r = entry.client.send(&req) => r,
                            _ = token.cancelled() => Err(ProviderError::Cancelled),
                        }
                    }
                    None => entry.client.send(&req).await,
                };

                match result {
                    Ok(response) => {
                        let tokens =
                            (response.tokens_in as u64) + (response.tokens_out as u64);
                        let cost = estimate_cost(
                            &req.model,
                            response.tokens_in as u64,
                            response.tokens_out as u64,
                        );
                        entry.stats.lock().unwrap().record_success(tokens, cost);
                        let family = entry.config.lock().unwrap().family;
                        if attempt > 0 {
                            info!(provider = %name, attempt, "request succeeded after retry");
                        }
                        return Ok(MuxResponse {
                            response,
                            provider: name,
                            family,
                            waited,
                        });
                    }
                    Err(ProviderError::Cancelled) => {
                        entry.stats.lock().unwrap().record_failure();
                        return Err(ProviderError::Cancelled);
                    }
                    Err(e) => {
                        warn!(provider = %name, attempt, err = %e, "provider call failed");
                        let consecutive = {
                            let mut stats = entry.stats.lock().unwrap();
                            stats.record_failure();
                            stats.consecutive_errors
                        };

                        if e.is_quota() {
                            entry.config.lock().unwrap().is_available = false;
                            warn!(provider = %name, "quota exceeded, marked unavailable");
                            last_err = Some(e);
                            break;
                        }

                        if consecutive >= ERROR_CUTOFF {
                            entry.config.lock().unwrap().is_available = false;
                            warn!(
                                provider = %name,
                                consecutive,
                                "marked unavailable after repeated errors"
                            );
                            last_err = Some(e);
                            break;
                        }

                        last_err = Some(e);
                    }
                }
            }

            info!(provider = %name, "provider exhausted, trying next");
        }

        Err(ProviderError::Exhausted {
            last: last_err
                .map(|e| e.to_string())
                .unwrap_or_else(|| "all providers failed".to_string()),
        })
    }

    pub fn record_success(&self, name: &str, tokens: u64, cost: f64) {
        if let Some(entry) = self.entry(name) {
            entry.stats.lock().unwrap().record_success(tokens, cost);
        }
    }

    pub fn record_failure(&self, name: &str) {
        if let Some(entry) = self.entry(name) {
            let consecutive = {
                let mut stats = entry.stats.lock().unwrap();
                stats.record_failure();
                stats.consecutive_errors
            };
            if consecutive >= ERROR_CUTOFF {
                entry.config.lock().unwrap().is_available = false;
            }
        }
    }

    /// Restore availability, zero the error streak, clear rate history.
    pub fn reset_provider(&self, name: &str) {
        if let Some(entry) = self.entry(name) {
            entry.config.lock().unwrap().is_available = true;
            entry.stats.lock().unwrap().consecutive_errors = 0;
            entry.limiter.reset();
            info!(provider = %name, "provider reset");
        }
    }

    pub fn disable_provider(&self, name: &str) {
        if let Some(entry) = self.entry(name) {
            entry.config.lock().unwrap().is_available = false;
        }
    }

    pub fn enable_provider(&self, name: &str) {
        if let Some(entry) = self.entry(name) {
            entry.config.lock().unwrap().is_available = true;
            entry.stats.lock().unwrap().consecutive_errors = 0;
        }
    }

    pub fn stats(&self, name: &str) -> Option<UsageStats> {
        self.entry(name).map(|e| e.stats.lock().unwrap().clone())
    }

    pub fn family_of(&self, name: &str) -> Option<ProviderFamily> {
        self.entry(name).map(|e| e.config.lock().unwrap().family)
    }

    pub fn is_available(&self, name: &str) -> bool {
        self.entry(name)
            .map(|e| e.config.lock().unwrap().is_available)
            .unwrap_or(false)
    }

    /// Family of the provider most likely to serve the next call: the
    /// preferred one when available, else the best-priority candidate.
    /// ASSEMBLE uses this to pick the tool-schema dialect and decide on
    /// the local-model protocol block before the call is made.
    pub fn primary_family(&self, preferred: Option<&str>) -> Option<ProviderFamily> {
        self.candidates(preferred)
            .first()
            .map(|(_, e)| e.config.lock().unwrap().family)
    }

    /// True when at least one local-family provider is registered and
    /// available. ASSEMBLE uses this to decide on the MCP-style block.
    pub fn has_local_provider(&self) -> bool {
        let entries = self.entries.lock().unwrap();
        entries.values().any(|e| {
            let cfg = e.config.lock().unwrap();
            cfg.is_available && cfg.family.is_local()
        })
    }

    /// Human-readable usage summary across all providers.
    pub fn usage_report(&self) -> String {
        let entries = self.entries.lock().unwrap();
        let mut rows: Vec<(u32, String)> = Vec::with_capacity(entries.len());

        for entry in entries.values() {
            let config = entry.config.lock().unwrap();
            let stats = entry.stats.lock().unwrap();
            let marker = if config.is_available { "ok" } else { "down" };
            rows.push((
                config.priority,
                format!(
                    "[{marker}] {} ({}) requests={} ok={} failed={} rate={:.1}% tokens={} cost=${:.4}",
                    config.name,
                    config.model,
                    stats.total_requests,
                    stats.successful_requests,
                    stats.failed_requests,
                    stats.success_rate(),
                    stats.total_tokens,
                    stats.total_cost,
                ),
            ));
        }
        rows.sort_by_key(|(priority, _)| *priority);

        let mut out = String::from("LLM provider usage\n");
        for (_, row) in rows {
            out.push_str(&row);
            out.push('\n');
        }
        out
    }

    fn entry(&self, name: &str) -> Option<Arc<ProviderEntry>> {
        self.entries.lock().unwrap().get(name).cloned()
    }
}

fn build_client(config: &ProviderConfig) -> Result<Box<dyn LlmProvider>, ProviderError> {
    let key = config.api_key.clone().unwrap_or_default();
    let endpoint = config.endpoint.clone();
    // Outer request timeout scales with the response budget, floored at
    // 30s. It does not cover rate-limiter waits, which happen before the
    // request is built.
    let timeout = Duration::from_secs((config.max_tokens as u64 / 100).max(30));

    let client: Box<dyn LlmProvider> = match config.name.as_str() {
        "openai" => Box::new(OpenAiClient::new(key, endpoint).with_http_timeout(timeout)),
        "claude" | "anthropic" => {
            Box::new(AnthropicClient::new(key, endpoint).with_http_timeout(timeout))
        }
        "gemini" => Box::new(OpenAiClient::gemini(key, endpoint).with_http_timeout(timeout)),
        "lm_studio" | "lmstudio" => {
            Box::new(OpenAiClient::lm_studio(endpoint).with_http_timeout(timeout))
        }
        "ollama" => Box::new(OllamaClient::new(endpoint).with_http_timeout(timeout)),
        other => {
            // Unknown names with an endpoint are assumed OpenAI-compatible.
            if let Some(url) = endpoint {
                Box::new(
                    OpenAiClient::with_path(other, key, url, "/v1/chat/completions".to_string())
                        .with_http_timeout(timeout),
                )
            } else {
                return Err(ProviderError::UnknownProvider(other.to_string()));
            }
        }
    };
    Ok(client)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{ChatMessage, ChatResponse};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct AlwaysOk {
        name: &'static str,
    }

    #[async_trait]
    impl LlmProvider for AlwaysOk {
        fn name(&self) -> &str {
            self.name
        }
        async fn send(&self, req: &ChatRequest) -> Result<ChatResponse, ProviderError> {
            Ok(ChatResponse {
                content: format!("ok from {}", self.name),
                model: req.model.clone(),
                tokens_in: 10,
                tokens_out: 5,
                tool_calls: Vec::new(),
            })
        }
    }

    struct AlwaysFail;

    #[async_trait]
    impl LlmProvider for AlwaysFail {
        fn name(&self) -> &str {
            "always-fail"
        }
        async fn send(&self, _req: &ChatRequest) -> Result<ChatResponse, ProviderError> {
            Err(ProviderError::Unavailable("intentional failure".to_string()))
        }
    }

    struct QuotaFail;

    #[async_trait]
    impl LlmProvider for QuotaFail {
        fn name(&self) -> &str {
            "quota-fail"
        }
        async fn send(&self, _req: &ChatRequest) -> Result<ChatResponse, ProviderError> {
            Err(ProviderError::QuotaExceeded { retry_after_ms: 100 })
        }
    }

    struct CountingOk {
        calls: Arc<AtomicU32>,
    }

    #[async_trait]
    impl LlmProvider for CountingOk {
        fn name(&self) -> &str {
            "counting"
        }
        async fn send(&self, req: &ChatRequest) -> Result<ChatResponse, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(ChatResponse {
                content: "counted".to_string(),
                model: req.model.clone(),
                tokens_in: 1,
                tokens_out: 1,
                tool_calls: Vec::new(),
            })
        }
    }

    fn settings(name: &str, priority: u32) -> ProviderSettings {
        ProviderSettings {
            name: name.to_string(),
            model: "test-model".to_string(),
            api_key: Some("key".to_string()),
            endpoint: None,
            max_requests_per_minute: 60,
            max_tokens: 256,
            temperature: 0.7,
            priority,
        }
    }

    fn prompt() -> ChatPrompt {
        ChatPrompt {
            system: "You are a test.".to_string(),
            messages: vec![ChatMessage::user("hello")],
            tools: Vec::new(),
        }
    }

    #[tokio::test]
    async fn duplicate_provider_rejected() {
        let mux = ProviderMux::new();
        mux.add_provider_with_client(&settings("openai", 1), Box::new(AlwaysOk { name: "a" }))
            .unwrap();
        let err = mux
            .add_provider_with_client(&settings("openai", 2), Box::new(AlwaysOk { name: "b" }))
            .unwrap_err();
        assert!(matches!(err, ProviderError::InvalidConfig(_)));
    }

    #[tokio::test]
    async fn fails_over_to_lower_priority_provider() {
        let mux = ProviderMux::new();
        mux.add_provider_with_client(&settings("openai", 1), Box::new(AlwaysFail))
            .unwrap();
        mux.add_provider_with_client(&settings("gemini", 2), Box::new(AlwaysOk { name: "gemini" }))
            .unwrap();

        let out = mux.chat(&prompt(), None, None, None).await.unwrap();
        assert_eq!(out.provider, "gemini");
        assert_eq!(out.response.content, "ok from gemini");

        // openai burned both attempts: 2 consecutive errors, still available.
        let stats = mux.stats("openai").unwrap();
        assert_eq!(stats.consecutive_errors, 2);
        assert!(mux.is_available("openai"));
    }

    #[tokio::test]
    async fn three_consecutive_errors_mark_unavailable() {
        let mux = ProviderMux::new();
        mux.add_provider_with_client(&settings("openai", 1), Box::new(AlwaysFail))
            .unwrap();
        mux.add_provider_with_client(&settings("gemini", 2), Box::new(AlwaysOk { name: "g" }))
            .unwrap();

        // First turn leaves openai at 2 errors; second pushes past the cutoff.
        mux.chat(&prompt(), None, None, None).await.unwrap();
        mux.chat(&prompt(), None, None, None).await.unwrap();
        assert!(!mux.is_available("openai"));

        mux.reset_provider("openai");
        assert!(mux.is_available("openai"));
        assert_eq!(mux.stats("openai").unwrap().consecutive_errors, 0);
    }

    #[tokio::test]
    async fn quota_error_marks_unavailable_immediately() {
        let mux = ProviderMux::new();
        mux.add_provider_with_client(&settings("openai", 1), Box::new(QuotaFail))
            .unwrap();
        mux.add_provider_with_client(&settings("claude", 2), Box::new(AlwaysOk { name: "c" }))
            .unwrap();

        let out = mux.chat(&prompt(), None, None, None).await.unwrap();
        assert_eq!(out.provider, "claude");
        assert!(!mux.is_available("openai"));
        // Quota burns a single attempt, not two.
        assert_eq!(mux.stats("openai").unwrap().failed_requests, 1);
    }

    #[tokio::test]
    async fn preferred_provider_tried_first() {
        let mux = ProviderMux::new();
        mux.add_provider_with_client(&settings("openai", 1), Box::new(AlwaysOk { name: "o" }))
            .unwrap();
        mux.add_provider_with_client(&settings("claude", 2), Box::new(AlwaysOk { name: "c" }))
            .unwrap();

        let out = mux.chat(&prompt(), Some("claude"), None, None).await.unwrap();
        assert_eq!(out.provider, "claude");
    }

    #[tokio::test]
    async fn all_failed_yields_exhausted_with_last_error() {
        let mux = ProviderMux::new();
        mux.add_provider_with_client(&settings("openai", 1), Box::new(AlwaysFail))
            .unwrap();

        let err = mux.chat(&prompt(), None, None, None).await.unwrap_err();
        match err {
            ProviderError::Exhausted { last } => assert!(last.contains("intentional failure")),
            other => panic!("expected Exhausted, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn cancellation_aborts_and_records_failure() {
        struct Hangs;

        #[async_trait]
        impl LlmProvider for Hangs {
            fn name(&self) -> &str {
                "hangs"
            }
            async fn send(&self, _req: &ChatRequest) -> Result<ChatResponse, ProviderError> {
                std::future::pending().await
            }
        }

        let mux = ProviderMux::new();
        mux.add_provider_with_client(&settings("openai", 1), Box::new(Hangs))
            .unwrap();

        let token = CancellationToken::new();
        token.cancel();
        let err = mux.chat(&prompt(), None, None, Some(&token)).await.unwrap_err();
        assert!(matches!(err, ProviderError::Cancelled));
        assert_eq!(mux.stats("openai").unwrap().failed_requests, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_bounds_calls_per_window() {
        let mux = ProviderMux::new();
        let mut s = settings("openai", 1);
        s.max_requests_per_minute = 2;
        mux.add_provider_with_client(&s, Box::new(AlwaysOk { name: "o" }))
            .unwrap();

        let mut waits = Vec::new();
        for _ in 0..5 {
            let out = mux.chat(&prompt(), None, None, None).await.unwrap();
            waits.push(out.waited);
        }

        // Two immediate, then each extra call waits for a slot to age out.
        assert_eq!(waits[0], Duration::ZERO);
        assert_eq!(waits[1], Duration::ZERO);
        assert!(waits[2] >= Duration::from_secs(59));
        assert_eq!(waits[3], Duration::ZERO);
        assert!(waits[4] >= Duration::from_secs(59));
    }

    #[tokio::test]
    async fn usage_accounting_records_tokens_and_cost() {
        let mux = ProviderMux::new();
        let calls = Arc::new(AtomicU32::new(0));
        mux.add_provider_with_client(
            &settings("openai", 1),
            Box::new(CountingOk { calls: Arc::clone(&calls) }),
        )
        .unwrap();

        mux.chat(&prompt(), None, None, None).await.unwrap();
        let stats = mux.stats("openai").unwrap();
        assert_eq!(stats.successful_requests, 1);
        assert_eq!(stats.total_tokens, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let report = mux.usage_report();
        assert!(report.contains("openai"));
        assert!(report.contains("requests=1"));
    }
}
