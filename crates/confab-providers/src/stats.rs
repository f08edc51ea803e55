use chrono::{DateTime, Utc};
use serde::Serialize;

/// Per-provider request accounting. Cost figures are advisory only.
#[derive(Debug, Clone, Default, Serialize)]
pub struct UsageStats {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub total_tokens: u64,
    pub total_cost: f64,
    pub last_request_time: Option<DateTime<Utc>>,
    /// Errors since the last success; three in a row marks the provider
    /// unavailable.
    pub consecutive_errors: u32,
}

impl UsageStats {
    pub fn record_success(&mut self, tokens: u64, cost: f64) {
        self.total_requests += 1;
        self.successful_requests += 1;
        self.total_tokens += tokens;
        self.total_cost += cost;
        self.last_request_time = Some(Utc::now());
        self.consecutive_errors = 0;
    }

    pub fn record_failure(&mut self) {
        self.total_requests += 1;
        self.failed_requests += 1;
        self.consecutive_errors += 1;
        self.last_request_time = Some(Utc::now());
    }

    pub fn success_rate(&self) -> f64 {
        if self.total_requests == 0 {
            return 100.0;
        }
        (self.successful_requests as f64 / self.total_requests as f64) * 100.0
    }
}

/// Price per 1k tokens: (model prefix, prompt, completion). Matched by
/// longest-prefix; locally hosted models cost nothing.
const COST_TABLE: &[(&str, f64, f64)] = &[
    ("gpt-4o-mini", 0.000_15, 0.000_6),
    ("gpt-4o", 0.002_5, 0.01),
    ("gpt-4.1", 0.002, 0.008),
    ("claude-sonnet", 0.003, 0.015),
    ("claude-haiku", 0.000_8, 0.004),
    ("claude-opus", 0.015, 0.075),
    ("gemini-2.0-flash", 0.000_075, 0.000_3),
    ("gemini-1.5-pro", 0.001_25, 0.005),
];

/// Estimate request cost in USD. Unknown models price at the cheapest
/// table entry; local models are free.
pub fn estimate_cost(model: &str, tokens_in: u64, tokens_out: u64) -> f64 {
    let lower = model.to_lowercase();
    if crate::config::is_local_model_name(&lower) {
        return 0.0;
    }

    let (prompt, completion) = COST_TABLE
        .iter()
        .filter(|(prefix, _, _)| lower.starts_with(prefix))
        .max_by_key(|(prefix, _, _)| prefix.len())
        .map(|(_, p, c)| (*p, *c))
        .unwrap_or_else(cheapest_entry);

    (tokens_in as f64 / 1000.0) * prompt + (tokens_out as f64 / 1000.0) * completion
}

fn cheapest_entry() -> (f64, f64) {
    COST_TABLE
        .iter()
        .map(|(_, p, c)| (*p, *c))
        .min_by(|a, b| (a.0 + a.1).partial_cmp(&(b.0 + b.1)).unwrap())
        .expect("cost table non-empty")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_resets_consecutive_errors() {
        let mut stats = UsageStats::default();
        stats.record_failure();
        stats.record_failure();
        assert_eq!(stats.consecutive_errors, 2);
        stats.record_success(100, 0.001);
        assert_eq!(stats.consecutive_errors, 0);
        assert_eq!(stats.total_requests, 3);
        assert_eq!(stats.successful_requests, 1);
    }

    #[test]
    fn success_rate_starts_at_hundred() {
        let stats = UsageStats::default();
        assert_eq!(stats.success_rate(), 100.0);
    }

    #[test]
    fn known_model_pricing_uses_longest_prefix() {
        // gpt-4o-mini must not price as gpt-4o.
        let mini = estimate_cost("gpt-4o-mini", 1000, 1000);
        let full = estimate_cost("gpt-4o", 1000, 1000);
        assert!(mini < full);
    }

    #[test]
    fn unknown_model_prices_as_cheapest() {
        let unknown = estimate_cost("mystery-model-9000", 1000, 1000);
        let (p, c) = cheapest_entry();
        assert!((unknown - (p + c)).abs() < 1e-9);
    }

    #[test]
    fn local_models_are_free() {
        assert_eq!(estimate_cost("llama-3-8b.gguf", 5000, 5000), 0.0);
        assert_eq!(estimate_cost("lm-studio/qwen", 5000, 5000), 0.0);
    }
}
