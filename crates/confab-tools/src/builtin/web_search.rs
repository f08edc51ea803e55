use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::debug;

use crate::registry::{Tool, ToolOutcome};
use crate::schema::{FieldKind, ToolSchema};

/// One search result row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub title: String,
    pub url: String,
    pub content: String,
    #[serde(default)]
    pub score: f64,
}

/// Pluggable search provider; tests stub this out.
#[async_trait]
pub trait SearchBackend: Send + Sync {
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchHit>, String>;
}

/// HTTP backend speaking the Tavily-style search API.
pub struct HttpSearchBackend {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
}

impl HttpSearchBackend {
    pub fn new(endpoint: String, api_key: Option<String>, timeout_secs: u64) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(timeout_secs))
                .build()
                .unwrap_or_default(),
            endpoint,
            api_key,
        }
    }
}

#[derive(Deserialize)]
struct SearchApiResponse {
    #[serde(default)]
    results: Vec<SearchHit>,
}

#[async_trait]
impl SearchBackend for HttpSearchBackend {
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchHit>, String> {
        let mut body = json!({
            "query": query,
            "max_results": max_results,
        });
        if let Some(key) = &self.api_key {
            body["api_key"] = json!(key);
        }

        debug!(query, max_results, "web search request");

        let resp = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| format!("search request failed: {e}"))?;

        if !resp.status().is_success() {
            return Err(format!("search API returned {}", resp.status().as_u16()));
        }

        let parsed: SearchApiResponse = resp
            .json()
            .await
            .map_err(|e| format!("search response unreadable: {e}"))?;
        Ok(parsed.results.into_iter().take(max_results).collect())
    }
}

/// Backend used when no search endpoint is configured.
pub struct DisabledSearchBackend;

#[async_trait]
impl SearchBackend for DisabledSearchBackend {
    async fn search(&self, _query: &str, _max_results: usize) -> Result<Vec<SearchHit>, String> {
        Err("web search is not configured".to_string())
    }
}

pub struct WebSearchTool {
    backend: Arc<dyn SearchBackend>,
}

impl WebSearchTool {
    pub fn new(backend: Arc<dyn SearchBackend>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &str {
        "web_search"
    }

    fn description(&self) -> &str {
        "Search the web for current information (weather, news, facts). \
         Returns titles, URLs and content snippets."
    }

    fn schema(&self) -> ToolSchema {
        ToolSchema::new()
            .required("query", FieldKind::String, "The search query")
            .optional_with_default(
                "max_results",
                FieldKind::Integer,
                "Maximum number of results to return",
                json!(5),
            )
    }

    async fn execute(&self, args: Map<String, Value>) -> ToolOutcome {
        let query = args
            .get("query")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .trim()
            .to_string();
        if query.is_empty() {
            return ToolOutcome::error("query must not be empty");
        }
        let max_results = args
            .get("max_results")
            .and_then(Value::as_u64)
            .unwrap_or(5)
            .clamp(1, 10) as usize;

        match self.backend.search(&query, max_results).await {
            Ok(hits) => ToolOutcome::ok(json!({
                "query": query,
                "results_count": hits.len(),
                "data": hits,
            })),
            Err(e) => ToolOutcome::error(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedBackend(Vec<SearchHit>);

    #[async_trait]
    impl SearchBackend for FixedBackend {
        async fn search(&self, _q: &str, max: usize) -> Result<Vec<SearchHit>, String> {
            Ok(self.0.iter().take(max).cloned().collect())
        }
    }

    fn hit(title: &str, content: &str) -> SearchHit {
        SearchHit {
            title: title.to_string(),
            url: format!("https://example.com/{title}"),
            content: content.to_string(),
            score: 0.9,
        }
    }

    #[tokio::test]
    async fn returns_structured_results() {
        let tool = WebSearchTool::new(Arc::new(FixedBackend(vec![hit(
            "Weather Paris",
            "15°C cloudy",
        )])));
        let mut args = Map::new();
        args.insert("query".to_string(), json!("weather in Paris"));
        args.insert("max_results".to_string(), json!(5));

        match tool.execute(args).await {
            ToolOutcome::Ok(value) => {
                assert_eq!(value["results_count"], 1);
                assert_eq!(value["data"][0]["content"], "15°C cloudy");
            }
            other => panic!("expected ok, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn empty_query_is_an_error() {
        let tool = WebSearchTool::new(Arc::new(FixedBackend(vec![])));
        let mut args = Map::new();
        args.insert("query".to_string(), json!("  "));
        assert!(tool.execute(args).await.is_error());
    }

    #[tokio::test]
    async fn disabled_backend_reports_cleanly() {
        let tool = WebSearchTool::new(Arc::new(DisabledSearchBackend));
        let mut args = Map::new();
        args.insert("query".to_string(), json!("anything"));
        match tool.execute(args).await {
            ToolOutcome::Error(msg) => assert!(msg.contains("not configured")),
            other => panic!("expected error, got {other:?}"),
        }
    }
}
