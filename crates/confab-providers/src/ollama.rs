use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use confab_core::types::MessageRole;

use crate::client::{ChatRequest, ChatResponse, LlmProvider, ProviderError};

/// Local Ollama server. Tool calling goes through the MCP-style prompt
/// block and the response normalizer rather than a native tools field, so
/// `req.tools` is intentionally not forwarded.
pub struct OllamaClient {
    client: reqwest::Client,
    base_url: String,
}

impl OllamaClient {
    pub fn new(base_url: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.unwrap_or_else(|| "http://localhost:11434".to_string()),
        }
    }

    /// Apply an outer per-request timeout (covers connect + full body).
    pub fn with_http_timeout(mut self, timeout: std::time::Duration) -> Self {
        self.client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        self
    }
}

#[async_trait]
impl LlmProvider for OllamaClient {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn send(&self, req: &ChatRequest) -> Result<ChatResponse, ProviderError> {
        let body = build_request_body(req);
        let url = format!("{}/api/chat", self.base_url);

        debug!(model = %req.model, "sending request to Ollama");

        let resp = self
            .client
            .post(&url)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                // Connection errors surface as Unavailable so the mux falls back.
                if e.is_connect() || e.is_timeout() {
                    ProviderError::Unavailable(e.to_string())
                } else {
                    ProviderError::Http(e)
                }
            })?;

        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            warn!(status, body = %text, "Ollama API error");
            return Err(ProviderError::Api {
                status,
                message: text,
            });
        }

        let api_resp: ApiResponse = resp
            .json()
            .await
            .map_err(|e| ProviderError::Parse(e.to_string()))?;

        Ok(parse_response(api_resp))
    }
}

fn build_request_body(req: &ChatRequest) -> serde_json::Value {
    let mut messages = vec![serde_json::json!({
        "role": "system",
        "content": req.system,
    })];

    for m in &req.messages {
        // Ollama has no tool role; results fold into user turns.
        let role = match m.role {
            MessageRole::Tool => "user".to_string(),
            other => other.to_string(),
        };
        messages.push(serde_json::json!({
            "role": role,
            "content": m.content,
        }));
    }

    serde_json::json!({
        "model": req.model,
        "messages": messages,
        "stream": false,
        "options": {
            "num_predict": req.max_tokens,
            "temperature": req.temperature,
        },
    })
}

fn parse_response(resp: ApiResponse) -> ChatResponse {
    ChatResponse {
        content: resp.message.content,
        model: resp.model,
        tokens_in: resp.prompt_eval_count.unwrap_or(0),
        tokens_out: resp.eval_count.unwrap_or(0),
        tool_calls: Vec::new(),
    }
}

// Ollama API response types (deserialization only)

#[derive(Deserialize)]
struct ApiResponse {
    #[serde(default)]
    model: String,
    message: OllamaMessage,
    prompt_eval_count: Option<u32>,
    eval_count: Option<u32>,
}

#[derive(Deserialize)]
struct OllamaMessage {
    content: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ChatMessage;

    #[test]
    fn tool_role_folds_into_user() {
        let req = ChatRequest {
            model: "llama3.1".to_string(),
            system: "sys".to_string(),
            messages: vec![ChatMessage::tool("c1", "web_search", "result text")],
            max_tokens: 64,
            temperature: 0.7,
            tools: Vec::new(),
        };
        let body = build_request_body(&req);
        assert_eq!(body["messages"][1]["role"], "user");
        assert_eq!(body["messages"][1]["content"], "result text");
    }
}
