use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use confab_core::types::MessageRole;

use crate::client::{ChatRequest, ChatResponse, LlmProvider, ProviderError, ToolCall};

const API_VERSION: &str = "2023-06-01";

pub struct AnthropicClient {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl AnthropicClient {
    pub fn new(api_key: String, base_url: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            base_url: base_url.unwrap_or_else(|| "https://api.anthropic.com".to_string()),
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
impl LlmProvider for AnthropicClient {
    fn name(&self) -> &str {
        "claude"
    }

    async fn send(&self, req: &ChatRequest) -> Result<ChatResponse, ProviderError> {
        let body = build_request_body(req);
        let url = format!("{}/v1/messages", self.base_url);

        debug!(model = %req.model, "sending request to Anthropic");

        let resp = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() || e.is_timeout() {
                    ProviderError::Unavailable(e.to_string())
                } else {
                    ProviderError::Http(e)
                }
            })?;

        let status = resp.status().as_u16();
        if status == 429 {
            let retry = resp
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(|s| s * 1000)
                .unwrap_or(5000);
            return Err(ProviderError::QuotaExceeded {
                retry_after_ms: retry,
            });
        }

        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            warn!(status, body = %text, "Anthropic API error");
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
    // Anthropic carries tool use as content blocks: tool_use on assistant
    // turns, tool_result inside user turns.
    let mut messages: Vec<serde_json::Value> = Vec::with_capacity(req.messages.len());

    for m in &req.messages {
        match m.role {
            MessageRole::Tool => {
                messages.push(serde_json::json!({
                    "role": "user",
                    "content": [{
                        "type": "tool_result",
                        "tool_use_id": m.tool_call_id.as_deref().unwrap_or("call_0"),
                        "content": m.content,
                    }],
                }));
            }
            MessageRole::Assistant if !m.tool_calls.is_empty() => {
                let mut blocks: Vec<serde_json::Value> = Vec::new();
                if !m.content.is_empty() {
                    blocks.push(serde_json::json!({"type": "text", "text": m.content}));
                }
                for c in &m.tool_calls {
                    blocks.push(serde_json::json!({
                        "type": "tool_use",
                        "id": c.id,
                        "name": c.name,
                        "input": c.arguments,
                    }));
                }
                messages.push(serde_json::json!({"role": "assistant", "content": blocks}));
            }
            MessageRole::System => {
                // System turns fold into a user turn; the real system prompt
                // travels in the top-level field.
                messages.push(serde_json::json!({"role": "user", "content": m.content}));
            }
            _ => {
                messages.push(serde_json::json!({"role": m.role, "content": m.content}));
            }
        }
    }

    let mut body = serde_json::json!({
        "model": req.model,
        "system": req.system,
        "messages": messages,
        "max_tokens": req.max_tokens,
        "temperature": req.temperature,
    });

    if !req.tools.is_empty() {
        let tools: Vec<serde_json::Value> = req
            .tools
            .iter()
            .map(|t| {
                serde_json::json!({
                    "name": t.name,
                    "description": t.description,
                    "input_schema": t.input_schema,
                })
            })
            .collect();
        body["tools"] = serde_json::json!(tools);
    }

    body
}

fn parse_response(resp: ApiResponse) -> ChatResponse {
    let mut content = String::new();
    let mut tool_calls = Vec::new();

    for block in resp.content {
        match block {
            ContentBlock::Text { text } => {
                if !content.is_empty() {
                    content.push('\n');
                }
                content.push_str(&text);
            }
            ContentBlock::ToolUse { id, name, input } => {
                tool_calls.push(ToolCall {
                    id,
                    name,
                    arguments: input,
                });
            }
        }
    }

    ChatResponse {
        content,
        model: resp.model,
        tokens_in: resp.usage.as_ref().map(|u| u.input_tokens).unwrap_or(0),
        tokens_out: resp.usage.as_ref().map(|u| u.output_tokens).unwrap_or(0),
        tool_calls,
    }
}

// Anthropic API response types (deserialization only)

#[derive(Deserialize)]
struct ApiResponse {
    #[serde(default)]
    model: String,
    content: Vec<ContentBlock>,
    usage: Option<Usage>,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
}

#[derive(Deserialize)]
struct Usage {
    input_tokens: u32,
    output_tokens: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ChatMessage;

    #[test]
    fn tool_results_become_tool_result_blocks() {
        let req = ChatRequest {
            model: "claude-sonnet-4-0".to_string(),
            system: "sys".to_string(),
            messages: vec![ChatMessage::tool("call_3", "web_search", "results")],
            max_tokens: 128,
            temperature: 0.5,
            tools: Vec::new(),
        };
        let body = build_request_body(&req);
        let first = &body["messages"][0];
        assert_eq!(first["role"], "user");
        assert_eq!(first["content"][0]["type"], "tool_result");
        assert_eq!(first["content"][0]["tool_use_id"], "call_3");
    }

    #[test]
    fn parses_tool_use_blocks() {
        let raw = serde_json::json!({
            "model": "claude-sonnet-4-0",
            "content": [
                {"type": "text", "text": "Let me check."},
                {"type": "tool_use", "id": "toolu_1", "name": "web_search",
                 "input": {"query": "weather"}}
            ],
            "usage": {"input_tokens": 12, "output_tokens": 7}
        });
        let resp: ApiResponse = serde_json::from_value(raw).unwrap();
        let parsed = parse_response(resp);
        assert_eq!(parsed.content, "Let me check.");
        assert_eq!(parsed.tool_calls.len(), 1);
        assert_eq!(parsed.tool_calls[0].id, "toolu_1");
        assert_eq!(parsed.tokens_out, 7);
    }
}
