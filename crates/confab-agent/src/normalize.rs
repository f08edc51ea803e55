//! Cleanup path for responses from locally hosted models.
//!
//! Local models leak chat-template artifacts, emit tool calls as JSON in
//! the content body, hallucinate extra turns, and default tool arguments
//! to English. This module turns those responses into the same shape the
//! hosted providers deliver. Normalization is idempotent: a second pass
//! over an already-clean response is a no-op.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};
use tracing::{debug, info};

use confab_providers::{ChatResponse, ProviderFamily, ToolCall};

/// Literal chat-template tokens stripped from content.
const ARTIFACTS: &[&str] = &[
    "<end_of_turn>",
    "<start_of_turn>",
    "<|im_end|>",
    "<|im_start|>",
    "<|end|>",
    "<|assistant|>",
    "<|user|>",
    "<|system|>",
    "</s>",
    "<s>",
    "[INST]",
    "[/INST]",
    "<<SYS>>",
    "<</SYS>>",
    "<|endoftext|>",
    "<|pad|>",
];

/// Markers after which everything is a hallucinated continuation.
const TURN_MARKERS: &[&str] = &["<start_of_turn>user", "<start_of_turn>\nuser", "\n<start_of_turn>"];

/// Local-model tool names mapped to the registered tool set.
const TOOL_NAME_ALIASES: &[(&str, &str)] = &[
    ("get_weather", "web_search"),
    ("weather", "web_search"),
    ("search", "web_search"),
    ("tavily_search", "web_search"),
    ("google_search", "web_search"),
    ("get_news", "web_search"),
    ("get_conversation", "recall_last_conversation"),
    ("recall_conversation", "recall_last_conversation"),
    ("get_memory", "recall_last_conversation"),
    ("remember", "recall_last_conversation"),
    ("translate", "clarify_communication"),
    ("clarify", "clarify_communication"),
    ("get_preference", "user_preference"),
    ("get_user_preference", "user_preference"),
    ("set_preference", "user_preference"),
    ("evaluate_skill", "skill_evaluator"),
    ("check_skill", "skill_evaluator"),
    ("set_language", "set_language_preference"),
    ("language", "set_language_preference"),
    ("format", "format_output"),
    ("event", "life_event"),
    ("add_event", "life_event"),
];

/// Content values that count as an empty response.
const EMPTY_PATTERNS: &[&str] = &["", "```", "\n```", "`", "\n", " ", "  ", "\t"];

static THINK_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<think>.*?</think>").expect("valid regex"));
static MULTI_NEWLINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n{3,}").expect("valid regex"));
static MULTI_SPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r" {2,}").expect("valid regex"));

/// Patterns indicating raw search output rather than a natural reply.
static RAW_OUTPUT_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    let patterns = [
        r"(?im)^[\*\#]+\s*Search results for",
        r"(?im)^Results from (web_search|tavily)",
        r"(?i)easeweather\.com",
        r"(?i)weather25\.com",
        r"(?i)Close menu\s*\n",
    ];
    patterns.iter().filter_map(|p| Regex::new(p).ok()).collect()
});

static URL_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"https?://\S+").expect("valid regex"));
static MD_HEADER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^#+\s*").expect("valid regex"));
static SEARCH_HEADER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\*\*Search results for.*?\*\*:?").expect("valid regex")
});
static RESULTS_FROM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)Results from \w+:").expect("valid regex"));
static DOMAIN_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\w+\.(com|org|net|io)\s*").expect("valid regex"));

/// A tool call recovered from embedded JSON (no call id yet).
#[derive(Debug, Clone, PartialEq)]
pub struct RawCall {
    pub name: String,
    pub arguments: Map<String, Value>,
}

/// Strip chat-template artifacts, thinking blocks, and hallucinated
/// continuations; collapse excess whitespace.
pub fn strip_artifacts(content: &str) -> String {
    let mut cleaned = content.to_string();

    for marker in TURN_MARKERS {
        if let Some(idx) = cleaned.find(marker) {
            cleaned.truncate(idx);
        }
    }

    cleaned = THINK_BLOCK.replace_all(&cleaned, "").to_string();
    for artifact in ARTIFACTS {
        cleaned = cleaned.replace(artifact, "");
    }

    cleaned = MULTI_NEWLINE.replace_all(&cleaned, "\n\n").to_string();
    cleaned = MULTI_SPACE.replace_all(&cleaned, " ").to_string();
    cleaned.trim().to_string()
}

/// Extract a balanced JSON object starting at `start` (which must index a
/// `{`). Honors strings and escapes.
fn extract_complete_json(content: &str, start: usize) -> Option<&str> {
    let bytes = content.as_bytes();
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, &b) in bytes[start..].iter().enumerate() {
        if escaped {
            escaped = false;
            continue;
        }
        match b {
            b'\\' => escaped = true,
            b'"' => in_string = !in_string,
            b'{' if !in_string => depth += 1,
            b'}' if !in_string => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(&content[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

fn calls_from_list(list: &[Value]) -> Vec<RawCall> {
    list.iter()
        .filter_map(|item| {
            let obj = item.as_object()?;
            let name = obj.get("name")?.as_str()?.to_string();
            let arguments = obj
                .get("arguments")
                .or_else(|| obj.get("args"))
                .and_then(Value::as_object)
                .cloned()
                .unwrap_or_default();
            Some(RawCall { name, arguments })
        })
        .collect()
}

/// Find the structured `{"formatted_output": ..., "tool_calls": [...]}`
/// envelope (or the legacy bare array) inside response content.
///
/// Returns `(tool_calls, final_text)`: a non-trivial `formatted_output`
/// string wins as the final response; a null `formatted_output` yields the
/// embedded tool calls.
pub fn parse_embedded_tool_calls(content: &str) -> (Option<Vec<RawCall>>, Option<String>) {
    if content.is_empty() {
        return (None, None);
    }
    let cleaned = strip_artifacts(content);

    // Structured envelope first.
    if let Some(key_idx) = cleaned.find("\"formatted_output\"") {
        let mut start = cleaned[..key_idx].rfind('{');
        while let Some(pos) = start {
            if let Some(json_str) = extract_complete_json(&cleaned, pos) {
                if let Ok(Value::Object(obj)) = serde_json::from_str::<Value>(json_str) {
                    if obj.contains_key("formatted_output") {
                        if let Some(formatted) =
                            obj.get("formatted_output").and_then(Value::as_str)
                        {
                            if formatted.len() > 5 {
                                info!("using formatted_output from embedded JSON");
                                return (None, Some(formatted.to_string()));
                            }
                        }
                        if let Some(calls) = obj.get("tool_calls").and_then(Value::as_array) {
                            let parsed = calls_from_list(calls);
                            if !parsed.is_empty() {
                                info!(count = parsed.len(), "parsed embedded tool calls");
                                return (Some(parsed), None);
                            }
                        }
                        break;
                    }
                }
            }
            start = cleaned[..pos].rfind('{');
        }
    }

    // Legacy shape: a bare top-level array of {"name": ...} objects.
    if let Some(open) = cleaned.find('[') {
        if let Some(close) = cleaned.rfind(']') {
            if close > open {
                if let Ok(Value::Array(items)) =
                    serde_json::from_str::<Value>(&cleaned[open..=close])
                {
                    for item in &items {
                        if let Some(formatted) =
                            item.get("formatted_output").and_then(Value::as_str)
                        {
                            if formatted.len() > 5 {
                                return (None, Some(formatted.to_string()));
                            }
                        }
                    }
                    let parsed = calls_from_list(&items);
                    if !parsed.is_empty() {
                        info!(count = parsed.len(), "parsed legacy-format tool calls");
                        return (Some(parsed), None);
                    }
                }
            }
        }
    }

    (None, None)
}

/// Map a local-model tool name onto the registered tool set.
pub fn map_tool_name(name: &str) -> String {
    let lower = name.to_lowercase();
    for (alias, target) in TOOL_NAME_ALIASES {
        if lower == *alias {
            debug!(from = %name, to = %target, "remapped tool name");
            return target.to_string();
        }
    }
    name.to_string()
}

/// Fix arguments for the mapped tool: fold `location` into `query` (with a
/// weather prefix when the alias was weather-shaped), ensure `query`
/// exists, and override English-language arguments when the user's stored
/// preference differs.
pub fn map_tool_arguments(
    original_name: &str,
    mapped_name: &str,
    mut args: Map<String, Value>,
    user_language: &str,
) -> Map<String, Value> {
    if mapped_name == "web_search" {
        if !args.contains_key("query") {
            if let Some(location) = args.remove("location").and_then(|v| match v {
                Value::String(s) => Some(s),
                other => Some(other.to_string()),
            }) {
                let original = original_name.to_lowercase();
                let query = if original == "get_weather" || original == "weather" {
                    format!("weather in {location}")
                } else {
                    location
                };
                args.insert("query".to_string(), Value::String(query));
            }
        }
        if !args.contains_key("query") {
            let fallback = if args.is_empty() {
                "search".to_string()
            } else {
                Value::Object(args.clone()).to_string()
            };
            args.insert("query".to_string(), Value::String(fallback));
        }
    }

    fix_language_args(&mut args, user_language);
    args
}

/// Local models default `target_language`/`language` to English; restore
/// the user's stored preference when it differs.
pub fn fix_language_args(args: &mut Map<String, Value>, user_language: &str) {
    if user_language.is_empty() || user_language.eq_ignore_ascii_case("english") {
        return;
    }
    for field in ["target_language", "language"] {
        if let Some(Value::String(current)) = args.get(field) {
            if current.eq_ignore_ascii_case("english") {
                debug!(field, to = %user_language, "fixed language argument");
                args.insert(field.to_string(), Value::String(user_language.to_string()));
            }
        }
    }
}

/// Does the content look like unformatted search output?
pub fn is_raw_output(content: &str) -> bool {
    !content.is_empty() && RAW_OUTPUT_PATTERNS.iter().any(|p| p.is_match(content))
}

/// Convert raw search output into something readable: drop URLs, markdown
/// headers, and navigation chrome, keep the informational body.
pub fn format_raw_search_output(content: &str) -> String {
    let mut cleaned = strip_artifacts(content);
    cleaned = MD_HEADER.replace_all(&cleaned, "").to_string();
    cleaned = SEARCH_HEADER.replace_all(&cleaned, "").to_string();
    cleaned = RESULTS_FROM.replace_all(&cleaned, "").to_string();
    cleaned = URL_PATTERN.replace_all(&cleaned, "").to_string();
    cleaned = DOMAIN_PATTERN.replace_all(&cleaned, "").to_string();
    cleaned = cleaned.replace("Close menu", "");
    cleaned = MULTI_NEWLINE.replace_all(&cleaned, "\n\n").to_string();
    let cleaned = cleaned.trim().to_string();

    if cleaned.is_empty() {
        "I found some information but couldn't format it properly. Could you rephrase \
         your question?"
            .to_string()
    } else {
        cleaned
    }
}

/// The empty-response predicate: specific junk strings or whitespace-only
/// content, with no tool calls to act on.
pub fn is_empty_response(content: &str, has_tool_calls: bool) -> bool {
    if has_tool_calls {
        return false;
    }
    let stripped = content.trim();
    stripped.is_empty() || EMPTY_PATTERNS.contains(&stripped) || EMPTY_PATTERNS.contains(&content)
}

/// Full normalization for one response from a local-family provider.
/// Non-local responses pass through untouched.
pub fn normalize_response(
    response: ChatResponse,
    family: ProviderFamily,
    user_language: &str,
) -> ChatResponse {
    if !family.is_local() {
        return response;
    }

    let mut out = response;

    // Remap any natively returned tool calls first (LM Studio can produce
    // real tool_calls with alias names).
    out.tool_calls = out
        .tool_calls
        .into_iter()
        .map(|call| remap_call(call, user_language))
        .collect();

    if out.content.is_empty() {
        return out;
    }

    // Embedded JSON envelope beats everything else.
    let (parsed_calls, final_text) = parse_embedded_tool_calls(&out.content);
    if let Some(text) = final_text {
        out.content = text;
        out.tool_calls.clear();
        return out;
    }
    if let Some(raw_calls) = parsed_calls {
        for (i, raw) in raw_calls.into_iter().enumerate() {
            let mapped = map_tool_name(&raw.name);
            let arguments =
                map_tool_arguments(&raw.name, &mapped, raw.arguments, user_language);
            out.tool_calls.push(ToolCall {
                id: format!("local_{i}"),
                name: mapped,
                arguments: Value::Object(arguments),
            });
        }
        out.content = String::new();
        return out;
    }

    let mut cleaned = strip_artifacts(&out.content);
    if is_raw_output(&cleaned) {
        info!("recovering raw search output from local model");
        cleaned = format_raw_search_output(&cleaned);
    }
    out.content = cleaned;
    out
}

fn remap_call(call: ToolCall, user_language: &str) -> ToolCall {
    let mapped = map_tool_name(&call.name);
    let args = match call.arguments {
        Value::Object(map) => map,
        Value::Null => Map::new(),
        other => {
            let mut map = Map::new();
            map.insert("value".to_string(), other);
            map
        }
    };
    let arguments = map_tool_arguments(&call.name, &mapped, args, user_language);
    ToolCall {
        id: call.id,
        name: mapped,
        arguments: Value::Object(arguments),
    }
}
