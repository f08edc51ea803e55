//! Human-readable formatting of tool results, keyed by tool name.
//! The formatted string is what lands in the conversation history as the
//! tool turn, so it is bounded and never raw JSON for known tools.

use serde_json::Value;

use crate::registry::ToolOutcome;

/// Upper bound per formatted result.
const MAX_FORMATTED_LEN: usize = 2000;

/// Normalize a tool outcome into display text.
pub fn format_tool_result(tool_name: &str, outcome: &ToolOutcome) -> String {
    let text = match outcome {
        ToolOutcome::Error(msg) => format!("Error from {tool_name}: {msg}"),
        ToolOutcome::Ok(value) => format_value(tool_name, value),
    };
    truncate(text, MAX_FORMATTED_LEN)
}

fn format_value(tool_name: &str, value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Array(items) => format_list(tool_name, items),
        Value::Object(map) => {
            if let Some(Value::String(err)) = map.get("error") {
                return format!("Error from {tool_name}: {err}");
            }
            match tool_name {
                "skill_evaluator" => format_skill_evaluation(value),
                "web_search" => format_web_search(value),
                "recall_last_conversation" => format_conversation_recall(value),
                "life_event" => format_life_event(value),
                "user_preference" => format_user_preference(value),
                "clarify_communication" => format_clarify(value),
                _ => format_generic(tool_name, value),
            }
        }
        other => other.to_string(),
    }
}

fn format_skill_evaluation(result: &Value) -> String {
    let mut parts: Vec<String> = Vec::new();

    if let Some(msg) = result.get("message").and_then(Value::as_str) {
        parts.push(msg.to_string());
    }

    if let Some(updates) = result.get("skills_updated").and_then(Value::as_array) {
        if !updates.is_empty() {
            parts.push("\n🎯 Skills Demonstrated:".to_string());
            for update in updates.iter().take(5) {
                let skill = update.get("skill").and_then(Value::as_str).unwrap_or("Unknown");
                let old = update.get("old_level").and_then(Value::as_i64).unwrap_or(0);
                let new = update.get("new_level").and_then(Value::as_i64).unwrap_or(0);
                let improved = update
                    .get("improved")
                    .and_then(Value::as_bool)
                    .unwrap_or(false);
                if improved {
                    parts.push(format!("  ✅ {skill}: {old} → {new} (Improved!)"));
                } else {
                    parts.push(format!("  • {skill}: {new}/10 (Max reached)"));
                }
            }
        }
    }

    if let Some(skills) = result.get("current_skills").and_then(Value::as_object) {
        if !skills.is_empty() {
            parts.push("\n📊 Overall Skill Levels:".to_string());
            for (skill, level) in skills.iter().take(5) {
                parts.push(format!("  • {skill}: {}/10", level.as_i64().unwrap_or(0)));
            }
        }
    }

    if let Some(detected) = result
        .get("message_analysis")
        .and_then(|a| a.get("detected_skills"))
        .and_then(Value::as_array)
    {
        let names: Vec<&str> = detected
            .iter()
            .filter_map(|d| d.get("skill").and_then(Value::as_str))
            .collect();
        if !names.is_empty() {
            parts.push(format!("\n✨ Detected in your message: {}", names.join(", ")));
        }
    }

    if let Some(suggestions) = result.get("suggestions").and_then(Value::as_array) {
        if !suggestions.is_empty() {
            parts.push("\n💡 Suggestions:".to_string());
            for s in suggestions.iter().take(3) {
                let text = s.as_str().map(str::to_string).unwrap_or_else(|| s.to_string());
                parts.push(format!("  • {text}"));
            }
        }
    }

    if parts.is_empty() {
        format_generic("skill_evaluator", result)
    } else {
        parts.join("\n")
    }
}

fn format_web_search(result: &Value) -> String {
    let query = result.get("query").and_then(Value::as_str).unwrap_or("search");
    let data = result.get("data").and_then(Value::as_array);

    let Some(data) = data.filter(|d| !d.is_empty()) else {
        return format!("No results found for '{query}'");
    };

    let count = result
        .get("results_count")
        .and_then(Value::as_u64)
        .unwrap_or(data.len() as u64);

    let mut parts = vec![format!("🔍 Found {count} results for '{query}':")];
    for (i, item) in data.iter().take(3).enumerate() {
        match item {
            Value::Object(map) => {
                let title = map
                    .get("title")
                    .and_then(Value::as_str)
                    .unwrap_or("Result");
                parts.push(format!("\n{}. {title}", i + 1));
                if let Some(content) = map.get("content").and_then(Value::as_str) {
                    let snippet = if content.len() > 500 {
                        format!("{}...", truncate_at_boundary(content, 500))
                    } else {
                        content.to_string()
                    };
                    parts.push(format!("   {snippet}"));
                }
            }
            Value::String(s) => {
                parts.push(format!("\n{}. {}", i + 1, truncate_at_boundary(s, 150)));
            }
            other => parts.push(format!("\n{}. {other}", i + 1)),
        }
    }
    if data.len() > 3 {
        parts.push(format!("\n... and {} more results", data.len() - 3));
    }
    parts.join("\n")
}

fn format_conversation_recall(result: &Value) -> String {
    let messages = result.get("data").and_then(Value::as_array);
    let Some(messages) = messages.filter(|m| !m.is_empty()) else {
        return "No previous conversation found.".to_string();
    };

    let total = result
        .get("total_messages")
        .and_then(Value::as_u64)
        .unwrap_or(messages.len() as u64);
    let general = result
        .get("general_chat_count")
        .and_then(Value::as_u64)
        .unwrap_or(0);
    let ai = result
        .get("ai_conversation_count")
        .and_then(Value::as_u64)
        .unwrap_or(0);

    let mut parts = vec![format!(
        "💬 Previous Conversation ({total} stored, {general} general / {ai} ai):"
    )];
    for msg in messages.iter().rev().take(5).rev() {
        let role = msg.get("role").and_then(Value::as_str).unwrap_or("unknown");
        let content = msg.get("content").and_then(Value::as_str).unwrap_or("");
        let label = match role {
            "user" => "You",
            "assistant" => "AI",
            other => other,
        };
        parts.push(format!("{label}: {content}"));
    }
    parts.join("\n")
}

fn format_life_event(result: &Value) -> String {
    let status = result.get("status").and_then(Value::as_str).unwrap_or("");
    let message = result.get("message").and_then(Value::as_str).unwrap_or("");

    if status == "success" {
        if let Some(event) = result.get("event") {
            let title = event.get("title").and_then(Value::as_str).unwrap_or("Untitled");
            return format!("Event: {title}\n{message}");
        }
        if let Some(events) = result.get("events").and_then(Value::as_array) {
            return format!("Found {} events\n{message}", events.len());
        }
        if result.get("timeline").is_some() {
            return format!("Timeline generated\n{message}");
        }
        if !message.is_empty() {
            return message.to_string();
        }
    }
    format_generic("life_event", result)
}

fn format_user_preference(result: &Value) -> String {
    let status = result.get("status").and_then(Value::as_str).unwrap_or("");
    let message = result.get("message").and_then(Value::as_str).unwrap_or("");

    if status == "success" {
        if let Some(prefs) = result.get("preferences").and_then(Value::as_object) {
            return format!("Retrieved {} preferences\n{message}", prefs.len());
        }
        if !message.is_empty() {
            return message.to_string();
        }
    }
    format_generic("user_preference", result)
}

fn format_clarify(result: &Value) -> String {
    let problematic = result
        .get("EMPATHY_ISSUE_DETECTED")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    let original = result.get("original_text").and_then(Value::as_str).unwrap_or("");
    let coaching = result
        .get("coaching_analysis")
        .and_then(Value::as_str)
        .unwrap_or("");
    let action = result
        .get("action_required")
        .and_then(Value::as_str)
        .unwrap_or("NONE");

    let mut parts = Vec::new();
    if problematic {
        parts.push("⚠️ EMPATHY COACHING REQUIRED!".to_string());
        parts.push(format!("\n📝 Original message: \"{original}\""));
        parts.push(format!("\n🚨 Action: {action}"));
        parts.push(format!("\n📖 Coaching analysis:\n{coaching}"));
        parts.push(
            "\n\n⛔ YOUR TASK: Explain why this message is hurtful and suggest a better way to communicate!"
                .to_string(),
        );
    } else {
        parts.push("✅ Message analyzed - no major issues detected".to_string());
        if !coaching.is_empty() {
            parts.push(format!("\n📖 Analysis:\n{coaching}"));
        }
    }
    parts.join("\n")
}

fn format_list(tool_name: &str, items: &[Value]) -> String {
    if items.is_empty() {
        return format!("No results from {tool_name}");
    }
    let lines: Vec<String> = items
        .iter()
        .take(5)
        .map(|item| match item {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
        .collect();
    format!("Results from {tool_name}:\n{}", lines.join("\n"))
}

fn format_generic(tool_name: &str, value: &Value) -> String {
    let Some(map) = value.as_object() else {
        return value.to_string();
    };
    if map.is_empty() {
        return format!("No data from {tool_name}");
    }

    // Status/message rows get a compact one-liner.
    if let (Some(status), Some(message)) = (
        map.get("status").and_then(Value::as_str),
        map.get("message").and_then(Value::as_str),
    ) {
        let mut out = format!("[{}] {message}", status.to_uppercase());
        if let Some(count) = map.get("count").and_then(Value::as_u64) {
            out.push_str(&format!("\nCount: {count}"));
        }
        return out;
    }

    let mut parts = vec![format!("Results from {tool_name}:")];
    for (key, value) in map.iter().take(5) {
        let mut rendered = match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        if rendered.len() > 100 {
            rendered = format!("{}...", truncate_at_boundary(&rendered, 100));
        }
        parts.push(format!("  • {key}: {rendered}"));
    }
    if map.len() > 5 {
        parts.push(format!("  ... and {} more fields", map.len() - 5));
    }
    parts.join("\n")
}

fn truncate(text: String, max: usize) -> String {
    if text.len() <= max {
        text
    } else {
        format!("{}...", truncate_at_boundary(&text, max - 3))
    }
}

/// Cut at a char boundary at or below `max` bytes.
fn truncate_at_boundary(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut end = max;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn error_outcome_names_the_tool() {
        let out = format_tool_result("web_search", &ToolOutcome::error("timeout"));
        assert_eq!(out, "Error from web_search: timeout");
    }

    #[test]
    fn web_search_shows_top_three() {
        let result = ToolOutcome::ok(json!({
            "query": "weather in Paris",
            "results_count": 4,
            "data": [
                {"title": "Weather Paris", "content": "15°C cloudy", "url": "https://a"},
                {"title": "Paris forecast", "content": "rain later", "url": "https://b"},
                {"title": "Meteo", "content": "wind 10kph", "url": "https://c"},
                {"title": "Extra", "content": "ignored", "url": "https://d"}
            ]
        }));
        let out = format_tool_result("web_search", &result);
        assert!(out.contains("Found 4 results for 'weather in Paris'"));
        assert!(out.contains("1. Weather Paris"));
        assert!(out.contains("15°C cloudy"));
        assert!(out.contains("... and 1 more results"));
        assert!(!out.contains("ignored"));
    }

    #[test]
    fn skill_evaluation_structure() {
        let result = ToolOutcome::ok(json!({
            "message": "Analyzed 1 message",
            "skills_updated": [
                {"skill": "empathy", "old_level": 3, "new_level": 4, "improved": true}
            ],
            "current_skills": {"empathy": 4, "clarity": 2},
            "message_analysis": {"detected_skills": [{"skill": "empathy"}]},
            "suggestions": ["Keep practicing empathetic phrases"]
        }));
        let out = format_tool_result("skill_evaluator", &result);
        assert!(out.contains("🎯 Skills Demonstrated:"));
        assert!(out.contains("✅ empathy: 3 → 4 (Improved!)"));
        assert!(out.contains("📊 Overall Skill Levels:"));
        assert!(out.contains("✨ Detected in your message: empathy"));
        assert!(out.contains("💡 Suggestions:"));
    }

    #[test]
    fn recall_shows_last_five_with_counts() {
        let messages: Vec<Value> = (0..8)
            .map(|i| json!({"role": "user", "content": format!("msg {i}")}))
            .collect();
        let result = ToolOutcome::ok(json!({
            "total_messages": 8,
            "general_chat_count": 2,
            "ai_conversation_count": 6,
            "data": messages
        }));
        let out = format_tool_result("recall_last_conversation", &result);
        assert!(out.contains("8 stored, 2 general / 6 ai"));
        assert!(out.contains("msg 7"));
        assert!(!out.contains("msg 2"));
    }

    #[test]
    fn clarify_flags_empathy_issue() {
        let result = ToolOutcome::ok(json!({
            "original_text": "shut up",
            "EMPATHY_ISSUE_DETECTED": true,
            "coaching_analysis": "Dismissive phrasing shuts down dialogue.",
            "action_required": "TEACH_BETTER_COMMUNICATION"
        }));
        let out = format_tool_result("clarify_communication", &result);
        assert!(out.contains("⚠️ EMPATHY COACHING REQUIRED!"));
        assert!(out.contains("shut up"));

        let ok_result = ToolOutcome::ok(json!({
            "original_text": "thanks!",
            "EMPATHY_ISSUE_DETECTED": false,
            "coaching_analysis": "",
            "action_required": "NONE"
        }));
        let out = format_tool_result("clarify_communication", &ok_result);
        assert!(out.contains("no major issues"));
    }

    #[test]
    fn generic_dict_caps_at_five_entries() {
        let result = ToolOutcome::ok(json!({
            "a": 1, "b": 2, "c": 3, "d": 4, "e": 5, "f": 6, "g": 7
        }));
        let out = format_tool_result("mystery_tool", &result);
        assert!(out.contains("Results from mystery_tool:"));
        assert!(out.contains("... and 2 more fields"));
    }

    #[test]
    fn plain_string_and_list_pass_through() {
        assert_eq!(
            format_tool_result("t", &ToolOutcome::ok(json!("already text"))),
            "already text"
        );
        let out = format_tool_result(
            "t",
            &ToolOutcome::ok(json!(["a", "b", "c", "d", "e", "f"])),
        );
        assert!(out.starts_with("Results from t:"));
        assert!(out.contains("e"));
        assert!(!out.contains("\nf"));
    }

    #[test]
    fn output_is_bounded() {
        let huge = "x".repeat(10_000);
        let out = format_tool_result("t", &ToolOutcome::ok(json!(huge)));
        assert!(out.len() <= MAX_FORMATTED_LEN);
        assert!(out.ends_with("..."));
    }

    #[test]
    fn multibyte_truncation_respects_boundaries() {
        let text = "é".repeat(2000);
        let out = format_tool_result("t", &ToolOutcome::ok(json!(text)));
        assert!(out.len() <= MAX_FORMATTED_LEN);
    }
}
