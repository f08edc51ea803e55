use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::registry::{Tool, ToolOutcome};
use crate::schema::{FieldKind, ToolSchema};

/// Pretty-prints arbitrary data for display: JSON gets indented, lists
/// become bullet lines, everything else is cleaned text.
pub struct FormatOutputTool;

#[async_trait]
impl Tool for FormatOutputTool {
    fn name(&self) -> &str {
        "format_output"
    }

    fn description(&self) -> &str {
        "Format raw data (JSON, lists, text) into readable output for the user."
    }

    fn schema(&self) -> ToolSchema {
        ToolSchema::new()
            .required("data", FieldKind::String, "The raw data to format")
            .optional_with_default(
                "data_type",
                FieldKind::String,
                "One of: auto, json, list, text",
                serde_json::json!("auto"),
            )
    }

    async fn execute(&self, args: Map<String, Value>) -> ToolOutcome {
        let data = args
            .get("data")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let data_type = args
            .get("data_type")
            .and_then(Value::as_str)
            .unwrap_or("auto");

        let formatted = match data_type {
            "json" => format_json(&data).unwrap_or_else(|| data.clone()),
            "list" => format_list(&data),
            "text" => clean_text(&data),
            _ => {
                // auto: try JSON first, then list markers, then plain text.
                if let Some(pretty) = format_json(&data) {
                    pretty
                } else if data.lines().count() > 1 {
                    format_list(&data)
                } else {
                    clean_text(&data)
                }
            }
        };

        ToolOutcome::ok(Value::String(formatted))
    }
}

fn format_json(data: &str) -> Option<String> {
    let value: Value = serde_json::from_str(data.trim()).ok()?;
    if value.is_object() || value.is_array() {
        serde_json::to_string_pretty(&value).ok()
    } else {
        None
    }
}

fn format_list(data: &str) -> String {
    data.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(|l| {
            if l.starts_with('-') || l.starts_with('•') {
                l.to_string()
            } else {
                format!("• {l}")
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn clean_text(data: &str) -> String {
    let mut out = data.trim().to_string();
    while out.contains("\n\n\n") {
        out = out.replace("\n\n\n", "\n\n");
    }
    out
}
