use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::FutureExt;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use confab_providers::{ToolCall, ToolDefinition};

use crate::schema::{Dialect, ToolSchema};

/// Result of executing one tool: either a JSON payload or an error string.
/// Tool failures never escape as errors — the runtime folds them into the
/// conversation so the model can react.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolOutcome {
    Ok(Value),
    Error(String),
}

impl ToolOutcome {
    pub fn ok(value: Value) -> Self {
        ToolOutcome::Ok(value)
    }

    pub fn error(message: impl Into<String>) -> Self {
        ToolOutcome::Error(message.into())
    }

    pub fn is_error(&self) -> bool {
        matches!(self, ToolOutcome::Error(_))
    }
}

/// One dispatched call's result, tagged with the originating call id.
#[derive(Debug, Clone)]
pub struct ToolResult {
    pub call_id: String,
    pub name: String,
    pub outcome: ToolOutcome,
}

/// Trait all tools implement.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Unique name (e.g. "web_search").
    fn name(&self) -> &str;
    /// Human-readable description shown to the LLM.
    fn description(&self) -> &str;
    /// Argument schema; validated at registration.
    fn schema(&self) -> ToolSchema;
    /// Execute with already-validated arguments.
    async fn execute(&self, args: Map<String, Value>) -> ToolOutcome;
}

/// Named tool collection with registration-time schema validation and
/// ordered dispatch.
#[derive(Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. Fails on duplicate names or a malformed schema.
    pub fn register(&mut self, tool: Arc<dyn Tool>) -> Result<(), String> {
        let name = tool.name().to_string();
        if self.tools.contains_key(&name) {
            return Err(format!("duplicate tool: {name}"));
        }
        tool.schema().validate(&name)?;
        debug!(tool = %name, "tool registered");
        self.tools.insert(name, tool);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Tool>> {
        self.tools.values()
    }

    /// Render provider-shaped descriptors for the given dialect.
    pub fn definitions(&self, dialect: Dialect) -> Vec<ToolDefinition> {
        self.tools
            .values()
            .map(|t| ToolDefinition {
                name: t.name().to_string(),
                description: t.description().to_string(),
                input_schema: t.schema().to_json_schema(dialect),
            })
            .collect()
    }

    /// Execute calls in order. Unknown tools, validation failures, tool
    /// errors, and panics all become error results; dispatch never throws.
    pub async fn dispatch(&self, calls: &[ToolCall]) -> Vec<ToolResult> {
        let mut results = Vec::with_capacity(calls.len());

        for call in calls {
            let outcome = self.dispatch_one(call).await;
            if let ToolOutcome::Error(msg) = &outcome {
                warn!(tool = %call.name, err = %msg, "tool call failed");
            }
            results.push(ToolResult {
                call_id: call.id.clone(),
                name: call.name.clone(),
                outcome,
            });
        }

        results
    }

    async fn dispatch_one(&self, call: &ToolCall) -> ToolOutcome {
        let Some(tool) = self.get(&call.name) else {
            return ToolOutcome::error(format!(
                "Tool '{}' not found; available: {}",
                call.name,
                self.names().join(", ")
            ));
        };

        let args = match &call.arguments {
            Value::Object(map) => map.clone(),
            Value::Null => Map::new(),
            other => {
                return ToolOutcome::error(format!(
                    "arguments for '{}' must be an object, got {other}",
                    call.name
                ))
            }
        };

        let validated = match tool.schema().validate_args(&args) {
            Ok(v) => v,
            Err(e) => return ToolOutcome::error(format!("invalid arguments: {e}")),
        };

        debug!(tool = %call.name, "executing tool");
        match AssertUnwindSafe(tool.execute(validated)).catch_unwind().await {
            Ok(outcome) => outcome,
            Err(panic) => {
                let detail = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                ToolOutcome::error(format!("tool '{}' panicked: {detail}", call.name))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::FieldKind;
    use serde_json::json;

    struct Echo;

    #[async_trait]
    impl Tool for Echo {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "Echo the input back"
        }
        fn schema(&self) -> ToolSchema {
            ToolSchema::new().required("text", FieldKind::String, "Text to echo")
        }
        async fn execute(&self, args: Map<String, Value>) -> ToolOutcome {
            ToolOutcome::ok(json!({"echoed": args["text"]}))
        }
    }

    struct Panics;

    #[async_trait]
    impl Tool for Panics {
        fn name(&self) -> &str {
            "panics"
        }
        fn description(&self) -> &str {
            "Always panics"
        }
        fn schema(&self) -> ToolSchema {
            ToolSchema::new()
        }
        async fn execute(&self, _args: Map<String, Value>) -> ToolOutcome {
            panic!("boom");
        }
    }

    fn call(name: &str, args: Value) -> ToolCall {
        ToolCall {
            id: format!("call_{name}"),
            name: name.to_string(),
            arguments: args,
        }
    }

    #[tokio::test]
    async fn dispatch_runs_in_order_and_tags_ids() {
        let mut reg = ToolRegistry::new();
        reg.register(Arc::new(Echo)).unwrap();

        let results = reg
            .dispatch(&[
                call("echo", json!({"text": "one"})),
                call("echo", json!({"text": "two"})),
            ])
            .await;

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].call_id, "call_echo");
        assert_eq!(results[0].outcome, ToolOutcome::ok(json!({"echoed": "one"})));
        assert_eq!(results[1].outcome, ToolOutcome::ok(json!({"echoed": "two"})));
    }

    #[tokio::test]
    async fn unknown_tool_lists_available() {
        let mut reg = ToolRegistry::new();
        reg.register(Arc::new(Echo)).unwrap();

        let results = reg.dispatch(&[call("missing", json!({}))]).await;
        match &results[0].outcome {
            ToolOutcome::Error(msg) => {
                assert!(msg.contains("Tool 'missing' not found"));
                assert!(msg.contains("echo"));
            }
            other => panic!("expected error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn validation_failure_becomes_error_result() {
        let mut reg = ToolRegistry::new();
        reg.register(Arc::new(Echo)).unwrap();

        let results = reg.dispatch(&[call("echo", json!({}))]).await;
        assert!(results[0].outcome.is_error());
    }

    #[tokio::test]
    async fn panic_is_captured_not_propagated() {
        let mut reg = ToolRegistry::new();
        reg.register(Arc::new(Panics)).unwrap();

        let results = reg.dispatch(&[call("panics", json!({}))]).await;
        match &results[0].outcome {
            ToolOutcome::Error(msg) => assert!(msg.contains("boom")),
            other => panic!("expected error, got {other:?}"),
        }
    }

    #[test]
    fn duplicate_registration_rejected() {
        let mut reg = ToolRegistry::new();
        reg.register(Arc::new(Echo)).unwrap();
        assert!(reg.register(Arc::new(Echo)).is_err());
    }

    #[test]
    fn definitions_render_per_dialect() {
        let mut reg = ToolRegistry::new();
        reg.register(Arc::new(Echo)).unwrap();

        let defs = reg.definitions(Dialect::OpenAi);
        assert_eq!(defs.len(), 1);
        assert_eq!(defs[0].name, "echo");
        assert_eq!(defs[0].input_schema["properties"]["text"]["type"], "string");
    }
}
