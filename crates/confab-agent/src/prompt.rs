//! System prompt assembly for one agent turn.

use confab_core::types::Principal;
use confab_memory::{StoredMessage, TrainingPlan};
use confab_store::PreferenceRecord;
use confab_tools::ToolRegistry;

/// Everything ASSEMBLE needs to render the system prompt.
pub struct PromptInput<'a> {
    pub principal: &'a Principal,
    pub language: &'a str,
    pub preferences: &'a [PreferenceRecord],
    pub recalled: &'a [StoredMessage],
    pub training_plan: Option<&'a TrainingPlan>,
    pub registry: &'a ToolRegistry,
    /// True when the likely provider is a locally hosted model.
    pub local: bool,
}

pub fn build_system_prompt(input: &PromptInput<'_>) -> String {
    let mut out = String::new();

    if input.local {
        out.push_str(&mcp_protocol_block(input.language, input.registry));
        out.push_str("\n\n");
    }

    out.push_str(
        "You are a Social Skills Coach - warm, empathetic, and supportive. Help users \
         improve their communication skills in every interaction.\n",
    );
    out.push_str(&format!(
        "\nYou are talking to {} (user id {}). Respond in {}.\n",
        input.principal.username, input.principal.id, input.language
    ));

    let prefs = render_preferences(input.preferences);
    if !prefs.is_empty() {
        out.push_str("\n## Known preferences\n");
        out.push_str(&prefs);
    }

    if let Some(plan) = input.training_plan {
        let training = confab_training::prompt_context(plan);
        if !training.is_empty() {
            out.push('\n');
            out.push_str(&training);
            out.push('\n');
        }
    }

    if !input.recalled.is_empty() {
        out.push_str("\n## Recent conversation\n");
        for message in input.recalled {
            out.push_str(&format!("{}: {}\n", message.role, message.content));
        }
    }

    if !input.local && !input.registry.is_empty() {
        out.push_str(
            "\nUse the available tools when the user asks for current information, \
             past conversations, preferences, or skill feedback. Answer greetings \
             directly without tools.\n",
        );
    }

    out
}

fn render_preferences(preferences: &[PreferenceRecord]) -> String {
    let mut out = String::new();
    for pref in preferences.iter().take(10) {
        // Sensitive values are stored encrypted; never render ciphertext
        // (or the underlying secret) into the prompt.
        if let serde_json::Value::String(s) = &pref.value {
            if confab_crypto::is_encrypted(s) {
                continue;
            }
        }
        out.push_str(&format!("- {}.{}: {}\n", pref.ptype, pref.key, pref.value));
    }
    out
}

/// Structured protocol block for locally hosted models: tool docs plus the
/// strict JSON envelope they must answer with.
pub fn mcp_protocol_block(user_language: &str, registry: &ToolRegistry) -> String {
    let mut tools_doc = String::new();
    for tool in registry.iter() {
        tools_doc.push_str(&format!("**{}**: {}\n  Parameters:\n", tool.name(), tool.description()));
        let schema = tool.schema();
        if schema.fields().is_empty() {
            tools_doc.push_str("    (no parameters)\n");
        }
        for (name, spec) in schema.fields() {
            let marker = if spec.required { "*" } else { "" };
            tools_doc.push_str(&format!("    - {name}{marker}: {}\n", spec.description));
        }
        tools_doc.push('\n');
    }

    format!(
        r#"## TOOL PROTOCOL

### RESPONSE FORMAT:

Direct response (greetings, simple questions):
```json
{{"formatted_output": "Your coaching response in {user_language}", "tool_calls": []}}
```

Tool call needed:
```json
{{"formatted_output": null, "tool_calls": [{{"name": "tool_name", "arguments": {{}}}}]}}
```

### AVAILABLE TOOLS:
{tools_doc}
### RULES:
1. For greetings: respond directly with warmth, no tools
2. ONLY use tool names from the list above
3. Respond in **{user_language}**
4. If the user writes in a different language than {user_language}, call
   `set_language_preference` with the detected language"#
    )
}
