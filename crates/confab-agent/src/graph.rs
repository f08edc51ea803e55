//! The fixed state machine driving one chat turn.
//!
//! ```text
//! START ─► DETECT_LANG? ─► ASSEMBLE ─► LLM_CALL ─► NORMALIZE ─┬─► TOOLS ─► ASSEMBLE
//!                                                             └─► PERSIST ─► END
//! ```
//!
//! ASSEMBLE and NORMALIZE are pure given their inputs; LLM_CALL and TOOLS
//! are the only non-deterministic nodes. Errors never escape to the
//! caller as failures of the turn — every user-visible problem becomes a
//! well-formed assistant message. The exceptions are authentication and
//! cancellation, which propagate.

use std::sync::Arc;

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use confab_core::config::{AgentConfig, MemoryConfig};
use confab_core::error::{ConfabError, Result};
use confab_core::observe::Observer;
use confab_core::types::{MessageKind, MessageRole, Principal};
use confab_memory::{MemoryManager, StoredMessage};
use confab_providers::{
    ChatMessage, ChatPrompt, ChatResponse, ProviderError, ProviderFamily, ProviderMux, ToolCall,
};
use confab_store::Repository;
use confab_tools::{format_tool_result, Dialect, ToolRegistry};
use confab_training::TrainingTracker;

use crate::detect::{self, AUTO_SAVE_THRESHOLD};
use crate::normalize;
use crate::prompt::{build_system_prompt, PromptInput};

/// Dependency graph for the agent; constructed once and shared.
pub struct AgentDeps {
    pub repo: Arc<dyn Repository>,
    pub mux: Arc<ProviderMux>,
    pub registry: Arc<ToolRegistry>,
    pub tracker: TrainingTracker,
    pub observer: Arc<dyn Observer>,
    pub agent_config: AgentConfig,
    pub memory_config: MemoryConfig,
}

/// What one completed turn hands back to the service layer.
#[derive(Debug)]
pub struct TurnOutcome {
    pub response_text: String,
    /// Names of tools invoked this turn, in first-use order, deduplicated.
    pub tools_used: Vec<String>,
    /// Provider that produced the final response, when an LLM was reached.
    pub provider: Option<String>,
    pub tokens_in: u32,
    pub tokens_out: u32,
    pub tool_loop_iterations: u32,
    pub rate_limit_waited_ms: u64,
}

enum Node {
    DetectLang,
    Assemble,
    LlmCall,
    Normalize,
    Tools,
    Persist,
}

struct TurnState {
    language: String,
    /// History plus everything produced this turn, in provider shape.
    messages: Vec<ChatMessage>,
    tool_loop_depth: u32,
    tools_used: Vec<String>,
    last_response: Option<ChatResponse>,
    last_family: ProviderFamily,
    provider: Option<String>,
    tokens_in: u32,
    tokens_out: u32,
    waited_ms: u64,
    /// Final assistant text once a node has decided it.
    final_text: Option<String>,
    /// Prompt built by ASSEMBLE, consumed by LLM_CALL.
    pending_prompt: Option<ChatPrompt>,
}

/// Execute one full agent turn for `principal`.
pub async fn run_turn(
    deps: &AgentDeps,
    principal: &Principal,
    text: &str,
    provider_pref: Option<&str>,
    cancel: Option<&CancellationToken>,
) -> Result<TurnOutcome> {
    let user = deps
        .repo
        .get_user(principal.id)
        .map_err(|e| ConfabError::Repository(e.to_string()))?
        .ok_or(ConfabError::UserNotFound { id: principal.id })?;

    let key = deps
        .repo
        .ensure_encryption_key(principal.id)
        .map_err(|e| ConfabError::Repository(e.to_string()))?;
    let mut memory = MemoryManager::with_limits(
        Arc::clone(&deps.repo),
        principal.id,
        key,
        deps.memory_config.max_general,
        deps.memory_config.max_ai,
    );

    let stored_language = preferred_language(deps, principal.id)
        .or(user.preferred_language.clone());

    let recalled = memory
        .recall(deps.agent_config.recall_window, Some(MessageKind::Ai))
        .map_err(|e| ConfabError::Repository(e.to_string()))?;

    let mut state = TurnState {
        language: stored_language.clone().unwrap_or_default(),
        messages: history_to_chat(&recalled),
        tool_loop_depth: 0,
        tools_used: Vec::new(),
        last_response: None,
        last_family: ProviderFamily::OpenAi,
        provider: None,
        tokens_in: 0,
        tokens_out: 0,
        waited_ms: 0,
        final_text: None,
        pending_prompt: None,
    };
    state.messages.push(ChatMessage::user(text));

    let mut node = if stored_language.is_none() {
        Node::DetectLang
    } else {
        Node::Assemble
    };

    loop {
        if let Some(token) = cancel {
            if token.is_cancelled() {
                memory.discard();
                return Err(ConfabError::Cancelled);
            }
        }

        node = match node {
            Node::DetectLang => {
                let op = deps.observer.operation_start("detect_lang");
                let detection =
                    detect::detect_language(&deps.mux, text, provider_pref, cancel).await;
                deps.observer.operation_end(op, detection.is_some());

                match detection {
                    Some(d) if d.confidence >= AUTO_SAVE_THRESHOLD => {
                        save_language(deps, principal.id, &d.language);
                        state.language = d.language;
                        Node::Assemble
                    }
                    Some(d) => {
                        // Low confidence: the confirmation question IS the
                        // response for this turn.
                        state.final_text = Some(detect::confirmation_message(&d.language));
                        state.language = "English".to_string();
                        Node::Persist
                    }
                    None => {
                        state.language = "English".to_string();
                        Node::Assemble
                    }
                }
            }

            Node::Assemble => {
                if state.language.is_empty() {
                    state.language = "English".to_string();
                }
                let family = deps
                    .mux
                    .primary_family(provider_pref)
                    .unwrap_or(ProviderFamily::OpenAi);
                let prompt =
                    assemble_prompt(deps, principal, &state, &recalled, &mut memory, family)?;
                state.pending_prompt = Some(prompt);
                Node::LlmCall
            }

            Node::LlmCall => {
                let prompt = state.pending_prompt.take().expect("set by ASSEMBLE");

                let op = deps.observer.operation_start("llm_call");
                let result = deps
                    .mux
                    .chat(&prompt, provider_pref, user.temperature, cancel)
                    .await;

                match result {
                    Ok(out) => {
                        deps.observer.operation_end(op, true);
                        state.tokens_in += out.response.tokens_in;
                        state.tokens_out += out.response.tokens_out;
                        state.waited_ms += out.waited.as_millis() as u64;
                        state.provider = Some(out.provider);
                        state.last_family = out.family;
                        state.last_response = Some(out.response);
                        Node::Normalize
                    }
                    Err(ProviderError::Cancelled) => {
                        deps.observer.operation_end(op, false);
                        memory.discard();
                        return Err(ConfabError::Cancelled);
                    }
                    Err(e) => {
                        deps.observer.operation_end(op, false);
                        deps.observer.anomaly("providers_exhausted", &e.to_string());
                        warn!(user_id = principal.id, err = %e, "no provider produced a response");
                        state.final_text = Some(format!(
                            "I'm sorry, I encountered an error: {e}. Please try again in a moment."
                        ));
                        Node::Persist
                    }
                }
            }

            Node::Normalize => {
                let response = state.last_response.take().expect("set by LLM_CALL");
                let mut response =
                    normalize::normalize_response(response, state.last_family, &state.language);

                if normalize::is_empty_response(&response.content, !response.tool_calls.is_empty())
                {
                    deps.observer.anomaly("empty_response", "synthesizing fallback");
                    response.content = empty_response_fallback(deps, &state).await;
                }

                let has_tools = !response.tool_calls.is_empty();
                state.last_response = Some(response);
                if has_tools {
                    Node::Tools
                } else {
                    let response = state.last_response.take().expect("just set");
                    state.final_text = Some(response.content);
                    Node::Persist
                }
            }

            Node::Tools => {
                let cap = deps.agent_config.effective_tool_loop_cap();
                if state.tool_loop_depth + 1 > cap {
                    deps.observer.anomaly(
                        "tool_loop_cap",
                        &format!("depth {} at cap {cap}", state.tool_loop_depth),
                    );
                    warn!(user_id = principal.id, cap, "tool loop cap reached");
                    state.final_text = Some(
                        "I'm sorry, I couldn't finish working through the tools for this \
                         request. Could you rephrase or simplify it?"
                            .to_string(),
                    );
                    Node::Persist
                } else {
                    let response = state.last_response.take().expect("set by NORMALIZE");
                    let calls = scope_calls_to_user(&deps.registry, response.tool_calls.clone(), principal.id);

                    // The assistant turn carrying the calls precedes results.
                    state
                        .messages
                        .push(ChatMessage::assistant_with_calls(response.content.clone(), calls.clone()));

                    let op = deps.observer.operation_start("tool_dispatch");
                    let results = deps.registry.dispatch(&calls).await;
                    deps.observer.operation_end(op, results.iter().all(|r| !r.outcome.is_error()));

                    for result in &results {
                        if !state.tools_used.contains(&result.name) {
                            state.tools_used.push(result.name.clone());
                        }
                        let formatted = format_tool_result(&result.name, &result.outcome);
                        state
                            .messages
                            .push(ChatMessage::tool(&result.call_id, &result.name, formatted));
                    }

                    state.tool_loop_depth += 1;
                    debug!(
                        user_id = principal.id,
                        depth = state.tool_loop_depth,
                        tools = ?state.tools_used,
                        "tool loop iteration complete"
                    );
                    Node::Assemble
                }
            }

            Node::Persist => {
                let final_text = state
                    .final_text
                    .clone()
                    .unwrap_or_else(|| "I'm sorry, I wasn't able to respond.".to_string());

                memory
                    .append(StoredMessage {
                        role: MessageRole::User,
                        content: text.to_string(),
                        kind: MessageKind::Ai,
                        timestamp: String::new(),
                        user_id: Some(principal.id),
                        room_id: None,
                        tool_name: None,
                        tool_call_id: None,
                    })
                    .map_err(|e| ConfabError::Repository(e.to_string()))?;
                memory
                    .append(StoredMessage::assistant(final_text.clone(), MessageKind::Ai))
                    .map_err(|e| ConfabError::Repository(e.to_string()))?;

                let count = deps
                    .tracker
                    .on_message(&mut memory)
                    .map_err(|e| ConfabError::Internal(e.to_string()))?;

                if deps.tracker.should_evaluate(count) {
                    run_scheduled_evaluation(deps, principal, text, &mut memory, &mut state).await;
                }

                memory
                    .flush()
                    .map_err(|e| ConfabError::Repository(e.to_string()))?;

                info!(
                    user_id = principal.id,
                    provider = state.provider.as_deref().unwrap_or("none"),
                    tools = state.tools_used.len(),
                    iterations = state.tool_loop_depth,
                    "turn complete"
                );

                return Ok(TurnOutcome {
                    response_text: final_text,
                    tools_used: state.tools_used,
                    provider: state.provider,
                    tokens_in: state.tokens_in,
                    tokens_out: state.tokens_out,
                    tool_loop_iterations: state.tool_loop_depth,
                    rate_limit_waited_ms: state.waited_ms,
                });
            }
        };
    }
}

fn assemble_prompt(
    deps: &AgentDeps,
    principal: &Principal,
    state: &TurnState,
    recalled: &[StoredMessage],
    memory: &mut MemoryManager,
    family: ProviderFamily,
) -> Result<ChatPrompt> {
    let preferences = deps
        .repo
        .get_preferences(principal.id, None)
        .unwrap_or_default();
    let training_plan = memory
        .training_plan()
        .map_err(|e| ConfabError::Repository(e.to_string()))?;

    let local = family.is_local();
    let system = build_system_prompt(&PromptInput {
        principal,
        language: &state.language,
        preferences: &preferences,
        recalled,
        training_plan: training_plan.as_ref(),
        registry: deps.registry.as_ref(),
        local,
    });

    // Local models get tools through the protocol block instead of native
    // definitions; everyone else gets their dialect's descriptors.
    let tools = if local {
        Vec::new()
    } else {
        let dialect = match family {
            ProviderFamily::Claude => Dialect::Claude,
            ProviderFamily::Gemini => Dialect::Gemini,
            _ => Dialect::OpenAi,
        };
        deps.registry.definitions(dialect)
    };

    Ok(ChatPrompt {
        system,
        messages: state.messages.clone(),
        tools,
    })
}

/// Override `user_id` on user-scoped tools with the authenticated
/// principal. The model never gets to pick whose data a tool touches.
fn scope_calls_to_user(
    registry: &ToolRegistry,
    mut calls: Vec<ToolCall>,
    user_id: i64,
) -> Vec<ToolCall> {
    for call in &mut calls {
        let takes_user = registry
            .get(&call.name)
            .map(|t| t.schema().get("user_id").is_some())
            .unwrap_or(false);
        if takes_user {
            if let Value::Object(args) = &mut call.arguments {
                args.insert("user_id".to_string(), Value::from(user_id));
            } else if call.arguments.is_null() {
                call.arguments = serde_json::json!({ "user_id": user_id });
            }
        }
    }
    calls
}

/// Fallback content for an empty LLM response: derive from the latest tool
/// result within the last three turn messages, else apologize.
async fn empty_response_fallback(deps: &AgentDeps, state: &TurnState) -> String {
    for message in state.messages.iter().rev().take(3) {
        if message.role == MessageRole::Tool {
            let tool = message.tool_name.as_deref().unwrap_or("tool");
            return format!("Based on the {tool} results:\n\n{}", message.content);
        }
    }

    if state.last_family.is_local() {
        if let Some(text) = generate_local_apology(deps, &state.language).await {
            return text;
        }
    }
    "I apologize, but I'm having trouble generating a response. Could you please \
     rephrase your question or try asking something else?"
        .to_string()
}

/// Ask the same (local) model for a short apology in the user's language.
async fn generate_local_apology(deps: &AgentDeps, language: &str) -> Option<String> {
    let prompt = ChatPrompt {
        system: format!(
            "You are a friendly assistant. Generate a SHORT, natural apology message in \
             {language}. Say you couldn't process the request properly and ask the user \
             to try again. Keep it under 30 words. No JSON, code, or special formatting."
        ),
        messages: vec![ChatMessage::user(format!(
            "Generate the error message in {language}."
        ))],
        tools: Vec::new(),
    };

    match deps.mux.chat(&prompt, None, None, None).await {
        Ok(out) => {
            let cleaned = normalize::strip_artifacts(&out.response.content);
            (cleaned.len() > 5).then_some(cleaned)
        }
        Err(e) => {
            warn!(err = %e, "apology generation failed");
            None
        }
    }
}

/// Every fifth message the skill evaluator runs synchronously as a tool
/// and its analysis feeds the training plan. Failures are logged, never
/// surfaced: the user's reply is already decided by this point.
async fn run_scheduled_evaluation(
    deps: &AgentDeps,
    principal: &Principal,
    text: &str,
    memory: &mut MemoryManager,
    state: &mut TurnState,
) {
    let mut user_messages: Vec<String> = memory
        .recall(10, Some(MessageKind::Ai))
        .unwrap_or_default()
        .iter()
        .filter(|m| m.role == MessageRole::User)
        .map(|m| m.content.clone())
        .collect();
    if user_messages.is_empty() {
        user_messages.push(text.to_string());
    }

    let call = ToolCall {
        id: format!("eval_{}", uuid::Uuid::new_v4()),
        name: "skill_evaluator".to_string(),
        arguments: serde_json::json!({
            "user_id": principal.id,
            "messages": user_messages,
        }),
    };

    let op = deps.observer.operation_start("scheduled_skill_evaluation");
    let results = deps.registry.dispatch(&[call]).await;
    let success = results
        .first()
        .map(|r| !r.outcome.is_error())
        .unwrap_or(false);
    deps.observer.operation_end(op, success);

    let Some(result) = results.into_iter().next() else {
        return;
    };
    match result.outcome {
        confab_tools::ToolOutcome::Ok(analysis) => {
            if !state.tools_used.contains(&result.name) {
                state.tools_used.push(result.name.clone());
            }
            if let Err(e) = deps.tracker.on_progress(memory, &analysis) {
                warn!(user_id = principal.id, err = %e, "training progress update failed");
            }
        }
        confab_tools::ToolOutcome::Error(e) => {
            warn!(user_id = principal.id, err = %e, "scheduled skill evaluation failed");
        }
    }
}

fn history_to_chat(recalled: &[StoredMessage]) -> Vec<ChatMessage> {
    recalled
        .iter()
        .filter(|m| matches!(m.role, MessageRole::User | MessageRole::Assistant))
        .map(|m| match m.role {
            MessageRole::User => ChatMessage::user(&m.content),
            _ => ChatMessage::assistant(&m.content),
        })
        .collect()
}

fn preferred_language(deps: &AgentDeps, user_id: i64) -> Option<String> {
    deps.repo
        .get_preferences(user_id, Some("communication"))
        .ok()?
        .into_iter()
        .find(|p| p.key == "preferred_language")
        .and_then(|p| p.value.as_str().map(str::to_string))
}

fn save_language(deps: &AgentDeps, user_id: i64, language: &str) {
    if let Err(e) = deps.repo.set_preference(
        user_id,
        "communication",
        "preferred_language",
        &serde_json::json!(language),
        AUTO_SAVE_THRESHOLD,
    ) {
        warn!(user_id, err = %e, "failed to persist detected language");
    }
    if let Err(e) = deps.repo.set_user_language(user_id, language) {
        warn!(user_id, err = %e, "failed to update user language");
    }
    info!(user_id, language, "detected language saved");
}
