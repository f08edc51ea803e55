use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tracing::debug;

use confab_store::Repository;

use crate::registry::{Tool, ToolOutcome};
use crate::schema::{FieldKind, SimpleKind, ToolSchema};

/// Social skills and the phrases that demonstrate them. A match increments
/// the user's level by one, capped at 10.
const SKILL_KEYWORDS: &[(&str, &[&str])] = &[
    (
        "active_listening",
        &["i understand", "i hear you", "that makes sense"],
    ),
    (
        "empathy",
        &["i understand how you feel", "that must be"],
    ),
    ("clarity", &["let me explain", "to clarify"]),
    ("engagement", &["what do you think", "how about you"]),
];

const MAX_LEVEL: i64 = 10;

/// Detects demonstrated skills in user messages and advances skill levels.
pub struct SkillEvaluatorTool {
    repo: Arc<dyn Repository>,
}

impl SkillEvaluatorTool {
    pub fn new(repo: Arc<dyn Repository>) -> Self {
        Self { repo }
    }

    fn analyze(messages: &[String]) -> Vec<(String, Vec<String>)> {
        let mut detected: Vec<(String, Vec<String>)> = Vec::new();
        for (skill, keywords) in SKILL_KEYWORDS {
            let mut found = Vec::new();
            for message in messages {
                let lower = message.to_lowercase();
                for keyword in *keywords {
                    if lower.contains(keyword) && !found.contains(&keyword.to_string()) {
                        found.push(keyword.to_string());
                    }
                }
            }
            if !found.is_empty() {
                detected.push((skill.to_string(), found));
            }
        }
        detected
    }
}

#[async_trait]
impl Tool for SkillEvaluatorTool {
    fn name(&self) -> &str {
        "skill_evaluator"
    }

    fn description(&self) -> &str {
        "Evaluate social skills demonstrated in the user's messages and \
         update their skill levels. Called automatically every fifth message."
    }

    fn schema(&self) -> ToolSchema {
        ToolSchema::new()
            .required("user_id", FieldKind::Integer, "Id of the user to evaluate")
            .optional(
                "message",
                FieldKind::String,
                "A single message to analyze",
            )
            .optional(
                "messages",
                FieldKind::Array(SimpleKind::String),
                "A sequence of messages to analyze",
            )
            .optional_with_default(
                "cultural_context",
                FieldKind::String,
                "Cultural frame for the evaluation",
                json!("Western"),
            )
            .optional_with_default(
                "use_web_research",
                FieldKind::Boolean,
                "Whether to consult current research",
                json!(true),
            )
    }

    async fn execute(&self, args: Map<String, Value>) -> ToolOutcome {
        let Some(user_id) = args.get("user_id").and_then(Value::as_i64) else {
            return ToolOutcome::error("user_id is required");
        };

        // `message` is a single string, `messages` a sequence; both at once
        // is ambiguous and rejected.
        let single = args.get("message").and_then(Value::as_str);
        let many = args.get("messages").and_then(Value::as_array);
        let messages: Vec<String> = match (single, many) {
            (Some(_), Some(_)) => {
                return ToolOutcome::error(
                    "provide either 'message' or 'messages', not both",
                )
            }
            (Some(m), None) => vec![m.to_string()],
            (None, Some(list)) => list
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect(),
            (None, None) => {
                return ToolOutcome::error("provide 'message' or 'messages' to analyze")
            }
        };
        if messages.is_empty() {
            return ToolOutcome::error("no messages to analyze");
        }

        let detected = Self::analyze(&messages);
        let mut skills_updated = Vec::new();

        for (skill_name, keywords_found) in &detected {
            let skill = match self.repo.get_or_create_skill(skill_name) {
                Ok(s) => s,
                Err(e) => return ToolOutcome::error(e.to_string()),
            };
            let old_level = match self.repo.get_skill_level(user_id, skill.id) {
                Ok(l) => l,
                Err(e) => return ToolOutcome::error(e.to_string()),
            };
            let new_level = (old_level + 1).min(MAX_LEVEL);
            if new_level != old_level {
                if let Err(e) = self.repo.set_skill_level(user_id, skill.id, new_level) {
                    return ToolOutcome::error(e.to_string());
                }
            }
            debug!(user_id, skill = %skill_name, old_level, new_level, "skill evaluated");
            skills_updated.push(json!({
                "skill": skill_name,
                "skill_id": skill.id,
                "old_level": old_level,
                "new_level": new_level,
                "improved": new_level > old_level,
                "keywords_found": keywords_found,
            }));
        }

        let current_skills = match self.repo.get_user_skills(user_id) {
            Ok(map) => map,
            Err(e) => return ToolOutcome::error(e.to_string()),
        };

        let suggestions: Vec<String> = SKILL_KEYWORDS
            .iter()
            .filter(|(skill, _)| current_skills.get(*skill).copied().unwrap_or(0) < 5)
            .take(3)
            .map(|(skill, keywords)| {
                format!(
                    "Practice {}: try phrases like \"{}\"",
                    skill.replace('_', " "),
                    keywords.first().unwrap_or(&"")
                )
            })
            .collect();

        ToolOutcome::ok(json!({
            "status": "success",
            "message": format!(
                "Analyzed {} message(s), {} skill(s) demonstrated",
                messages.len(),
                detected.len()
            ),
            "skills_updated": skills_updated,
            "current_skills": current_skills,
            "message_analysis": {
                "detected_skills": detected
                    .iter()
                    .map(|(skill, keywords)| json!({
                        "skill": skill,
                        "keywords_found": keywords,
                    }))
                    .collect::<Vec<_>>(),
            },
            "suggestions": suggestions,
        }))
    }
}
