use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tracing::info;

use confab_store::Repository;

use crate::registry::{Tool, ToolOutcome};
use crate::schema::{FieldKind, ToolSchema};

/// Persists the user's preferred language, both as the canonical
/// `communication.preferred_language` preference and on the user row.
pub struct SetLanguagePreferenceTool {
    repo: Arc<dyn Repository>,
}

impl SetLanguagePreferenceTool {
    pub fn new(repo: Arc<dyn Repository>) -> Self {
        Self { repo }
    }
}

#[async_trait]
impl Tool for SetLanguagePreferenceTool {
    fn name(&self) -> &str {
        "set_language_preference"
    }

    fn description(&self) -> &str {
        "Save the user's preferred conversation language. Call when the user \
         writes in a different language than their stored preference, or \
         confirms a language change."
    }

    fn schema(&self) -> ToolSchema {
        ToolSchema::new()
            .required("user_id", FieldKind::Integer, "Id of the user")
            .required(
                "language",
                FieldKind::String,
                "Language name, e.g. English, German",
            )
            .optional_with_default(
                "confirmed",
                FieldKind::Boolean,
                "Whether the user confirmed the change",
                json!(true),
            )
    }

    async fn execute(&self, args: Map<String, Value>) -> ToolOutcome {
        let Some(user_id) = args.get("user_id").and_then(Value::as_i64) else {
            return ToolOutcome::error("user_id is required");
        };
        let language = args
            .get("language")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .trim()
            .to_string();
        if language.is_empty() {
            return ToolOutcome::error("language must not be empty");
        }
        let confirmed = args
            .get("confirmed")
            .and_then(Value::as_bool)
            .unwrap_or(true);

        if !confirmed {
            return ToolOutcome::ok(json!({
                "status": "success",
                "message": format!("Language '{language}' noted but not saved (unconfirmed)"),
                "saved": false,
            }));
        }

        if let Err(e) = self.repo.set_preference(
            user_id,
            "communication",
            "preferred_language",
            &json!(language),
            1.0,
        ) {
            return ToolOutcome::error(e.to_string());
        }
        if let Err(e) = self.repo.set_user_language(user_id, &language) {
            return ToolOutcome::error(e.to_string());
        }

        info!(user_id, language = %language, "preferred language saved");
        ToolOutcome::ok(json!({
            "status": "success",
            "message": format!("Preferred language set to {language}"),
            "saved": true,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use confab_store::SqliteRepository;

    #[tokio::test]
    async fn saves_preference_and_user_row() {
        let repo = Arc::new(SqliteRepository::open_in_memory().unwrap());
        let user = repo.add_user("lang-user", Some("English")).unwrap();
        let tool = SetLanguagePreferenceTool::new(Arc::clone(&repo) as Arc<dyn Repository>);

        let mut args = Map::new();
        args.insert("user_id".to_string(), json!(user.id));
        args.insert("language".to_string(), json!("German"));
        args.insert("confirmed".to_string(), json!(true));
        assert!(!tool.execute(args).await.is_error());

        let prefs = repo.get_preferences(user.id, Some("communication")).unwrap();
        assert_eq!(prefs[0].value, json!("German"));
        let row = repo.get_user(user.id).unwrap().unwrap();
        assert_eq!(row.preferred_language.as_deref(), Some("German"));
    }

    #[tokio::test]
    async fn unconfirmed_change_is_not_persisted() {
        let repo = Arc::new(SqliteRepository::open_in_memory().unwrap());
        let user = repo.add_user("lang-user2", Some("English")).unwrap();
        let tool = SetLanguagePreferenceTool::new(Arc::clone(&repo) as Arc<dyn Repository>);

        let mut args = Map::new();
        args.insert("user_id".to_string(), json!(user.id));
        args.insert("language".to_string(), json!("French"));
        args.insert("confirmed".to_string(), json!(false));

        match tool.execute(args).await {
            ToolOutcome::Ok(value) => assert_eq!(value["saved"], false),
            other => panic!("expected ok, got {other:?}"),
        }
        assert!(repo.get_preferences(user.id, Some("communication")).unwrap().is_empty());
    }
}
