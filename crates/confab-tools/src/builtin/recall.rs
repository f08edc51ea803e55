use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use confab_memory::MemoryManager;
use confab_store::Repository;

use crate::registry::{Tool, ToolOutcome};
use crate::schema::{FieldKind, ToolSchema};

/// Reads the caller's encrypted memory and returns the last N messages
/// plus bucket counts.
pub struct RecallConversationTool {
    repo: Arc<dyn Repository>,
}

impl RecallConversationTool {
    pub fn new(repo: Arc<dyn Repository>) -> Self {
        Self { repo }
    }
}

#[async_trait]
impl Tool for RecallConversationTool {
    fn name(&self) -> &str {
        "recall_last_conversation"
    }

    fn description(&self) -> &str {
        "Recall the user's recent conversation history from encrypted memory. \
         Use when the user asks about earlier messages or past sessions."
    }

    fn schema(&self) -> ToolSchema {
        ToolSchema::new()
            .required("user_id", FieldKind::Integer, "Id of the requesting user")
            .optional_with_default(
                "limit",
                FieldKind::Integer,
                "How many recent messages to return",
                json!(10),
            )
    }

    async fn execute(&self, args: Map<String, Value>) -> ToolOutcome {
        let Some(user_id) = args.get("user_id").and_then(Value::as_i64) else {
            return ToolOutcome::error("user_id is required");
        };
        let limit = args
            .get("limit")
            .and_then(Value::as_u64)
            .unwrap_or(10)
            .clamp(1, 50) as usize;

        let key = match self.repo.ensure_encryption_key(user_id) {
            Ok(key) => key,
            Err(e) => return ToolOutcome::error(format!("no memory for user {user_id}: {e}")),
        };

        let mut manager = MemoryManager::new(Arc::clone(&self.repo), user_id, key);
        let stats = match manager.stats() {
            Ok(s) => s,
            Err(e) => return ToolOutcome::error(e.to_string()),
        };
        let recent = match manager.recall(limit, None) {
            Ok(m) => m,
            Err(e) => return ToolOutcome::error(e.to_string()),
        };

        let data: Vec<Value> = recent
            .iter()
            .map(|m| {
                json!({
                    "role": m.role.to_string(),
                    "content": m.content,
                    "type": m.kind.to_string(),
                    "timestamp": m.timestamp,
                })
            })
            .collect();

        ToolOutcome::ok(json!({
            "status": "success",
            "user_id": user_id,
            "total_messages": stats.total_messages,
            "general_chat_count": stats.general_count,
            "ai_conversation_count": stats.ai_count,
            "returned_messages": data.len(),
            "data": data,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use confab_core::types::MessageKind;
    use confab_memory::StoredMessage;
    use confab_store::SqliteRepository;

    #[tokio::test]
    async fn recalls_recent_messages_with_counts() {
        let repo = Arc::new(SqliteRepository::open_in_memory().unwrap());
        let user = repo.add_user("recall-user", None).unwrap();
        let key = repo.ensure_encryption_key(user.id).unwrap();

        let mut mgr = MemoryManager::new(
            Arc::clone(&repo) as Arc<dyn Repository>,
            user.id,
            key,
        );
        for i in 0..4 {
            mgr.append(StoredMessage::user(format!("m{i}"), MessageKind::Ai))
                .unwrap();
        }
        mgr.flush().unwrap();

        let tool = RecallConversationTool::new(Arc::clone(&repo) as Arc<dyn Repository>);
        let mut args = Map::new();
        args.insert("user_id".to_string(), json!(user.id));
        args.insert("limit".to_string(), json!(2));

        match tool.execute(args).await {
            ToolOutcome::Ok(value) => {
                assert_eq!(value["total_messages"], 4);
                assert_eq!(value["ai_conversation_count"], 4);
                assert_eq!(value["returned_messages"], 2);
                assert_eq!(value["data"][1]["content"], "m3");
            }
            other => panic!("expected ok, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unknown_user_is_an_error_outcome() {
        let repo = Arc::new(SqliteRepository::open_in_memory().unwrap());
        let tool = RecallConversationTool::new(repo as Arc<dyn Repository>);
        let mut args = Map::new();
        args.insert("user_id".to_string(), json!(404));
        assert!(tool.execute(args).await.is_error());
    }
}
