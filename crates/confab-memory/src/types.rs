use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use confab_core::types::{MessageKind, MessageRole};
use confab_store::TrainingStatus;

/// Default bucket bounds.
pub const DEFAULT_MAX_GENERAL: usize = 10;
pub const DEFAULT_MAX_AI: usize = 20;

const MEMORY_VERSION: &str = "1.0";

/// One message as stored inside the encrypted blob.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredMessage {
    pub role: MessageRole,
    pub content: String,
    #[serde(rename = "type", default)]
    pub kind: MessageKind,
    /// ISO-8601; auto-filled on append when absent.
    #[serde(default)]
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl StoredMessage {
    pub fn new(role: MessageRole, content: impl Into<String>, kind: MessageKind) -> Self {
        Self {
            role,
            content: content.into(),
            kind,
            timestamp: String::new(),
            user_id: None,
            room_id: None,
            tool_name: None,
            tool_call_id: None,
        }
    }

    pub fn user(content: impl Into<String>, kind: MessageKind) -> Self {
        Self::new(MessageRole::User, content, kind)
    }

    pub fn assistant(content: impl Into<String>, kind: MessageKind) -> Self {
        Self::new(MessageRole::Assistant, content, kind)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageCounts {
    pub general: usize,
    pub ai: usize,
    pub total: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryMetadata {
    pub created_at: String,
    pub last_updated: String,
    pub user_id: i64,
    pub version: String,
    #[serde(default)]
    pub message_counts: MessageCounts,
}

/// A milestone within a training ladder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Milestone {
    pub level: i64,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingEntry {
    pub skill_id: i64,
    pub skill_name: String,
    pub current_level: i64,
    #[serde(default = "default_target_level")]
    pub target_level: i64,
    pub status: TrainingStatus,
    pub started_at: String,
    #[serde(default)]
    pub milestones: Vec<Milestone>,
    /// Description of the first milestone above `current_level`.
    #[serde(default)]
    pub next_milestone: Option<String>,
}

fn default_target_level() -> i64 {
    10
}

/// Per-user training state, embedded (encrypted) in the memory blob.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingPlan {
    pub user_id: i64,
    pub created_at: String,
    #[serde(default)]
    pub message_count: u64,
    #[serde(default)]
    pub last_progress_check: Option<String>,
    #[serde(default)]
    pub trainings: BTreeMap<String, TrainingEntry>,
}

impl TrainingPlan {
    pub fn empty(user_id: i64) -> Self {
        Self {
            user_id,
            created_at: chrono::Utc::now().to_rfc3339(),
            message_count: 0,
            last_progress_check: None,
            trainings: BTreeMap::new(),
        }
    }
}

/// The decrypted shape of a user's memory blob.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryView {
    #[serde(default)]
    pub messages: Vec<StoredMessage>,
    #[serde(default)]
    pub general_chat: Vec<StoredMessage>,
    #[serde(default)]
    pub ai_conversation: Vec<StoredMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub training_plan: Option<TrainingPlan>,
    pub metadata: MemoryMetadata,
}

impl MemoryView {
    pub fn empty(user_id: i64) -> Self {
        let now = chrono::Utc::now().to_rfc3339();
        Self {
            messages: Vec::new(),
            general_chat: Vec::new(),
            ai_conversation: Vec::new(),
            training_plan: None,
            metadata: MemoryMetadata {
                created_at: now.clone(),
                last_updated: now,
                user_id,
                version: MEMORY_VERSION.to_string(),
                message_counts: MessageCounts::default(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stored_message_serde_uses_type_field() {
        let msg = StoredMessage::user("hi", MessageKind::Ai);
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "ai");
        assert_eq!(json["role"], "user");
        // Optional fields are omitted, matching legacy blobs.
        assert!(json.get("tool_name").is_none());
    }

    #[test]
    fn view_round_trips_with_training_plan() {
        let mut view = MemoryView::empty(7);
        view.training_plan = Some(TrainingPlan::empty(7));
        let json = serde_json::to_string(&view).unwrap();
        let back: MemoryView = serde_json::from_str(&json).unwrap();
        assert_eq!(back, view);
    }

    #[test]
    fn sparse_legacy_blob_parses_with_defaults() {
        let raw = r#"{
            "messages": [{"role": "user", "content": "hey"}],
            "metadata": {
                "created_at": "2024-11-12T00:00:00Z",
                "last_updated": "2024-11-12T00:00:00Z",
                "user_id": 1,
                "version": "1.0"
            }
        }"#;
        let view: MemoryView = serde_json::from_str(raw).unwrap();
        assert_eq!(view.messages.len(), 1);
        assert_eq!(view.messages[0].kind, MessageKind::Ai);
        assert!(view.general_chat.is_empty());
        assert!(view.training_plan.is_none());
    }
}
