use serde::{Deserialize, Serialize};

/// One row from the users table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: i64,
    pub username: String,
    pub preferred_language: Option<String>,
    /// Per-user sampling temperature override.
    pub temperature: Option<f64>,
    /// Base64 key material; present once `ensure_encryption_key` has run.
    pub encryption_key: Option<String>,
    pub created_at: String,
}

/// A stored user preference. `value` is an arbitrary JSON node; string
/// values of sensitive types arrive here already encrypted by the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreferenceRecord {
    pub user_id: i64,
    pub ptype: String,
    pub key: String,
    pub value: serde_json::Value,
    /// 0.0–1.0; how certain the writer was about the value.
    pub confidence: f64,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillRecord {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrainingStatus {
    Pending,
    Active,
    Completed,
}

impl std::fmt::Display for TrainingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TrainingStatus::Pending => write!(f, "pending"),
            TrainingStatus::Active => write!(f, "active"),
            TrainingStatus::Completed => write!(f, "completed"),
        }
    }
}

impl std::str::FromStr for TrainingStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TrainingStatus::Pending),
            "active" => Ok(TrainingStatus::Active),
            "completed" => Ok(TrainingStatus::Completed),
            other => Err(format!("unknown training status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingRecord {
    pub id: i64,
    pub user_id: i64,
    pub skill_id: i64,
    pub status: TrainingStatus,
    /// 0.0–1.0 fraction of the way to mastery.
    pub progress: f64,
    pub notes: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// A user life event tracked by the `life_event` tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifeEvent {
    pub id: i64,
    pub user_id: i64,
    pub title: String,
    pub event_type: String,
    /// ISO-8601 date of the event itself.
    pub date: String,
    pub description: Option<String>,
    pub emotional_impact: Option<String>,
    pub created_at: String,
}

/// Fields accepted when creating or updating a life event.
#[derive(Debug, Clone, Default)]
pub struct LifeEventInput {
    pub title: Option<String>,
    pub event_type: Option<String>,
    pub date: Option<String>,
    pub description: Option<String>,
    pub emotional_impact: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomMessage {
    pub id: i64,
    pub room_id: i64,
    pub user_id: i64,
    pub content: String,
    pub created_at: String,
}
