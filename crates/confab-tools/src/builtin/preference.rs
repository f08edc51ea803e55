use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tracing::debug;

use confab_store::Repository;

use crate::registry::{Tool, ToolOutcome};
use crate::schema::{FieldKind, ToolSchema};

/// Preference types whose string values are encrypted at rest with the
/// user's key.
const SENSITIVE_TYPES: &[&str] = &[
    "personal_info",
    "contact",
    "financial",
    "medical",
    "identification",
    "private",
];

pub fn is_sensitive_type(ptype: &str) -> bool {
    SENSITIVE_TYPES.contains(&ptype.to_lowercase().as_str())
}

/// Get/set/delete user preferences. Sensitive values are encrypted on the
/// way in and decrypted on the way out; the store only ever sees
/// ciphertext for those types.
pub struct UserPreferenceTool {
    repo: Arc<dyn Repository>,
}

impl UserPreferenceTool {
    pub fn new(repo: Arc<dyn Repository>) -> Self {
        Self { repo }
    }

    fn handle_get(&self, user_id: i64, ptype: Option<&str>) -> ToolOutcome {
        let key = match self.repo.ensure_encryption_key(user_id) {
            Ok(k) => k,
            Err(e) => return ToolOutcome::error(e.to_string()),
        };
        let records = match self.repo.get_preferences(user_id, ptype) {
            Ok(r) => r,
            Err(e) => return ToolOutcome::error(e.to_string()),
        };

        let mut prefs = Map::new();
        for record in records {
            let value = if is_sensitive_type(&record.ptype) {
                decrypt_value(&key, record.value)
            } else {
                record.value
            };
            prefs.insert(format!("{}.{}", record.ptype, record.key), value);
        }

        let total = prefs.len();
        ToolOutcome::ok(json!({
            "status": "success",
            "message": format!("Retrieved {total} preferences"),
            "preferences": prefs,
            "total": total,
        }))
    }

    fn handle_set(&self, user_id: i64, args: &Map<String, Value>) -> ToolOutcome {
        let Some(ptype) = args.get("preference_type").and_then(Value::as_str) else {
            return ToolOutcome::error("set requires preference_type");
        };
        let Some(key_name) = args.get("preference_key").and_then(Value::as_str) else {
            return ToolOutcome::error("set requires preference_key");
        };
        let Some(value) = args.get("preference_value") else {
            return ToolOutcome::error("set requires preference_value");
        };
        let confidence = args
            .get("confidence")
            .and_then(Value::as_f64)
            .unwrap_or(1.0);

        let stored = if is_sensitive_type(ptype) {
            match encrypt_value(&self.repo, user_id, value) {
                Ok(v) => v,
                Err(e) => return ToolOutcome::error(e),
            }
        } else {
            value.clone()
        };

        if let Err(e) = self
            .repo
            .set_preference(user_id, ptype, key_name, &stored, confidence)
        {
            return ToolOutcome::error(e.to_string());
        }
        debug!(user_id, ptype, key = key_name, "preference stored");
        ToolOutcome::ok(json!({
            "status": "success",
            "message": format!("Preference {ptype}.{key_name} saved"),
        }))
    }

    fn handle_delete(&self, user_id: i64, args: &Map<String, Value>) -> ToolOutcome {
        let ptype = args.get("preference_type").and_then(Value::as_str);
        let key = args.get("preference_key").and_then(Value::as_str);
        match self.repo.delete_preference(user_id, ptype, key) {
            Ok(removed) => ToolOutcome::ok(json!({
                "status": "success",
                "message": format!("Deleted {removed} preferences"),
                "count": removed,
            })),
            Err(e) => ToolOutcome::error(e.to_string()),
        }
    }
}

fn encrypt_value(
    repo: &Arc<dyn Repository>,
    user_id: i64,
    value: &Value,
) -> Result<Value, String> {
    // Only string values are encrypted; structured values stay plain.
    let Value::String(plain) = value else {
        return Ok(value.clone());
    };
    let key = repo
        .ensure_encryption_key(user_id)
        .map_err(|e| e.to_string())?;
    let ciphertext =
        confab_crypto::encrypt(&key, plain.as_bytes()).map_err(|e| e.to_string())?;
    Ok(Value::String(ciphertext))
}

fn decrypt_value(key: &str, value: Value) -> Value {
    let Value::String(s) = &value else {
        return value;
    };
    if !confab_crypto::is_encrypted(s) {
        return value;
    }
    match confab_crypto::decrypt(key, s) {
        Ok(bytes) => match String::from_utf8(bytes) {
            Ok(plain) => Value::String(plain),
            Err(_) => value,
        },
        // Wrong key or corrupt: surface the ciphertext rather than failing
        // the whole get.
        Err(_) => value,
    }
}

#[async_trait]
impl Tool for UserPreferenceTool {
    fn name(&self) -> &str {
        "user_preference"
    }

    fn description(&self) -> &str {
        "Get, set or delete user preferences. Sensitive data (personal info, \
         contact, financial, medical, identification, private) is \
         automatically encrypted at rest."
    }

    fn schema(&self) -> ToolSchema {
        ToolSchema::new()
            .required("action", FieldKind::String, "One of: get, set, delete")
            .required("user_id", FieldKind::Integer, "Id of the user")
            .optional(
                "preference_type",
                FieldKind::String,
                "Preference category (e.g. communication, personal_info)",
            )
            .optional("preference_key", FieldKind::String, "Preference key")
            .optional(
                "preference_value",
                FieldKind::String,
                "Value to store (set only)",
            )
            .optional_with_default(
                "confidence",
                FieldKind::Number,
                "How certain the value is, 0.0-1.0",
                json!(1.0),
            )
    }

    async fn execute(&self, args: Map<String, Value>) -> ToolOutcome {
        let action = args
            .get("action")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_lowercase();
        let Some(user_id) = args.get("user_id").and_then(Value::as_i64) else {
            return ToolOutcome::error("user_id is required");
        };

        match action.as_str() {
            "get" => self.handle_get(user_id, args.get("preference_type").and_then(Value::as_str)),
            "set" => self.handle_set(user_id, &args),
            "delete" => self.handle_delete(user_id, &args),
            other => ToolOutcome::error(format!(
                "unknown action '{other}'; expected get, set or delete"
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use confab_store::SqliteRepository;

    fn setup() -> (Arc<dyn Repository>, i64, UserPreferenceTool) {
        let repo = Arc::new(SqliteRepository::open_in_memory().unwrap());
        let user = repo.add_user("pref-user", None).unwrap();
        let dyn_repo: Arc<dyn Repository> = repo;
        let tool = UserPreferenceTool::new(Arc::clone(&dyn_repo));
        (dyn_repo, user.id, tool)
    }

    fn args(pairs: &[(&str, Value)]) -> Map<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[tokio::test]
    async fn set_then_get_plain_preference() {
        let (_repo, user_id, tool) = setup();
        let out = tool
            .execute(args(&[
                ("action", json!("set")),
                ("user_id", json!(user_id)),
                ("preference_type", json!("communication")),
                ("preference_key", json!("preferred_language")),
                ("preference_value", json!("German")),
            ]))
            .await;
        assert!(!out.is_error());

        match tool
            .execute(args(&[
                ("action", json!("get")),
                ("user_id", json!(user_id)),
                ("preference_type", json!("communication")),
            ]))
            .await
        {
            ToolOutcome::Ok(value) => {
                assert_eq!(
                    value["preferences"]["communication.preferred_language"],
                    json!("German")
                );
            }
            other => panic!("expected ok, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn sensitive_values_are_encrypted_at_rest_and_decrypted_on_get() {
        let (repo, user_id, tool) = setup();
        tool.execute(args(&[
            ("action", json!("set")),
            ("user_id", json!(user_id)),
            ("preference_type", json!("personal_info")),
            ("preference_key", json!("full_name")),
            ("preference_value", json!("Jane Doe")),
        ]))
        .await;

        // At rest: ciphertext.
        let raw = repo.get_preferences(user_id, Some("personal_info")).unwrap();
        let stored = raw[0].value.as_str().unwrap();
        assert!(confab_crypto::is_encrypted(stored));
        assert_ne!(stored, "Jane Doe");

        // Through the tool: plaintext.
        match tool
            .execute(args(&[
                ("action", json!("get")),
                ("user_id", json!(user_id)),
                ("preference_type", json!("personal_info")),
            ]))
            .await
        {
            ToolOutcome::Ok(value) => {
                assert_eq!(
                    value["preferences"]["personal_info.full_name"],
                    json!("Jane Doe")
                );
            }
            other => panic!("expected ok, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn delete_reports_count() {
        let (_repo, user_id, tool) = setup();
        tool.execute(args(&[
            ("action", json!("set")),
            ("user_id", json!(user_id)),
            ("preference_type", json!("ui")),
            ("preference_key", json!("theme")),
            ("preference_value", json!("dark")),
        ]))
        .await;

        match tool
            .execute(args(&[
                ("action", json!("delete")),
                ("user_id", json!(user_id)),
                ("preference_type", json!("ui")),
            ]))
            .await
        {
            ToolOutcome::Ok(value) => assert_eq!(value["count"], 1),
            other => panic!("expected ok, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unknown_action_is_an_error() {
        let (_repo, user_id, tool) = setup();
        let out = tool
            .execute(args(&[
                ("action", json!("merge")),
                ("user_id", json!(user_id)),
            ]))
            .await;
        assert!(out.is_error());
    }
}
