use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use confab_store::{LifeEventInput, Repository};

use crate::registry::{Tool, ToolOutcome};
use crate::schema::{FieldKind, ToolSchema};

/// CRUD plus timeline over user life events.
pub struct LifeEventTool {
    repo: Arc<dyn Repository>,
}

impl LifeEventTool {
    pub fn new(repo: Arc<dyn Repository>) -> Self {
        Self { repo }
    }

    fn input_from(args: &Map<String, Value>) -> LifeEventInput {
        LifeEventInput {
            title: args
                .get("title")
                .and_then(Value::as_str)
                .map(str::to_string),
            event_type: args
                .get("event_type")
                .and_then(Value::as_str)
                .map(str::to_string),
            date: args.get("date").and_then(Value::as_str).map(str::to_string),
            description: args
                .get("description")
                .and_then(Value::as_str)
                .map(str::to_string),
            emotional_impact: args
                .get("emotional_impact")
                .and_then(Value::as_str)
                .map(str::to_string),
        }
    }
}

fn event_json(event: &confab_store::LifeEvent) -> Value {
    json!({
        "id": event.id,
        "title": event.title,
        "event_type": event.event_type,
        "date": event.date,
        "description": event.description,
        "emotional_impact": event.emotional_impact,
    })
}

#[async_trait]
impl Tool for LifeEventTool {
    fn name(&self) -> &str {
        "life_event"
    }

    fn description(&self) -> &str {
        "Track important events in the user's life: add, get, update, \
         delete, list, or build a timeline."
    }

    fn schema(&self) -> ToolSchema {
        ToolSchema::new()
            .required(
                "action",
                FieldKind::String,
                "One of: add, get, update, delete, list, timeline",
            )
            .required("user_id", FieldKind::Integer, "Id of the user")
            .optional("event_id", FieldKind::Integer, "Event id (get/update/delete)")
            .optional("title", FieldKind::String, "Event title")
            .optional(
                "event_type",
                FieldKind::String,
                "Category, e.g. career, family, health",
            )
            .optional("date", FieldKind::String, "ISO-8601 event date")
            .optional("description", FieldKind::String, "Longer description")
            .optional(
                "emotional_impact",
                FieldKind::String,
                "How the event felt, e.g. positive, difficult",
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
        let event_id = args.get("event_id").and_then(Value::as_i64);

        match action.as_str() {
            "add" => match self.repo.add_life_event(user_id, &Self::input_from(&args)) {
                Ok(event) => ToolOutcome::ok(json!({
                    "status": "success",
                    "message": format!("Event '{}' recorded", event.title),
                    "event": event_json(&event),
                })),
                Err(e) => ToolOutcome::error(e.to_string()),
            },
            "get" => {
                let Some(id) = event_id else {
                    return ToolOutcome::error("get requires event_id");
                };
                match self.repo.get_life_event(user_id, id) {
                    Ok(Some(event)) => ToolOutcome::ok(json!({
                        "status": "success",
                        "message": "Event found",
                        "event": event_json(&event),
                    })),
                    Ok(None) => ToolOutcome::ok(json!({
                        "status": "error",
                        "message": format!("No event with id {id}"),
                    })),
                    Err(e) => ToolOutcome::error(e.to_string()),
                }
            }
            "update" => {
                let Some(id) = event_id else {
                    return ToolOutcome::error("update requires event_id");
                };
                match self
                    .repo
                    .update_life_event(user_id, id, &Self::input_from(&args))
                {
                    Ok(true) => ToolOutcome::ok(json!({
                        "status": "success",
                        "message": format!("Event {id} updated"),
                    })),
                    Ok(false) => ToolOutcome::ok(json!({
                        "status": "error",
                        "message": format!("No event with id {id}"),
                    })),
                    Err(e) => ToolOutcome::error(e.to_string()),
                }
            }
            "delete" => {
                let Some(id) = event_id else {
                    return ToolOutcome::error("delete requires event_id");
                };
                match self.repo.delete_life_event(user_id, id) {
                    Ok(true) => ToolOutcome::ok(json!({
                        "status": "success",
                        "message": format!("Event {id} deleted"),
                    })),
                    Ok(false) => ToolOutcome::ok(json!({
                        "status": "error",
                        "message": format!("No event with id {id}"),
                    })),
                    Err(e) => ToolOutcome::error(e.to_string()),
                }
            }
            "list" => {
                let event_type = args.get("event_type").and_then(Value::as_str);
                match self.repo.list_life_events(user_id, event_type) {
                    Ok(events) => ToolOutcome::ok(json!({
                        "status": "success",
                        "message": format!("Found {} events", events.len()),
                        "count": events.len(),
                        "events": events.iter().map(event_json).collect::<Vec<_>>(),
                    })),
                    Err(e) => ToolOutcome::error(e.to_string()),
                }
            }
            "timeline" => match self.repo.list_life_events(user_id, None) {
                Ok(events) => {
                    // Already date-ordered from the store.
                    let timeline: Vec<Value> = events
                        .iter()
                        .map(|e| {
                            json!({
                                "date": e.date,
                                "title": e.title,
                                "event_type": e.event_type,
                                "emotional_impact": e.emotional_impact,
                            })
                        })
                        .collect();
                    ToolOutcome::ok(json!({
                        "status": "success",
                        "message": format!("Timeline with {} events", timeline.len()),
                        "count": timeline.len(),
                        "timeline": timeline,
                    }))
                }
                Err(e) => ToolOutcome::error(e.to_string()),
            },
            other => ToolOutcome::error(format!(
                "unknown action '{other}'; expected add, get, update, delete, list or timeline"
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use confab_store::SqliteRepository;

    fn setup() -> (i64, LifeEventTool) {
        let repo = Arc::new(SqliteRepository::open_in_memory().unwrap());
        let user = repo.add_user("event-user", None).unwrap();
        (user.id, LifeEventTool::new(repo as Arc<dyn Repository>))
    }

    fn args(pairs: &[(&str, Value)]) -> Map<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[tokio::test]
    async fn add_list_timeline_flow() {
        let (user_id, tool) = setup();

        let out = tool
            .execute(args(&[
                ("action", json!("add")),
                ("user_id", json!(user_id)),
                ("title", json!("Moved to Berlin")),
                ("event_type", json!("life")),
                ("date", json!("2025-06-15")),
                ("emotional_impact", json!("exciting")),
            ]))
            .await;
        let event_id = match out {
            ToolOutcome::Ok(value) => value["event"]["id"].as_i64().unwrap(),
            other => panic!("expected ok, got {other:?}"),
        };

        match tool
            .execute(args(&[
                ("action", json!("get")),
                ("user_id", json!(user_id)),
                ("event_id", json!(event_id)),
            ]))
            .await
        {
            ToolOutcome::Ok(value) => assert_eq!(value["event"]["title"], "Moved to Berlin"),
            other => panic!("expected ok, got {other:?}"),
        }

        match tool
            .execute(args(&[
                ("action", json!("timeline")),
                ("user_id", json!(user_id)),
            ]))
            .await
        {
            ToolOutcome::Ok(value) => {
                assert_eq!(value["count"], 1);
                assert_eq!(value["timeline"][0]["date"], "2025-06-15");
            }
            other => panic!("expected ok, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_event_reports_error_status_not_failure() {
        let (user_id, tool) = setup();
        match tool
            .execute(args(&[
                ("action", json!("get")),
                ("user_id", json!(user_id)),
                ("event_id", json!(999)),
            ]))
            .await
        {
            ToolOutcome::Ok(value) => assert_eq!(value["status"], "error"),
            other => panic!("expected ok envelope, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn add_without_title_is_an_error() {
        let (user_id, tool) = setup();
        let out = tool
            .execute(args(&[
                ("action", json!("add")),
                ("user_id", json!(user_id)),
            ]))
            .await;
        assert!(out.is_error());
    }
}
