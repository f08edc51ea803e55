use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info};

use confab_core::types::Principal;
use confab_memory::{MemoryManager, MemoryError, TrainingEntry, TrainingPlan};
use confab_store::{Repository, TrainingStatus};

use crate::catalog::{default_trainings, next_milestone};

#[derive(Debug, Error)]
pub enum TrainingError {
    #[error("memory error: {0}")]
    Memory(#[from] MemoryError),

    #[error("store error: {0}")]
    Store(#[from] confab_store::StoreError),
}

type Result<T> = std::result::Result<T, TrainingError>;

/// Every-Nth-message skill evaluation cadence.
const EVALUATION_INTERVAL: u64 = 5;

/// Drives per-user training plans: enrollment on login, message counting,
/// progress updates from skill analyses, and logout persistence.
pub struct TrainingTracker {
    repo: Arc<dyn Repository>,
}

impl TrainingTracker {
    pub fn new(repo: Arc<dyn Repository>) -> Self {
        Self { repo }
    }

    /// Ensure the user has a training plan with the default trainings
    /// enrolled and active, then produce the login reminder string.
    pub fn on_login(
        &self,
        principal: &Principal,
        memory: &mut MemoryManager,
    ) -> Result<String> {
        let mut plan = memory
            .training_plan()?
            .unwrap_or_else(|| TrainingPlan::empty(principal.id));

        for spec in default_trainings() {
            let skill = self.repo.get_or_create_skill(spec.skill_name)?;
            let level = self.repo.get_skill_level(principal.id, skill.id)?;
            let progress = level as f64 / 10.0;

            let milestones = spec.milestone_list();
            let entry = plan
                .trainings
                .entry(spec.key.to_string())
                .or_insert_with(|| TrainingEntry {
                    skill_id: skill.id,
                    skill_name: spec.skill_name.to_string(),
                    current_level: level,
                    target_level: 10,
                    status: TrainingStatus::Active,
                    started_at: chrono::Utc::now().to_rfc3339(),
                    milestones: milestones.clone(),
                    next_milestone: None,
                });
            entry.current_level = level;
            entry.next_milestone = next_milestone(&entry.milestones, level);

            // Mirror into the relational row so reporting can see it.
            if self.repo.get_training(principal.id, skill.id)?.is_none() {
                self.repo.add_training(
                    principal.id,
                    skill.id,
                    TrainingStatus::Active,
                    progress,
                    Some(spec.description),
                )?;
                info!(user_id = principal.id, skill = spec.skill_name, "training enrolled");
            }
        }

        memory.set_training_plan(plan.clone())?;
        memory.flush()?;

        Ok(login_reminder(&principal.username, &plan))
    }

    /// Count one inbound user message. Returns the new count; the caller's
    /// flush persists it along with the turn.
    pub fn on_message(&self, memory: &mut MemoryManager) -> Result<u64> {
        let user_id = memory.user_id();
        let mut plan = memory
            .training_plan()?
            .unwrap_or_else(|| TrainingPlan::empty(user_id));
        plan.message_count += 1;
        let count = plan.message_count;
        memory.set_training_plan(plan)?;
        debug!(user_id, count, "training message counted");
        Ok(count)
    }

    /// True on every fifth message.
    pub fn should_evaluate(&self, message_count: u64) -> bool {
        message_count > 0 && message_count % EVALUATION_INTERVAL == 0
    }

    /// Apply a skill_evaluator analysis to the plan: levels, progress,
    /// next milestones, and completion status in the relational rows.
    pub fn on_progress(
        &self,
        memory: &mut MemoryManager,
        skill_analysis: &Value,
    ) -> Result<()> {
        let user_id = memory.user_id();
        let Some(mut plan) = memory.training_plan()? else {
            return Ok(());
        };

        let updates = skill_analysis
            .get("skills_updated")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        for update in updates {
            let Some(skill_name) = update.get("skill").and_then(Value::as_str) else {
                continue;
            };
            let Some(new_level) = update.get("new_level").and_then(Value::as_i64) else {
                continue;
            };

            for entry in plan.trainings.values_mut() {
                if entry.skill_name != skill_name {
                    continue;
                }
                entry.current_level = new_level;
                entry.next_milestone = next_milestone(&entry.milestones, new_level);
                let completed = new_level >= entry.target_level;
                if completed {
                    entry.status = TrainingStatus::Completed;
                }
                self.repo.update_training_status(
                    user_id,
                    entry.skill_id,
                    if completed {
                        TrainingStatus::Completed
                    } else {
                        TrainingStatus::Active
                    },
                    (new_level as f64 / 10.0).min(1.0),
                )?;
                info!(user_id, skill = skill_name, new_level, completed, "training progress");
            }
        }

        plan.last_progress_check = Some(chrono::Utc::now().to_rfc3339());
        memory.set_training_plan(plan)?;
        Ok(())
    }

    /// Stamp the logout, apply a final analysis when provided, and flush.
    pub fn on_logout(
        &self,
        memory: &mut MemoryManager,
        final_analysis: Option<&Value>,
    ) -> Result<()> {
        if let Some(analysis) = final_analysis {
            self.on_progress(memory, analysis)?;
        }
        let user_id = memory.user_id();
        let mut plan = memory
            .training_plan()?
            .unwrap_or_else(|| TrainingPlan::empty(user_id));
        plan.last_progress_check = Some(chrono::Utc::now().to_rfc3339());
        memory.set_training_plan(plan)?;
        memory.flush()?;
        Ok(())
    }
}

/// "Welcome back" message listing active trainings and next milestones.
pub fn login_reminder(username: &str, plan: &TrainingPlan) -> String {
    let active: Vec<&TrainingEntry> = plan
        .trainings
        .values()
        .filter(|t| t.status == TrainingStatus::Active)
        .collect();

    if active.is_empty() {
        return format!("Welcome back, {username}! 👋");
    }

    let mut parts = vec![format!("Welcome back, {username}! 🎯\n")];
    parts.push("\n**Your Active Trainings:**".to_string());
    for training in active {
        let name = title_case(&training.skill_name);
        match &training.next_milestone {
            Some(milestone) => parts.push(format!(
                "• **{name}**: Level {}/10 - Next: {milestone}",
                training.current_level
            )),
            None => parts.push(format!(
                "• **{name}**: Level {}/10 - 🎉 Almost mastered!",
                training.current_level
            )),
        }
    }
    parts.join("\n")
}

/// Training context block for the system prompt.
pub fn prompt_context(plan: &TrainingPlan) -> String {
    let active: Vec<&TrainingEntry> = plan
        .trainings
        .values()
        .filter(|t| t.status == TrainingStatus::Active)
        .collect();
    if active.is_empty() {
        return String::new();
    }

    let mut parts = vec!["\n🎯 **ACTIVE TRAINING PLAN**".to_string()];
    for training in &active {
        parts.push(format!(
            "• **{}** (Level {}/10)",
            title_case(&training.skill_name),
            training.current_level
        ));
        if let Some(milestone) = &training.next_milestone {
            parts.push(format!("  Next milestone: {milestone}"));
        }
    }
    parts.push(
        "\n**YOUR TRAINING APPROACH:**\n\
         - Provide subtle examples and hints (not explicit training instructions)\n\
         - Model good empathy and conversation skills in your responses\n\
         - Make training feel like natural, helpful conversation"
            .to_string(),
    );
    parts.join("\n")
}

fn title_case(skill: &str) -> String {
    skill
        .split('_')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().to_string() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use confab_store::SqliteRepository;
    use serde_json::json;

    fn setup() -> (Arc<dyn Repository>, Principal, MemoryManager, TrainingTracker) {
        let repo = Arc::new(SqliteRepository::open_in_memory().unwrap());
        let user = repo.add_user("trainee", Some("English")).unwrap();
        let key = repo.ensure_encryption_key(user.id).unwrap();
        let dyn_repo: Arc<dyn Repository> = repo;
        let memory = MemoryManager::new(Arc::clone(&dyn_repo), user.id, key);
        let tracker = TrainingTracker::new(Arc::clone(&dyn_repo));
        (dyn_repo, Principal::new(user.id, "trainee"), memory, tracker)
    }

    #[test]
    fn login_enrolls_default_trainings() {
        let (repo, principal, mut memory, tracker) = setup();
        let reminder = tracker.on_login(&principal, &mut memory).unwrap();

        assert!(reminder.contains("Welcome back, trainee"));
        assert!(reminder.contains("Empathy"));
        assert!(reminder.contains("Active Listening"));
        assert!(reminder.contains("Recognizing emotions in text"));

        let plan = memory.training_plan().unwrap().unwrap();
        assert_eq!(plan.trainings.len(), 2);
        assert_eq!(plan.trainings["empathy_training"].current_level, 0);

        let skill = repo.get_or_create_skill("empathy").unwrap();
        let training = repo.get_training(principal.id, skill.id).unwrap().unwrap();
        assert_eq!(training.status, TrainingStatus::Active);
    }

    #[test]
    fn login_is_idempotent() {
        let (_repo, principal, mut memory, tracker) = setup();
        tracker.on_login(&principal, &mut memory).unwrap();
        tracker.on_login(&principal, &mut memory).unwrap();
        let plan = memory.training_plan().unwrap().unwrap();
        assert_eq!(plan.trainings.len(), 2);
    }

    #[test]
    fn message_counting_and_evaluation_cadence() {
        let (_repo, principal, mut memory, tracker) = setup();
        tracker.on_login(&principal, &mut memory).unwrap();

        for expected in 1..=4u64 {
            let count = tracker.on_message(&mut memory).unwrap();
            assert_eq!(count, expected);
            assert!(!tracker.should_evaluate(count));
        }
        let count = tracker.on_message(&mut memory).unwrap();
        assert_eq!(count, 5);
        assert!(tracker.should_evaluate(count));
        assert!(!tracker.should_evaluate(0));
        assert!(tracker.should_evaluate(10));
    }

    #[test]
    fn progress_updates_levels_and_completion() {
        let (repo, principal, mut memory, tracker) = setup();
        tracker.on_login(&principal, &mut memory).unwrap();

        tracker
            .on_progress(
                &mut memory,
                &json!({
                    "skills_updated": [
                        {"skill": "empathy", "old_level": 2, "new_level": 3, "improved": true}
                    ]
                }),
            )
            .unwrap();

        let plan = memory.training_plan().unwrap().unwrap();
        let entry = &plan.trainings["empathy_training"];
        assert_eq!(entry.current_level, 3);
        assert_eq!(
            entry.next_milestone.as_deref(),
            Some("Responding with empathetic phrases")
        );
        assert_eq!(entry.status, TrainingStatus::Active);

        // Mastery completes the training.
        tracker
            .on_progress(
                &mut memory,
                &json!({
                    "skills_updated": [
                        {"skill": "empathy", "old_level": 9, "new_level": 10, "improved": true}
                    ]
                }),
            )
            .unwrap();
        let plan = memory.training_plan().unwrap().unwrap();
        let entry = &plan.trainings["empathy_training"];
        assert_eq!(entry.status, TrainingStatus::Completed);
        assert!(entry.next_milestone.is_none());

        let skill = repo.get_or_create_skill("empathy").unwrap();
        let row = repo.get_training(principal.id, skill.id).unwrap().unwrap();
        assert_eq!(row.status, TrainingStatus::Completed);
        assert!((row.progress - 1.0).abs() < 1e-9);
    }

    #[test]
    fn logout_applies_final_analysis_and_flushes() {
        let (repo, principal, mut memory, tracker) = setup();
        tracker.on_login(&principal, &mut memory).unwrap();
        tracker.on_message(&mut memory).unwrap();

        tracker
            .on_logout(
                &mut memory,
                Some(&json!({
                    "skills_updated": [
                        {"skill": "active_listening", "old_level": 0, "new_level": 1}
                    ]
                })),
            )
            .unwrap();

        // Reload from disk: the plan survived the flush.
        let key = repo.ensure_encryption_key(principal.id).unwrap();
        let mut fresh = MemoryManager::new(Arc::clone(&repo), principal.id, key);
        let plan = fresh.training_plan().unwrap().unwrap();
        assert_eq!(plan.message_count, 1);
        assert!(plan.last_progress_check.is_some());
        assert_eq!(plan.trainings["conversation_training"].current_level, 1);
    }

    #[test]
    fn prompt_context_lists_active_trainings() {
        let (_repo, principal, mut memory, tracker) = setup();
        tracker.on_login(&principal, &mut memory).unwrap();
        let plan = memory.training_plan().unwrap().unwrap();
        let ctx = prompt_context(&plan);
        assert!(ctx.contains("ACTIVE TRAINING PLAN"));
        assert!(ctx.contains("Empathy"));
        assert!(ctx.contains("Next milestone:"));
    }
}
