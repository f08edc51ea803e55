use confab_memory::Milestone;

/// A built-in training program: the plan key, the skill it advances, and
/// its milestone ladder.
pub struct TrainingSpec {
    pub key: &'static str,
    pub skill_name: &'static str,
    pub description: &'static str,
    pub milestones: &'static [(i64, &'static str)],
}

/// Trainings every user is enrolled in on first login.
pub fn default_trainings() -> &'static [TrainingSpec] {
    const EMPATHY_MILESTONES: &[(i64, &str)] = &[
        (2, "Recognizing emotions in text"),
        (4, "Responding with empathetic phrases"),
        (6, "Asking follow-up questions about feelings"),
        (8, "Providing emotional support naturally"),
        (10, "Mastery: Authentic empathetic communication"),
    ];
    const CONVERSATION_MILESTONES: &[(i64, &str)] = &[
        (2, "Using acknowledgment phrases"),
        (4, "Asking clarifying questions"),
        (6, "Summarizing what others said"),
        (8, "Building on others' ideas"),
        (10, "Mastery: Natural conversational flow"),
    ];

    const DEFAULTS: &[TrainingSpec] = &[
        TrainingSpec {
            key: "empathy_training",
            skill_name: "empathy",
            description: "Understanding and sharing feelings of others",
            milestones: EMPATHY_MILESTONES,
        },
        TrainingSpec {
            key: "conversation_training",
            skill_name: "active_listening",
            description: "Active listening and engaging conversation",
            milestones: CONVERSATION_MILESTONES,
        },
    ];
    DEFAULTS
}

impl TrainingSpec {
    pub fn milestone_list(&self) -> Vec<Milestone> {
        self.milestones
            .iter()
            .map(|(level, description)| Milestone {
                level: *level,
                description: description.to_string(),
            })
            .collect()
    }
}

/// First milestone strictly above the current level, if any.
pub fn next_milestone(milestones: &[Milestone], current_level: i64) -> Option<String> {
    milestones
        .iter()
        .find(|m| current_level < m.level)
        .map(|m| m.description.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_cover_empathy_and_listening() {
        let specs = default_trainings();
        assert_eq!(specs.len(), 2);
        assert_eq!(specs[0].skill_name, "empathy");
        assert_eq!(specs[1].skill_name, "active_listening");
        for spec in specs {
            assert_eq!(spec.milestones.last().unwrap().0, 10);
        }
    }

    #[test]
    fn next_milestone_walks_the_ladder() {
        let milestones = default_trainings()[0].milestone_list();
        assert_eq!(
            next_milestone(&milestones, 0).as_deref(),
            Some("Recognizing emotions in text")
        );
        assert_eq!(
            next_milestone(&milestones, 5).as_deref(),
            Some("Asking follow-up questions about feelings")
        );
        assert_eq!(next_milestone(&milestones, 10), None);
    }
}
