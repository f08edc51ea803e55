/// Content fragments that identify internal monitoring prompts. Messages
/// containing any of these must never reach encrypted user memory.
const INTERNAL_PROMPT_MARKERS: &[&str] = &[
    "CONVERSATION MONITORING REQUEST",
    "INSTRUCTIONS:",
    "Should you intervene",
    "NO_INTERVENTION_NEEDED",
    "You are monitoring this conversation",
    "Analyze if intervention is needed",
];

/// Substring check against the marker list.
pub fn is_internal_prompt(content: &str) -> bool {
    INTERNAL_PROMPT_MARKERS
        .iter()
        .any(|marker| content.contains(marker))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_markers_trigger() {
        for marker in INTERNAL_PROMPT_MARKERS {
            assert!(is_internal_prompt(marker), "{marker} should trigger");
            assert!(
                is_internal_prompt(&format!("prefix {marker} suffix")),
                "{marker} should trigger as substring"
            );
        }
    }

    #[test]
    fn ordinary_content_passes() {
        assert!(!is_internal_prompt("Hello there"));
        assert!(!is_internal_prompt("Can you give me instructions for baking?"));
        assert!(!is_internal_prompt(""));
    }
}
