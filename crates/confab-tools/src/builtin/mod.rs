//! Built-in tools the agent assumes exist.

pub mod clarify;
pub mod format_output;
pub mod language;
pub mod life_event;
pub mod preference;
pub mod recall;
pub mod skill_eval;
pub mod web_search;

use std::sync::Arc;

use confab_store::Repository;

use crate::registry::ToolRegistry;

pub use clarify::{ClarifyCommunicationTool, ClarityAnalyzer};
pub use format_output::FormatOutputTool;
pub use language::SetLanguagePreferenceTool;
pub use life_event::LifeEventTool;
pub use preference::UserPreferenceTool;
pub use recall::RecallConversationTool;
pub use skill_eval::SkillEvaluatorTool;
pub use web_search::{
    DisabledSearchBackend, HttpSearchBackend, SearchBackend, SearchHit, WebSearchTool,
};

/// Register the full built-in tool set.
pub fn register_builtins(
    registry: &mut ToolRegistry,
    repo: Arc<dyn Repository>,
    search: Arc<dyn SearchBackend>,
    clarity: Option<Arc<dyn ClarityAnalyzer>>,
) -> Result<(), String> {
    registry.register(Arc::new(WebSearchTool::new(search)))?;
    registry.register(Arc::new(RecallConversationTool::new(Arc::clone(&repo))))?;
    registry.register(Arc::new(UserPreferenceTool::new(Arc::clone(&repo))))?;
    registry.register(Arc::new(SkillEvaluatorTool::new(Arc::clone(&repo))))?;
    registry.register(Arc::new(LifeEventTool::new(Arc::clone(&repo))))?;
    registry.register(Arc::new(ClarifyCommunicationTool::new(clarity)))?;
    registry.register(Arc::new(SetLanguagePreferenceTool::new(repo)))?;
    registry.register(Arc::new(FormatOutputTool))?;
    Ok(())
}
