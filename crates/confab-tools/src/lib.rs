//! Tool registry and runtime: schema-validated tools the agent may invoke,
//! provider-dialect descriptors, ordered dispatch, and human-readable
//! result formatting.

pub mod builtin;
pub mod format;
pub mod registry;
pub mod schema;

pub use format::format_tool_result;
pub use registry::{Tool, ToolOutcome, ToolRegistry, ToolResult};
pub use schema::{Dialect, FieldKind, FieldSpec, SimpleKind, ToolSchema};
