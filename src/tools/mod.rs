//! Tool layer: static catalog, heuristic extraction from backend text, and the sandboxed executor.

pub mod catalog;
pub mod extract;
pub mod sandbox;
pub mod workspace;

pub use catalog::{catalog, catalog_json, lookup, ToolDefinition, ToolKind};
pub use extract::{extract_tool_calls, ParsedToolCall, MAX_CALLS};
pub use sandbox::{ExecutedToolCall, Sandbox, SandboxConfig, DEFAULT_GIT_DENYLIST};
pub use workspace::Workspace;
