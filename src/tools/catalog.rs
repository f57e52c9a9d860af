/*!
Static tool catalog: the closed set of sandboxed capabilities, in OpenAI function-schema shape.

Built once on first use; never mutated afterwards.
*/
use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use serde::Serialize;
use serde_json::{json, Value};

pub const EXECUTE_COMMAND: &str = "execute_command";
pub const READ_FILE: &str = "read_file";
pub const WRITE_FILE: &str = "write_file";
pub const LIST_DIRECTORY: &str = "list_directory";
pub const GIT_OPERATION: &str = "git_operation";
pub const ANALYZE_PROJECT: &str = "analyze_project";

/// Tool names the extractor accepts in `name({...})` textual call syntax.
pub const FUNCTION_CALL_TOOLS: &[&str] = &[
    READ_FILE,
    WRITE_FILE,
    LIST_DIRECTORY,
    GIT_OPERATION,
    ANALYZE_PROJECT,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolKind {
    Shell,
    ReadFile,
    WriteFile,
    ListDirectory,
    Git,
    Analyze,
}

impl ToolKind {
    pub fn from_name(name: &str) -> Option<ToolKind> {
        match name {
            EXECUTE_COMMAND => Some(ToolKind::Shell),
            READ_FILE => Some(ToolKind::ReadFile),
            WRITE_FILE => Some(ToolKind::WriteFile),
            LIST_DIRECTORY => Some(ToolKind::ListDirectory),
            GIT_OPERATION => Some(ToolKind::Git),
            ANALYZE_PROJECT => Some(ToolKind::Analyze),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ParamSpec {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub description: &'static str,
    #[serde(rename = "enum", skip_serializing_if = "Option::is_none")]
    pub enum_values: Option<Vec<&'static str>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub items: Option<Value>,
}

impl ParamSpec {
    fn new(kind: &'static str, description: &'static str) -> Self {
        ParamSpec {
            kind,
            description,
            enum_values: None,
            items: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ToolDefinition {
    pub name: &'static str,
    pub description: &'static str,
    pub parameters: BTreeMap<&'static str, ParamSpec>,
    pub required: Vec<&'static str>,
}

impl ToolDefinition {
    /// `{"type":"function","function":{...}}` as served on /v1/tools.
    pub fn to_openai(&self) -> Value {
        json!({
            "type": "function",
            "function": {
                "name": self.name,
                "description": self.description,
                "parameters": {
                    "type": "object",
                    "properties": self.parameters,
                    "required": self.required,
                }
            }
        })
    }
}

static CATALOG: Lazy<Vec<ToolDefinition>> = Lazy::new(|| {
    let mut list_items = ParamSpec::new("array", "Arguments passed to git, without the leading 'git'");
    list_items.items = Some(json!({ "type": "string" }));
    vec![
        ToolDefinition {
            name: EXECUTE_COMMAND,
            description: "Run a single shell command in the workspace directory (15s limit)",
            parameters: BTreeMap::from([(
                "command",
                ParamSpec::new("string", "Command line to run with sh -c"),
            )]),
            required: vec!["command"],
        },
        ToolDefinition {
            name: READ_FILE,
            description: "Read a text file inside the workspace",
            parameters: BTreeMap::from([(
                "path",
                ParamSpec::new("string", "Path relative to the workspace root"),
            )]),
            required: vec!["path"],
        },
        ToolDefinition {
            name: WRITE_FILE,
            description: "Write a text file inside the workspace, creating parent directories",
            parameters: BTreeMap::from([
                (
                    "path",
                    ParamSpec::new("string", "Path relative to the workspace root"),
                ),
                ("content", ParamSpec::new("string", "Full file contents")),
            ]),
            required: vec!["path", "content"],
        },
        ToolDefinition {
            name: LIST_DIRECTORY,
            description: "List entries of a directory inside the workspace",
            parameters: BTreeMap::from([
                (
                    "path",
                    ParamSpec::new("string", "Directory relative to the workspace root (default '.')"),
                ),
                (
                    "recursive",
                    ParamSpec::new("boolean", "Descend into subdirectories"),
                ),
            ]),
            required: vec![],
        },
        ToolDefinition {
            name: GIT_OPERATION,
            description: "Run a read-mostly git command in the workspace (push, reset, checkout and other mutating subcommands are refused)",
            parameters: BTreeMap::from([("args", list_items)]),
            required: vec!["args"],
        },
        ToolDefinition {
            name: ANALYZE_PROJECT,
            description: "Count source files, lines and package manifests in the workspace",
            parameters: BTreeMap::new(),
            required: vec![],
        },
    ]
});

pub fn catalog() -> &'static [ToolDefinition] {
    &CATALOG
}

pub fn lookup(name: &str) -> Option<&'static ToolDefinition> {
    CATALOG.iter().find(|t| t.name == name)
}

/// Catalog rendered as a JSON array.
pub fn catalog_json() -> Value {
    Value::Array(CATALOG.iter().map(ToolDefinition::to_openai).collect())
}
