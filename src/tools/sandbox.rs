/*!
Tool sandbox: executes extracted calls against the workspace.

- Every call yields an `ExecutedToolCall`; failures land in `result` as `{"error","kind"}`.
- Shell: `sh -c` in the workspace root, own process group, hard deadline; `<<` is refused.
- Git: denylisted subcommands and repository-redirecting global options are refused before
  anything is spawned; aliases are refused after a `git config` lookup.
- Textual result fields are clipped to the configured ceiling.
*/
use std::path::PathBuf;
use std::time::Duration;

use serde_json::{json, Map, Value};

use crate::config::GatewayConfig;
use crate::errors::ToolError;
use crate::tools::catalog::ToolKind;
use crate::tools::extract::ParsedToolCall;
use crate::tools::workspace::Workspace;
use crate::util::exec::{ExecOutput, ExecRequest, ExecService};
use crate::util::id::tool_call_id;
use crate::util::{clip_text, shell_like_split_args};

pub const DEFAULT_GIT_DENYLIST: &[&str] = &[
    "push", "reset", "clean", "rebase", "checkout", "branch", "remote", "stash", "merge", "pull",
];

/// Global options accepted before the git subcommand; anything else there is refused.
const GIT_SAFE_GLOBALS: &[&str] = &[
    "--no-pager",
    "-P",
    "--no-optional-locks",
    "--literal-pathspecs",
    "--no-replace-objects",
];

const DEFAULT_MAX_READ_BYTES: usize = 256 * 1024;

#[derive(Debug, Clone)]
pub struct SandboxConfig {
    pub root: PathBuf,
    pub shell_timeout: Duration,
    pub git_timeout: Duration,
    pub git_program: String,
    pub git_denylist: Vec<String>,
    pub max_read_bytes: usize,
    pub max_output_chars: usize,
}

impl SandboxConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        SandboxConfig {
            root: root.into(),
            shell_timeout: Duration::from_secs(15),
            git_timeout: Duration::from_secs(30),
            git_program: "git".to_string(),
            git_denylist: DEFAULT_GIT_DENYLIST.iter().map(|s| s.to_string()).collect(),
            max_read_bytes: DEFAULT_MAX_READ_BYTES,
            max_output_chars: 4000,
        }
    }

    pub fn from_gateway(cfg: &GatewayConfig) -> Self {
        SandboxConfig {
            shell_timeout: cfg.shell_timeout,
            git_timeout: cfg.git_timeout,
            max_output_chars: cfg.max_tool_output_chars,
            ..SandboxConfig::new(&cfg.workspace)
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExecutedToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Value,
    pub result: Value,
    /// Bounded text appended to the visible chat reply.
    pub summary: String,
}

impl ExecutedToolCall {
    pub fn is_error(&self) -> bool {
        self.result.get("error").is_some()
    }

    /// OpenAI `tool_calls[]` entry, with the execution result attached.
    pub fn to_openai(&self) -> Value {
        json!({
            "id": self.id,
            "type": "function",
            "function": {
                "name": self.name,
                "arguments": self.arguments.to_string(),
            },
            "result": self.result,
        })
    }
}

#[derive(Debug, Clone)]
pub struct Sandbox {
    cfg: SandboxConfig,
    workspace: Workspace,
    exec: ExecService,
}

impl Sandbox {
    pub fn new(cfg: SandboxConfig) -> std::io::Result<Self> {
        let workspace = Workspace::new(&cfg.root)?;
        let exec = ExecService::new(cfg.shell_timeout);
        Ok(Sandbox {
            cfg,
            workspace,
            exec,
        })
    }

    pub fn root(&self) -> &std::path::Path {
        self.workspace.root()
    }

    pub fn execute(&self, call: &ParsedToolCall) -> ExecutedToolCall {
        let id = tool_call_id();
        let parsed: Result<Value, ToolError> = serde_json::from_str::<Value>(&call.arguments)
            .map_err(|e| ToolError::InvalidArguments(e.to_string()))
            .and_then(|v| match v {
                Value::Object(_) => Ok(v),
                _ => Err(ToolError::InvalidArguments("arguments must be a JSON object".into())),
            });

        let (arguments, outcome) = match parsed {
            Ok(args) => {
                let outcome = self.dispatch(&call.name, &args);
                (args, outcome)
            }
            Err(e) => (Value::String(call.arguments.clone()), Err(e)),
        };

        let result = match outcome {
            Ok(v) => clip_value(v, self.cfg.max_output_chars),
            Err(e) => {
                tracing::info!(tool = %call.name, kind = e.kind(), error = %e, "sandbox: tool call failed");
                e.to_result()
            }
        };
        let summary = summarize(&call.name, &arguments, &result, self.cfg.max_output_chars);
        ExecutedToolCall {
            id,
            name: call.name.clone(),
            arguments,
            result,
            summary,
        }
    }

    fn dispatch(&self, name: &str, args: &Value) -> Result<Value, ToolError> {
        let kind = ToolKind::from_name(name).ok_or_else(|| ToolError::UnknownTool(name.into()))?;
        tracing::debug!(tool = name, "sandbox: executing");
        match kind {
            ToolKind::Shell => self.run_shell(required_str(args, "command")?),
            ToolKind::ReadFile => self
                .workspace
                .read_file(required_str(args, "path")?, self.cfg.max_read_bytes),
            ToolKind::WriteFile => self.workspace.write_file(
                required_str(args, "path")?,
                required_str(args, "content")?,
            ),
            ToolKind::ListDirectory => {
                let path = optional_str(args, "path")?.unwrap_or(".");
                let recursive = match args.get("recursive") {
                    None | Some(Value::Null) => false,
                    Some(Value::Bool(b)) => *b,
                    Some(_) => {
                        return Err(ToolError::InvalidArguments(
                            "'recursive' must be a boolean".into(),
                        ))
                    }
                };
                self.workspace.list_directory(path, recursive)
            }
            ToolKind::Git => self.run_git(git_args(args)?),
            ToolKind::Analyze => self.workspace.analyze(),
        }
    }

    pub fn run_shell(&self, command: &str) -> Result<Value, ToolError> {
        let command = command.trim();
        if command.is_empty() {
            return Err(ToolError::InvalidArguments("command is empty".into()));
        }
        if command.contains("<<") {
            return Err(ToolError::Denied(
                "here-documents (<<) are not allowed in commands".into(),
            ));
        }
        let out = self
            .exec
            .run(
                ExecRequest::new("sh")
                    .arg("-c")
                    .arg(command)
                    .cwd(self.workspace.root())
                    .inherit_env(true)
                    .own_process_group(true)
                    .timeout(self.cfg.shell_timeout),
            )
            .map_err(|e| ToolError::Io(format!("{e:#}")))?;
        process_result(out, self.cfg.shell_timeout)
    }

    /// Reject before spawning anything.
    pub fn check_git_args(&self, args: &[String]) -> Result<usize, ToolError> {
        let sub_idx = args
            .iter()
            .position(|a| !a.starts_with('-'))
            .ok_or_else(|| ToolError::InvalidArguments("missing git subcommand".into()))?;
        for opt in &args[..sub_idx] {
            if !GIT_SAFE_GLOBALS.contains(&opt.as_str()) {
                return Err(ToolError::Denied(format!(
                    "git option {opt} is not allowed before the subcommand"
                )));
            }
        }
        let sub = args[sub_idx].to_ascii_lowercase();
        if self.cfg.git_denylist.iter().any(|d| *d == sub) {
            return Err(ToolError::Denied(format!(
                "git subcommand '{sub}' is not allowed"
            )));
        }
        Ok(sub_idx)
    }

    pub fn run_git(&self, args: Vec<String>) -> Result<Value, ToolError> {
        let sub_idx = self.check_git_args(&args)?;
        let sub = &args[sub_idx];

        let alias = self
            .exec
            .run(
                ExecRequest::new(&self.cfg.git_program)
                    .args(["config", "--get", &format!("alias.{sub}")])
                    .cwd(self.workspace.root())
                    .inherit_env(true)
                    .timeout(Duration::from_secs(5)),
            )
            .map_err(|e| ToolError::Io(format!("git is not available: {e:#}")))?;
        if alias.status.success() && !alias.stdout.trim().is_empty() {
            return Err(ToolError::Denied(format!(
                "git alias '{sub}' is not allowed"
            )));
        }

        let out = self
            .exec
            .run(
                ExecRequest::new(&self.cfg.git_program)
                    .arg("--no-pager")
                    .args(&args)
                    .cwd(self.workspace.root())
                    .inherit_env(true)
                    .env("GIT_TERMINAL_PROMPT", "0")
                    .own_process_group(true)
                    .timeout(self.cfg.git_timeout),
            )
            .map_err(|e| ToolError::Io(format!("{e:#}")))?;
        process_result(out, self.cfg.git_timeout)
    }
}

fn process_result(out: ExecOutput, timeout: Duration) -> Result<Value, ToolError> {
    if out.timed_out {
        let mut v = ToolError::Timeout {
            secs: timeout.as_secs().max(1),
        }
        .to_result();
        if let Value::Object(ref mut m) = v {
            m.insert("stdout".into(), Value::String(out.stdout));
            m.insert("stderr".into(), Value::String(out.stderr));
        }
        return Ok(v);
    }
    Ok(json!({
        "stdout": out.stdout,
        "stderr": out.stderr,
        "exit_code": out.exit_code(),
        "duration_ms": out.duration.as_millis() as u64,
    }))
}

fn required_str<'a>(args: &'a Value, key: &str) -> Result<&'a str, ToolError> {
    match args.get(key) {
        Some(Value::String(s)) => Ok(s),
        Some(_) => Err(ToolError::InvalidArguments(format!("'{key}' must be a string"))),
        None => Err(ToolError::InvalidArguments(format!("missing '{key}'"))),
    }
}

fn optional_str<'a>(args: &'a Value, key: &str) -> Result<Option<&'a str>, ToolError> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(_) => Err(ToolError::InvalidArguments(format!("'{key}' must be a string"))),
    }
}

/// `args` as a string array, or a single command-line string; a leading `git` is dropped.
fn git_args(args: &Value) -> Result<Vec<String>, ToolError> {
    let mut list = match args.get("args") {
        Some(Value::Array(items)) => items
            .iter()
            .map(|v| {
                v.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| ToolError::InvalidArguments("'args' must contain strings".into()))
            })
            .collect::<Result<Vec<_>, _>>()?,
        Some(Value::String(s)) => shell_like_split_args(s),
        Some(_) => {
            return Err(ToolError::InvalidArguments(
                "'args' must be an array of strings".into(),
            ))
        }
        None => return Err(ToolError::InvalidArguments("missing 'args'".into())),
    };
    if list.first().map(String::as_str) == Some("git") {
        list.remove(0);
    }
    if list.is_empty() {
        return Err(ToolError::InvalidArguments("missing git subcommand".into()));
    }
    Ok(list)
}

/// Clip every string in the value tree.
fn clip_value(v: Value, max_chars: usize) -> Value {
    match v {
        Value::String(s) => Value::String(clip_text(&s, max_chars)),
        Value::Array(items) => {
            Value::Array(items.into_iter().map(|i| clip_value(i, max_chars)).collect())
        }
        Value::Object(m) => Value::Object(
            m.into_iter()
                .map(|(k, v)| (k, clip_value(v, max_chars)))
                .collect::<Map<String, Value>>(),
        ),
        other => other,
    }
}

fn summarize(name: &str, arguments: &Value, result: &Value, max_chars: usize) -> String {
    let head = match (name, arguments) {
        (_, Value::Object(m)) if m.contains_key("command") => {
            format!("$ {}", m.get("command").and_then(Value::as_str).unwrap_or_default())
        }
        (_, Value::Object(m)) if m.contains_key("args") => {
            let shown = match m.get("args") {
                Some(Value::Array(a)) => a
                    .iter()
                    .filter_map(Value::as_str)
                    .collect::<Vec<_>>()
                    .join(" "),
                Some(Value::String(s)) => s.clone(),
                _ => String::new(),
            };
            format!("$ git {shown}")
        }
        _ => format!("{name}({arguments})"),
    };
    let body = if let Some(err) = result.get("error").and_then(Value::as_str) {
        format!("error: {err}")
    } else if result.get("stdout").is_some() {
        let stdout = result["stdout"].as_str().unwrap_or_default();
        let stderr = result["stderr"].as_str().unwrap_or_default();
        let mut s = stdout.trim_end().to_string();
        if !stderr.trim().is_empty() {
            if !s.is_empty() {
                s.push('\n');
            }
            s.push_str(stderr.trim_end());
        }
        format!("{s}\n(exit {})", result["exit_code"])
    } else if let Some(content) = result.get("content").and_then(Value::as_str) {
        content.to_string()
    } else {
        serde_json::to_string_pretty(result).unwrap_or_default()
    };
    clip_text(&format!("{head}\n{body}"), max_chars)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sandbox() -> (tempfile::TempDir, Sandbox) {
        let td = tempfile::tempdir().expect("tmpdir");
        let mut cfg = SandboxConfig::new(td.path());
        cfg.shell_timeout = Duration::from_millis(300);
        let sb = Sandbox::new(cfg).expect("sandbox");
        (td, sb)
    }

    fn call(name: &str, args: Value) -> ParsedToolCall {
        ParsedToolCall {
            name: name.to_string(),
            arguments: args.to_string(),
        }
    }

    #[test]
    fn test_invalid_json_arguments_are_data() {
        let (_td, sb) = sandbox();
        let r = sb.execute(&ParsedToolCall {
            name: "read_file".into(),
            arguments: "{not json".into(),
        });
        assert!(r.is_error());
        assert_eq!(r.result["kind"], "invalid_arguments");
        assert!(r.id.starts_with("call_"));
    }

    #[test]
    fn test_unknown_tool_is_data() {
        let (_td, sb) = sandbox();
        let r = sb.execute(&call("format_disk", json!({})));
        assert_eq!(r.result["kind"], "unknown_tool");
    }

    #[test]
    fn test_heredoc_rejected_without_running() {
        let (td, sb) = sandbox();
        let r = sb.execute(&call(
            "execute_command",
            json!({"command": "cat > pwned.txt <<EOF\nx\nEOF"}),
        ));
        assert_eq!(r.result["kind"], "denied");
        assert!(!td.path().join("pwned.txt").exists());
    }

    #[test]
    fn test_git_denylist_rejected_before_spawn() {
        let (_td, mut sb) = sandbox();
        // A git program that cannot exist proves nothing was spawned for the denied call.
        sb.cfg.git_program = "/nonexistent/git-binary".into();
        let r = sb.execute(&call("git_operation", json!({"args": ["push", "origin", "main"]})));
        assert_eq!(r.result["kind"], "denied");
        assert!(r.result["error"].as_str().unwrap().contains("push"));

        let r = sb.execute(&call("git_operation", json!({"args": ["-C", "/", "status"]})));
        assert_eq!(r.result["kind"], "denied");

        let r = sb.execute(&call("git_operation", json!({"args": "git Reset --hard"})));
        assert_eq!(r.result["kind"], "denied");
    }

    #[test]
    fn test_git_arg_shapes() {
        assert_eq!(
            git_args(&json!({"args": "git log -1 --oneline"})).unwrap(),
            vec!["log", "-1", "--oneline"]
        );
        assert!(git_args(&json!({"args": [1, 2]})).is_err());
        assert!(git_args(&json!({"args": []})).is_err());
    }

    #[test]
    fn test_write_outside_root_is_containment_error() {
        let (td, sb) = sandbox();
        let r = sb.execute(&call(
            "write_file",
            json!({"path": "../../etc/passwd", "content": "root::0:0::/:/bin/sh"}),
        ));
        assert_eq!(r.result["kind"], "containment");
        assert!(r.summary.contains("escapes workspace root"));
        assert!(!td.path().parent().unwrap().join("etc/passwd").exists());
    }

    #[test]
    fn test_clip_value_bounds_strings() {
        let v = clip_value(json!({"a": "x".repeat(50), "n": 3, "l": ["y".repeat(50)]}), 10);
        assert!(v["a"].as_str().unwrap().contains("[truncated 40 chars]"));
        assert_eq!(v["n"], 3);
        assert!(v["l"][0].as_str().unwrap().starts_with("yyyyyyyyyy…"));
    }

    #[cfg(unix)]
    #[test]
    fn test_shell_runs_in_workspace() {
        let (td, sb) = sandbox();
        std::fs::write(td.path().join("marker.txt"), "m").unwrap();
        let r = sb.execute(&call("execute_command", json!({"command": "ls; echo oops >&2; exit 4"})));
        assert_eq!(r.result["exit_code"], 4);
        assert!(r.result["stdout"].as_str().unwrap().contains("marker.txt"));
        assert_eq!(r.result["stderr"], "oops\n");
        assert!(r.summary.starts_with("$ ls;"));
        assert!(r.summary.ends_with("(exit 4)"));
    }

    #[cfg(unix)]
    #[test]
    fn test_shell_timeout_is_reported() {
        let (_td, sb) = sandbox();
        let started = std::time::Instant::now();
        let r = sb.execute(&call("execute_command", json!({"command": "sleep 20"})));
        assert_eq!(r.result["kind"], "timeout");
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
