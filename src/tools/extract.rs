/*!
Tool-call extraction from free-form backend text.

This is a heuristic over natural-language output, not a contract with the backend. Patterns, in
order:
1. fenced shell blocks (```bash / sh / shell / zsh / console) -> `execute_command`, one call per block
2. inline single-backtick spans that look like a command -> `execute_command`
3. textual calls `name({...json...})` for the non-shell catalog tools -> that tool

Known limitations: missed calls are acceptable; prose in backticks is only executed when it is
command-shaped (see `looks_like_command`); the JSON in pattern 3 must be a single balanced object.
*/
use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::json;

use super::catalog::{EXECUTE_COMMAND, FUNCTION_CALL_TOOLS};

/// Upper bound of calls taken from one backend reply.
pub const MAX_CALLS: usize = 8;
const MAX_INLINE_CHARS: usize = 200;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedToolCall {
    pub name: String,
    /// Raw JSON arguments string.
    pub arguments: String,
}

static SHELL_FENCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)```(?:bash|sh|shell|zsh|console)[ \t]*\r?\n(.*?)```")
        .unwrap_or_else(|e| panic!("invalid fence pattern: {e}"))
});

static ANY_FENCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)```.*?```").unwrap_or_else(|e| panic!("invalid fence pattern: {e}"))
});

static INLINE_SPAN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"`([^`\n]{1,200})`").unwrap_or_else(|e| panic!("invalid inline pattern: {e}"))
});

static PROGRAM_TOKEN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:\./|/|~/)?[A-Za-z_][A-Za-z0-9_.+\-/]*$")
        .unwrap_or_else(|e| panic!("invalid program pattern: {e}"))
});

static FUNCTION_CALL: Lazy<Regex> = Lazy::new(|| {
    let names = FUNCTION_CALL_TOOLS.join("|");
    Regex::new(&format!(r"\b({names})\s*\("))
        .unwrap_or_else(|e| panic!("invalid function-call pattern: {e}"))
});

/// Heuristic for inline spans: the first word must look like a program name, and the span must
/// carry arguments, an explicit relative/absolute path, or be a git invocation.
pub fn looks_like_command(span: &str) -> bool {
    let s = span.trim();
    if s.is_empty() || s.chars().count() > MAX_INLINE_CHARS {
        return false;
    }
    let first = s.split_whitespace().next().unwrap_or_default();
    if !PROGRAM_TOKEN.is_match(first) {
        return false;
    }
    let has_args = s.contains(char::is_whitespace);
    let explicit_path = first.starts_with("./") || first.starts_with('/');
    let is_git = first == "git";
    has_args || explicit_path || is_git
}

fn shell_call(command: &str) -> ParsedToolCall {
    ParsedToolCall {
        name: EXECUTE_COMMAND.to_string(),
        arguments: json!({ "command": command }).to_string(),
    }
}

/// Strip console prompts (`$ `) from fenced block lines.
fn clean_block(body: &str) -> String {
    body.lines()
        .map(|l| l.strip_prefix("$ ").unwrap_or(l))
        .filter(|l| !l.trim().is_empty() && !l.trim_start().starts_with('#'))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Given the index just after `(`, return the balanced `{...}` object and the index after `)`.
fn balanced_object(text: &str, open_paren_end: usize) -> Option<(String, usize)> {
    let rest = &text[open_paren_end..];
    let trimmed = rest.trim_start();
    let lead = rest.len() - trimmed.len();
    if trimmed.starts_with(')') {
        return Some(("{}".to_string(), open_paren_end + lead + 1));
    }
    if !trimmed.starts_with('{') {
        return None;
    }
    let mut depth = 0usize;
    let mut in_str = false;
    let mut escaped = false;
    for (i, ch) in trimmed.char_indices() {
        if in_str {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_str = false;
            }
            continue;
        }
        match ch {
            '"' => in_str = true,
            '{' => depth += 1,
            '}' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    let obj = &trimmed[..=i];
                    let tail = &trimmed[i + 1..];
                    let tail_trim = tail.trim_start();
                    if !tail_trim.starts_with(')') {
                        return None;
                    }
                    let end = open_paren_end
                        + lead
                        + (i + 1)
                        + (tail.len() - tail_trim.len())
                        + 1;
                    return Some((obj.to_string(), end));
                }
            }
            _ => {}
        }
    }
    None
}

/// Extract candidate calls; `restrict` keeps only calls for that tool name.
pub fn extract_tool_calls(text: &str, restrict: Option<&str>) -> Vec<ParsedToolCall> {
    let mut found: Vec<ParsedToolCall> = Vec::new();

    for cap in SHELL_FENCE.captures_iter(text) {
        let body = clean_block(cap.get(1).map(|m| m.as_str()).unwrap_or_default());
        if !body.trim().is_empty() {
            found.push(shell_call(body.trim()));
        }
    }

    let prose = ANY_FENCE.replace_all(text, " ");
    for cap in INLINE_SPAN.captures_iter(&prose) {
        let span = cap.get(1).map(|m| m.as_str()).unwrap_or_default();
        if looks_like_command(span) {
            found.push(shell_call(span.trim()));
        }
    }

    let mut pos = 0usize;
    while let Some(m) = FUNCTION_CALL.captures_at(text, pos) {
        let whole = match m.get(0) {
            Some(w) => w,
            None => break,
        };
        let name = m.get(1).map(|g| g.as_str()).unwrap_or_default();
        match balanced_object(text, whole.end()) {
            Some((obj, end)) => {
                if serde_json::from_str::<serde_json::Value>(&obj).is_ok() {
                    found.push(ParsedToolCall {
                        name: name.to_string(),
                        arguments: obj,
                    });
                }
                pos = end;
            }
            None => pos = whole.end(),
        }
    }

    let mut seen = HashSet::new();
    found
        .into_iter()
        .filter(|c| restrict.map_or(true, |r| c.name == r))
        .filter(|c| seen.insert((c.name.clone(), c.arguments.clone())))
        .take(MAX_CALLS)
        .collect()
}
