/*!
Chat completions: request decoding, prompt resolution, backend invocation under the deadline
supervisor, tool-call processing, and the two reply shapes (one JSON object, or an SSE stream).

Protocol errors (bad JSON, no user prompt) are answered before any stream header is written, so
they are always plain JSON envelopes. Once a stream has started, backend failures become an SSE
error event followed by `data: [DONE]`.
*/
use std::io::Write;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use serde::Deserialize;
use serde_json::{json, Value};

use super::handlers::Reply;
use super::http::HttpRequest;
use super::response::{Response, SseWriter};
use super::server::GatewayState;
use crate::errors::GatewayError;
use crate::supervisor::Deadline;
use crate::tools::{extract_tool_calls, ExecutedToolCall};
use crate::trace::TraceBuilder;
use crate::util::id::{completion_id, unix_now};
use crate::util::word_count;

pub const SUMMARIZED_MARKER: &str = "[Summarized]";
/// Upper bound on the total pacing delay of one stream.
const MAX_TOTAL_PACING: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Deserialize)]
pub struct ChatCompletionRequest {
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub stream: Option<bool>,
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub tools: Option<Vec<Value>>,
    #[serde(default)]
    pub tool_choice: Option<ToolChoice>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    #[serde(default)]
    pub content: Option<MessageContent>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContentPart {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub text: Option<String>,
}

impl MessageContent {
    /// Plain text; only `text` parts contribute, joined by newlines.
    pub fn text(&self) -> String {
        match self {
            MessageContent::Text(s) => s.clone(),
            MessageContent::Parts(parts) => parts
                .iter()
                .filter(|p| p.kind == "text")
                .filter_map(|p| p.text.as_deref())
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "RawToolChoice")]
pub enum ToolChoice {
    None,
    Auto,
    Required,
    Function(String),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawToolChoice {
    Mode(String),
    Function { function: FunctionName },
}

#[derive(Deserialize)]
struct FunctionName {
    name: String,
}

impl TryFrom<RawToolChoice> for ToolChoice {
    type Error = String;

    fn try_from(raw: RawToolChoice) -> Result<Self, Self::Error> {
        match raw {
            RawToolChoice::Mode(m) => match m.as_str() {
                "none" => Ok(ToolChoice::None),
                "auto" => Ok(ToolChoice::Auto),
                "required" => Ok(ToolChoice::Required),
                other => Err(format!("unknown tool_choice '{other}'")),
            },
            RawToolChoice::Function { function } => Ok(ToolChoice::Function(function.name)),
        }
    }
}

/// Whether extracted tool calls run, and for which tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolPolicy {
    Disabled,
    Enabled { only: Option<String> },
}

impl ChatCompletionRequest {
    pub fn parse(body: &[u8]) -> Result<Self, GatewayError> {
        Ok(serde_json::from_slice(body)?)
    }

    pub fn wants_stream(&self) -> bool {
        self.stream.unwrap_or(false)
    }

    /// Text of the most recent user message that has any.
    pub fn resolve_prompt(&self) -> Result<String, GatewayError> {
        self.messages
            .iter()
            .rev()
            .filter(|m| m.role == "user")
            .filter_map(|m| m.content.as_ref().map(MessageContent::text))
            .find(|t| !t.trim().is_empty())
            .ok_or_else(|| GatewayError::BadRequest("no user message with text content".into()))
    }

    pub fn tool_policy(&self) -> ToolPolicy {
        let offered = self.tools.as_ref().is_some_and(|t| !t.is_empty());
        if !offered {
            return ToolPolicy::Disabled;
        }
        match &self.tool_choice {
            Some(ToolChoice::None) => ToolPolicy::Disabled,
            Some(ToolChoice::Function(name)) => ToolPolicy::Enabled {
                only: Some(name.clone()),
            },
            Some(ToolChoice::Auto) | Some(ToolChoice::Required) | None => {
                ToolPolicy::Enabled { only: None }
            }
        }
    }
}

/// Cut to `max_chars` characters and mark the cut.
pub fn truncate_prompt(prompt: &str, max_chars: usize) -> String {
    match prompt.char_indices().nth(max_chars) {
        None => prompt.to_string(),
        Some((cut, _)) => format!("{}\n\n{SUMMARIZED_MARKER}", &prompt[..cut]),
    }
}

/// Split into word-level pieces, each carrying its leading whitespace, so that concatenating
/// the pieces gives back the input exactly.
pub fn segment_words(text: &str) -> Vec<&str> {
    let mut pieces = Vec::new();
    let mut start = 0usize;
    let mut prev_ws = true;
    for (i, ch) in text.char_indices() {
        let ws = ch.is_whitespace();
        if ws && !prev_ws && i > start {
            pieces.push(&text[start..i]);
            start = i;
        }
        prev_ws = ws;
    }
    if start < text.len() {
        pieces.push(&text[start..]);
    }
    pieces
}

fn pacing_delay(configured: Duration, pieces: usize) -> Duration {
    if pieces == 0 {
        return configured;
    }
    configured.min(MAX_TOTAL_PACING / pieces as u32)
}

/// Run the backend under the deadline supervisor; `on_tick` runs on every progress interval.
pub(crate) fn invoke_backend<P: FnMut(Duration)>(
    state: &GatewayState,
    label: &str,
    prompt: String,
    on_tick: P,
) -> Result<String, GatewayError> {
    let brain = Arc::clone(&state.brain);
    Deadline::new(label, state.config.backend_timeout)
        .progress_interval(state.config.progress_interval)
        .run_with_progress(move |cancel| brain.process_cancellable(&prompt, cancel), on_tick)
        .map_err(GatewayError::from)
}

/// Execute the calls found in `text`, if the policy allows any.
fn run_tools(
    state: &GatewayState,
    policy: &ToolPolicy,
    text: &str,
    trace: &mut TraceBuilder,
) -> Vec<ExecutedToolCall> {
    let only = match policy {
        ToolPolicy::Disabled => return Vec::new(),
        ToolPolicy::Enabled { only } => only.as_deref(),
    };
    let calls = extract_tool_calls(text, only);
    if calls.is_empty() {
        return Vec::new();
    }
    trace.span_start("tools");
    let executed: Vec<ExecutedToolCall> = calls.iter().map(|c| state.sandbox.execute(c)).collect();
    trace.span_end("tools");
    trace.meta("tool_calls", executed.len().to_string());
    tracing::info!(
        count = executed.len(),
        failed = executed.iter().filter(|c| c.is_error()).count(),
        "chat: executed tool calls"
    );
    executed
}

/// Backend text followed by the bounded tool summaries.
fn compose_content(text: &str, executed: &[ExecutedToolCall]) -> String {
    if executed.is_empty() {
        return text.to_string();
    }
    let mut out = text.trim_end().to_string();
    out.push_str("\n\nTool results:");
    for call in executed {
        out.push_str(&format!("\n\n[{}]\n```text\n{}\n```", call.name, call.summary));
    }
    out
}

fn usage(prompt: &str, content: &str) -> Value {
    let p = word_count(prompt);
    let c = word_count(content);
    json!({ "prompt_tokens": p, "completion_tokens": c, "total_tokens": p + c })
}

pub fn completion_object(
    id: &str,
    model: &str,
    prompt: &str,
    content: &str,
    executed: &[ExecutedToolCall],
) -> Value {
    let mut message = json!({ "role": "assistant", "content": content });
    if !executed.is_empty() {
        message["tool_calls"] =
            Value::Array(executed.iter().map(ExecutedToolCall::to_openai).collect());
    }
    json!({
        "id": id,
        "object": "chat.completion",
        "created": unix_now(),
        "model": model,
        "choices": [{
            "index": 0,
            "message": message,
            "finish_reason": "stop",
        }],
        "usage": usage(prompt, content),
    })
}

fn chunk_object(id: &str, model: &str, created: u64, delta: Value, finish: Option<&str>) -> Value {
    json!({
        "id": id,
        "object": "chat.completion.chunk",
        "created": created,
        "model": model,
        "choices": [{
            "index": 0,
            "delta": delta,
            "finish_reason": finish,
        }],
    })
}

pub fn handle_chat<S: Write>(
    state: &GatewayState,
    req: &HttpRequest,
    out: &mut S,
    trace: &mut TraceBuilder,
) -> Result<Reply, GatewayError> {
    let chat = ChatCompletionRequest::parse(&req.body)?;
    let prompt = chat.resolve_prompt()?;
    let prompt = truncate_prompt(&prompt, state.config.max_prompt_chars);
    let model = chat
        .model
        .clone()
        .unwrap_or_else(|| state.config.model_id.clone());
    let policy = chat.tool_policy();
    trace.meta("model", model.clone());
    trace.meta("stream", chat.wants_stream().to_string());

    if chat.wants_stream() {
        return Ok(stream_chat(state, &model, prompt, &policy, out, trace));
    }

    trace.span_start("backend");
    let text = invoke_backend(state, "backend", prompt.clone(), |_| {});
    trace.span_end("backend");
    let text = text?;
    let executed = run_tools(state, &policy, &text, trace);
    let content = compose_content(&text, &executed);
    let body = completion_object(&completion_id(), &model, &prompt, &content, &executed);
    Ok(Reply::Full(Response::json(200, &body)))
}

/// Stream the reply. Never fails after headers: errors become an SSE error frame.
fn stream_chat<S: Write>(
    state: &GatewayState,
    model: &str,
    prompt: String,
    policy: &ToolPolicy,
    out: &mut S,
    trace: &mut TraceBuilder,
) -> Reply {
    let mut sse = match SseWriter::start(out) {
        Ok(w) => w,
        Err(e) => return Reply::Streamed(Err(format!("client disconnected: {e}"))),
    };

    let mut client_gone = false;
    trace.span_start("backend");
    let result = invoke_backend(state, "backend", prompt, |_| {
        if !client_gone && sse.comment("keepalive").is_err() {
            client_gone = true;
        }
    });
    trace.span_end("backend");
    if client_gone {
        tracing::info!("chat: client went away while waiting for backend");
        return Reply::Streamed(Err("client disconnected".into()));
    }

    let text = match result {
        Ok(t) => t,
        Err(e) => {
            tracing::warn!(error = %e, "chat: backend failed during stream");
            if sse.error(&e).is_ok() {
                let _ = sse.done();
            }
            return Reply::Streamed(Err(e.to_string()));
        }
    };

    let executed = run_tools(state, policy, &text, trace);
    let content = compose_content(&text, &executed);
    let id = completion_id();
    let created = unix_now();
    let pieces = segment_words(&content);
    let delay = pacing_delay(state.config.stream_delay, pieces.len());

    trace.span_start("stream");
    let sent = send_pieces(&mut sse, &id, model, created, &pieces, delay);
    trace.span_end("stream");
    trace.meta("chunks", pieces.len().to_string());

    match sent.and_then(|_| sse.done()) {
        Ok(()) => Reply::Streamed(Ok(())),
        Err(e) => {
            tracing::info!(error = %e, "chat: client disconnected mid-stream");
            Reply::Streamed(Err("client disconnected".into()))
        }
    }
}

fn send_pieces<W: Write>(
    sse: &mut SseWriter<'_, W>,
    id: &str,
    model: &str,
    created: u64,
    pieces: &[&str],
    delay: Duration,
) -> std::io::Result<()> {
    for (i, piece) in pieces.iter().enumerate() {
        let delta = if i == 0 {
            json!({ "role": "assistant", "content": piece })
        } else {
            json!({ "content": piece })
        };
        sse.event(&chunk_object(id, model, created, delta, None))?;
        if !delay.is_zero() && i + 1 < pieces.len() {
            thread::sleep(delay);
        }
    }
    sse.event(&chunk_object(id, model, created, json!({}), Some("stop")))
}
