mod support;

use std::sync::Arc;
use std::time::Duration;

use aifo_gateway::EchoBrain;
use serde_json::{json, Value};

fn chat_body(stream: bool, content: &str) -> Vec<u8> {
    json!({
        "model": "aifo-gateway",
        "stream": stream,
        "messages": [{"role": "user", "content": content}],
    })
    .to_string()
    .into_bytes()
}

fn post_chat(port: u16, path: &str, body: &[u8]) -> (u16, String, Vec<u8>) {
    support::http_request(
        port,
        "POST",
        path,
        &[("Content-Type", "application/json")],
        body,
    )
}

#[test]
fn test_non_streaming_completion() {
    let brain = Arc::new(support::FixedBrain("pong".into()));
    let (gw, _td) = support::start_gateway(brain, |_| {});

    for path in ["/v1/chat/completions", "/chat/completions"] {
        let (status, head, body) = post_chat(gw.addr.port(), path, &chat_body(false, "ping"));
        assert_eq!(status, 200, "head:\n{head}");
        let v: Value = serde_json::from_slice(&body).expect("json");
        assert_eq!(v["object"], "chat.completion");
        assert!(v["id"].as_str().unwrap_or("").starts_with("chatcmpl-"));
        assert_eq!(v["choices"][0]["message"]["role"], "assistant");
        assert_eq!(v["choices"][0]["message"]["content"], "pong");
        assert_eq!(v["choices"][0]["finish_reason"], "stop");
        assert!(v["choices"][0]["message"].get("tool_calls").is_none());
        assert!(v["usage"]["total_tokens"].as_u64().is_some());
    }
    gw.shutdown();
}

#[test]
fn test_missing_user_message_is_400() {
    let (gw, _td) = support::start_gateway(Arc::new(EchoBrain), |_| {});
    let body = json!({"messages": [{"role": "system", "content": "be nice"}]}).to_string();
    let (status, _h, body) = post_chat(gw.addr.port(), "/v1/chat/completions", body.as_bytes());
    assert_eq!(status, 400);
    let v: Value = serde_json::from_slice(&body).expect("json");
    assert_eq!(v["error"]["code"], 400);
    gw.shutdown();
}

#[test]
fn test_streaming_reconstructs_reply() {
    let reply = "The quick brown fox\njumps over  the lazy dog.";
    let brain = Arc::new(support::FixedBrain(reply.into()));
    let (gw, _td) = support::start_gateway(brain, |_| {});

    let (status, head, body) =
        post_chat(gw.addr.port(), "/v1/chat/completions", &chat_body(true, "go"));
    assert_eq!(status, 200, "head:\n{head}");
    assert_eq!(
        support::header_value(&head, "Content-Type").as_deref(),
        Some("text/event-stream")
    );
    assert_eq!(
        support::header_value(&head, "X-Accel-Buffering").as_deref(),
        Some("no")
    );

    let events = support::sse_data(&body);
    assert_eq!(events.last().map(String::as_str), Some("[DONE]"), "events: {events:?}");

    let chunks: Vec<Value> = events[..events.len() - 1]
        .iter()
        .map(|e| serde_json::from_str(e).expect("chunk json"))
        .collect();
    assert!(chunks.len() >= 3, "expected several word chunks, got {}", chunks.len());
    assert_eq!(chunks[0]["choices"][0]["delta"]["role"], "assistant");

    let text: String = chunks
        .iter()
        .filter_map(|c| c["choices"][0]["delta"]["content"].as_str())
        .collect();
    assert_eq!(text, reply);

    let last = chunks.last().expect("final chunk");
    assert_eq!(last["choices"][0]["finish_reason"], "stop");
    assert!(chunks[..chunks.len() - 1]
        .iter()
        .all(|c| c["choices"][0]["finish_reason"].is_null()));
    gw.shutdown();
}

#[test]
fn test_timeout_non_streaming_is_504() {
    let brain = Arc::new(support::SlowBrain(Duration::from_secs(3)));
    let (gw, _td) = support::start_gateway(brain, |cfg| {
        cfg.backend_timeout = Duration::from_millis(300);
        cfg.progress_interval = Duration::from_millis(100);
    });
    let (status, _h, body) =
        post_chat(gw.addr.port(), "/v1/chat/completions", &chat_body(false, "hi"));
    assert_eq!(status, 504);
    let v: Value = serde_json::from_slice(&body).expect("json");
    let msg = v["error"]["message"].as_str().unwrap_or("");
    assert!(msg.contains("Gateway timeout"), "message: {msg}");
    gw.shutdown();
}

#[test]
fn test_timeout_streaming_sends_error_event_then_done() {
    let brain = Arc::new(support::SlowBrain(Duration::from_secs(3)));
    let (gw, _td) = support::start_gateway(brain, |cfg| {
        cfg.backend_timeout = Duration::from_millis(300);
        cfg.progress_interval = Duration::from_millis(100);
    });
    let (status, _h, body) =
        post_chat(gw.addr.port(), "/v1/chat/completions", &chat_body(true, "hi"));
    assert_eq!(status, 200);
    let events = support::sse_data(&body);
    assert_eq!(events.len(), 2, "events: {events:?}");
    let err: Value = serde_json::from_str(&events[0]).expect("error json");
    assert!(err["error"]["message"]
        .as_str()
        .unwrap_or("")
        .contains("Gateway timeout"));
    assert_eq!(err["error"]["code"], 504);
    assert_eq!(events[1], "[DONE]");
    gw.shutdown();
}

#[test]
fn test_backend_failure_is_502() {
    let (gw, _td) = support::start_gateway(Arc::new(support::FailingBrain), |_| {});
    let (status, _h, body) =
        post_chat(gw.addr.port(), "/v1/chat/completions", &chat_body(false, "hi"));
    assert_eq!(status, 502);
    let v: Value = serde_json::from_slice(&body).expect("json");
    assert!(v["error"]["message"]
        .as_str()
        .unwrap_or("")
        .contains("backend exploded"));
    gw.shutdown();
}

#[test]
fn test_prompt_is_truncated_before_backend() {
    let (gw, _td) = support::start_gateway(Arc::new(EchoBrain), |cfg| {
        cfg.max_prompt_chars = 100;
    });
    let long = "x".repeat(500);
    let (status, _h, body) =
        post_chat(gw.addr.port(), "/v1/chat/completions", &chat_body(false, &long));
    assert_eq!(status, 200);
    let v: Value = serde_json::from_slice(&body).expect("json");
    let content = v["choices"][0]["message"]["content"].as_str().unwrap_or("");
    assert!(content.starts_with(&"x".repeat(100)));
    assert!(content.ends_with("[Summarized]"), "content tail: {:?}", &content[90..]);
    gw.shutdown();
}

#[cfg(unix)]
#[test]
fn test_tool_calls_execute_when_tools_offered() {
    let reply = "Let me look.\n```bash\necho hello-from-tool\n```\n";
    let brain = Arc::new(support::FixedBrain(reply.into()));
    let (gw, _td) = support::start_gateway(brain, |_| {});

    let body = json!({
        "messages": [{"role": "user", "content": "say hello"}],
        "tools": [{"type": "function", "function": {"name": "execute_command"}}],
    })
    .to_string();
    let (status, _h, body) = post_chat(gw.addr.port(), "/v1/chat/completions", body.as_bytes());
    assert_eq!(status, 200);
    let v: Value = serde_json::from_slice(&body).expect("json");
    let msg = &v["choices"][0]["message"];
    assert_eq!(v["choices"][0]["finish_reason"], "stop");

    let calls = msg["tool_calls"].as_array().expect("tool_calls");
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0]["type"], "function");
    assert_eq!(calls[0]["function"]["name"], "execute_command");
    assert!(calls[0]["id"].as_str().unwrap_or("").starts_with("call_"));
    let args: Value =
        serde_json::from_str(calls[0]["function"]["arguments"].as_str().expect("args string"))
            .expect("args json");
    assert_eq!(args["command"], "echo hello-from-tool");
    assert_eq!(calls[0]["result"]["exit_code"], 0);
    assert!(calls[0]["result"]["stdout"]
        .as_str()
        .unwrap_or("")
        .contains("hello-from-tool"));

    let content = msg["content"].as_str().unwrap_or("");
    assert!(content.contains("Tool results:"), "content: {content}");
    gw.shutdown();
}

#[test]
fn test_tool_calls_ignored_without_tools() {
    let reply = "Run this:\n```bash\necho should-not-run\n```";
    let brain = Arc::new(support::FixedBrain(reply.into()));
    let (gw, _td) = support::start_gateway(brain, |_| {});
    let (status, _h, body) =
        post_chat(gw.addr.port(), "/v1/chat/completions", &chat_body(false, "hi"));
    assert_eq!(status, 200);
    let v: Value = serde_json::from_slice(&body).expect("json");
    assert!(v["choices"][0]["message"].get("tool_calls").is_none());
    assert_eq!(v["choices"][0]["message"]["content"], reply);
    gw.shutdown();
}

#[cfg(unix)]
#[test]
fn test_streaming_with_tools_appends_summary_to_deltas() {
    let reply = "Checking.\n```bash\necho streamed-tool-output\n```\n";
    let brain = Arc::new(support::FixedBrain(reply.into()));
    let (gw, _td) = support::start_gateway(brain, |_| {});

    let body = json!({
        "stream": true,
        "messages": [{"role": "user", "content": "run it"}],
        "tools": [{"type": "function", "function": {"name": "execute_command"}}],
    })
    .to_string();
    let (status, _h, body) = post_chat(gw.addr.port(), "/v1/chat/completions", body.as_bytes());
    assert_eq!(status, 200);

    let events = support::sse_data(&body);
    assert_eq!(events.last().map(String::as_str), Some("[DONE]"), "events: {events:?}");
    let chunks: Vec<Value> = events[..events.len() - 1]
        .iter()
        .map(|e| serde_json::from_str(e).expect("chunk json"))
        .collect();
    assert!(chunks
        .iter()
        .all(|c| c["choices"][0]["delta"].get("tool_calls").is_none()));
    let text: String = chunks
        .iter()
        .filter_map(|c| c["choices"][0]["delta"]["content"].as_str())
        .collect();
    assert!(text.starts_with("Checking."), "text: {text}");
    assert!(text.contains("Tool results:"), "text: {text}");
    assert!(text.contains("[execute_command]"), "text: {text}");
    assert!(text.contains("streamed-tool-output"), "text: {text}");
    assert_eq!(
        chunks.last().expect("final chunk")["choices"][0]["finish_reason"],
        "stop"
    );
    gw.shutdown();
}

#[cfg(unix)]
#[test]
fn test_pinned_tool_choice_runs_only_that_tool() {
    let reply = concat!(
        "First this:\n```bash\ntouch should-not-exist.txt\n```\n",
        "Then read_file({\"path\": \"notes.txt\"}) and list_directory({}).\n"
    );
    let brain = Arc::new(support::FixedBrain(reply.into()));
    let (gw, td) = support::start_gateway(brain, |_| {});
    std::fs::write(td.path().join("notes.txt"), "pinned contents").expect("write notes");

    let body = json!({
        "messages": [{"role": "user", "content": "read my notes"}],
        "tools": [
            {"type": "function", "function": {"name": "execute_command"}},
            {"type": "function", "function": {"name": "read_file"}},
        ],
        "tool_choice": {"type": "function", "function": {"name": "read_file"}},
    })
    .to_string();
    let (status, _h, body) = post_chat(gw.addr.port(), "/v1/chat/completions", body.as_bytes());
    assert_eq!(status, 200);
    let v: Value = serde_json::from_slice(&body).expect("json");

    let calls = v["choices"][0]["message"]["tool_calls"]
        .as_array()
        .expect("tool_calls");
    assert_eq!(calls.len(), 1, "calls: {calls:?}");
    assert_eq!(calls[0]["function"]["name"], "read_file");
    assert_eq!(calls[0]["result"]["content"], "pinned contents");
    assert!(!td.path().join("should-not-exist.txt").exists());
    gw.shutdown();
}
