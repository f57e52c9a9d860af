//! Non-chat endpoints: health, model listing, tool catalog, raw passthrough, traces.

use std::sync::Arc;

use serde_json::{json, Value};

use super::chat::invoke_backend;
use super::http::HttpRequest;
use super::response::Response;
use super::server::GatewayState;
use crate::errors::GatewayError;
use crate::supervisor::Deadline;
use crate::tools::catalog_json;
use crate::trace::TraceBuilder;
use crate::util::id::unix_now;

const TRACE_LIST_LIMIT: usize = 50;

/// What a handler produced.
pub enum Reply {
    /// A complete response still to be written.
    Full(Response),
    /// The handler already wrote a stream; carries its terminal outcome.
    Streamed(Result<(), String>),
}

/// Healthy iff the backend answers its ping within the health timeout.
pub fn health(state: &GatewayState) -> Response {
    let brain = Arc::clone(&state.brain);
    let healthy = Deadline::new("health", state.config.health_timeout)
        .progress_interval(state.config.progress_interval)
        .run(move |_| Ok(brain.health_check()))
        .unwrap_or_else(|e| {
            tracing::warn!(error = ?e, "health: backend ping did not complete");
            false
        });
    Response::json(
        200,
        &json!({
            "status": if healthy { "healthy" } else { "unhealthy" },
            "version": env!("CARGO_PKG_VERSION"),
        }),
    )
}

fn model_object(id: &str) -> Value {
    json!({
        "id": id,
        "object": "model",
        "created": unix_now(),
        "owned_by": "aifo-gateway",
    })
}

pub fn models(state: &GatewayState) -> Response {
    Response::json(
        200,
        &json!({
            "object": "list",
            "data": [model_object(&state.config.model_id)],
        }),
    )
}

pub fn model(state: &GatewayState, id: &str) -> Result<Response, GatewayError> {
    if id == state.config.model_id {
        Ok(Response::json(200, &model_object(id)))
    } else {
        Err(GatewayError::NotFound(format!("model {id}")))
    }
}

pub fn tools() -> Response {
    Response::json(200, &json!({ "object": "list", "data": catalog_json() }))
}

/// Raw text in, `{"response": ...}` out; no chat parsing.
pub fn process(
    state: &GatewayState,
    req: &HttpRequest,
    trace: &mut TraceBuilder,
) -> Result<Response, GatewayError> {
    let text = std::str::from_utf8(&req.body)
        .map_err(|_| GatewayError::BadRequest("request body is not valid UTF-8".into()))?;
    if text.trim().is_empty() {
        return Err(GatewayError::BadRequest("request body is empty".into()));
    }
    trace.span_start("backend");
    let reply = invoke_backend(state, "process", text.to_string(), |_| {});
    trace.span_end("backend");
    Ok(Response::json(200, &json!({ "response": reply? })))
}

pub fn traces(state: &GatewayState) -> Response {
    Response::json(
        200,
        &json!({ "traces": state.traces.recent(TRACE_LIST_LIMIT) }),
    )
}

pub fn trace(state: &GatewayState, id: &str) -> Result<Response, GatewayError> {
    let record = state
        .traces
        .get(id)
        .ok_or_else(|| GatewayError::NotFound(format!("trace {id}")))?;
    let body = serde_json::to_value(record).map_err(|e| GatewayError::Internal(e.to_string()))?;
    Ok(Response::json(200, &body))
}
