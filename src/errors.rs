//! Error mapping guide:
//! - Transport/protocol/routing/backend failures are `GatewayError`; each maps to one HTTP status
//!   and renders into the `{"error":{"message","code"}}` envelope.
//! - Sandbox failures are `ToolError`; they are data inside a tool result, never request failures.
//! - Startup failures map to process exit codes: 127 for a missing executable, 1 for all others.
use std::fmt;
use std::io;
use std::time::Duration;

use serde_json::{json, Value};

/// Map an io::Error to a process exit code:
/// - 127 for NotFound (command not found)
/// - 1 for all other errors
pub fn exit_code_for_io_error(e: &io::Error) -> u8 {
    if e.kind() == io::ErrorKind::NotFound {
        127
    } else {
        1
    }
}

/// Exit code for a startup failure, looking through anyhow context for an io::Error.
pub fn exit_code_for_error(e: &anyhow::Error) -> u8 {
    e.chain()
        .find_map(|cause| cause.downcast_ref::<io::Error>())
        .map(exit_code_for_io_error)
        .unwrap_or(1)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    BadRequest(String),
    PayloadTooLarge { limit: usize, declared: usize },
    HeadersTooLarge,
    NotFound(String),
    GatewayTimeout { label: String, elapsed: Duration },
    Backend(String),
    Internal(String),
}

impl GatewayError {
    pub fn status_code(&self) -> u16 {
        match self {
            GatewayError::BadRequest(_) => 400,
            GatewayError::PayloadTooLarge { .. } => 413,
            GatewayError::HeadersTooLarge => 431,
            GatewayError::NotFound(_) => 404,
            GatewayError::GatewayTimeout { .. } => 504,
            GatewayError::Backend(_) => 502,
            GatewayError::Internal(_) => 500,
        }
    }

    /// Uniform JSON error envelope.
    pub fn envelope(&self) -> Value {
        json!({
            "error": {
                "message": self.to_string(),
                "code": self.status_code(),
            }
        })
    }
}

impl fmt::Display for GatewayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GatewayError::BadRequest(msg) => write!(f, "{msg}"),
            GatewayError::PayloadTooLarge { limit, declared } => write!(
                f,
                "request body of {declared} bytes exceeds the limit of {limit} bytes"
            ),
            GatewayError::HeadersTooLarge => write!(f, "request headers too large"),
            GatewayError::NotFound(path) => write!(f, "not found: {path}"),
            GatewayError::GatewayTimeout { label, elapsed } => write!(
                f,
                "Gateway timeout: {label} did not complete within {:.1}s",
                elapsed.as_secs_f64()
            ),
            GatewayError::Backend(msg) => write!(f, "backend error: {msg}"),
            GatewayError::Internal(msg) => write!(f, "internal error: {msg}"),
        }
    }
}

impl std::error::Error for GatewayError {}

impl From<serde_json::Error> for GatewayError {
    fn from(e: serde_json::Error) -> Self {
        GatewayError::BadRequest(format!("invalid JSON body: {e}"))
    }
}

/// Sandbox failures; rendered inline into the tool result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolError {
    Containment(String),
    Denied(String),
    InvalidArguments(String),
    Timeout { secs: u64 },
    Io(String),
    UnknownTool(String),
}

impl ToolError {
    pub fn kind(&self) -> &'static str {
        match self {
            ToolError::Containment(_) => "containment",
            ToolError::Denied(_) => "denied",
            ToolError::InvalidArguments(_) => "invalid_arguments",
            ToolError::Timeout { .. } => "timeout",
            ToolError::Io(_) => "io",
            ToolError::UnknownTool(_) => "unknown_tool",
        }
    }

    pub fn to_result(&self) -> Value {
        json!({ "error": self.to_string(), "kind": self.kind() })
    }
}

impl fmt::Display for ToolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ToolError::Containment(p) => write!(f, "path escapes workspace root: {p}"),
            ToolError::Denied(msg) => write!(f, "{msg}"),
            ToolError::InvalidArguments(msg) => write!(f, "invalid arguments: {msg}"),
            ToolError::Timeout { secs } => write!(f, "command timed out after {secs}s"),
            ToolError::Io(msg) => write!(f, "{msg}"),
            ToolError::UnknownTool(name) => write!(f, "unknown tool: {name}"),
        }
    }
}

impl std::error::Error for ToolError {}

impl From<io::Error> for ToolError {
    fn from(e: io::Error) -> Self {
        ToolError::Io(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_code_matches_status() {
        let e = GatewayError::NotFound("/nope".to_string());
        let v = e.envelope();
        assert_eq!(v["error"]["code"], 404);
        assert_eq!(v["error"]["message"], "not found: /nope");
    }

    #[test]
    fn test_timeout_message_is_specific() {
        let e = GatewayError::GatewayTimeout {
            label: "backend".to_string(),
            elapsed: Duration::from_millis(1500),
        };
        assert_eq!(e.status_code(), 504);
        assert!(e.to_string().starts_with("Gateway timeout"));
    }

    #[test]
    fn test_exit_code_for_missing_executable() {
        let err = anyhow::Error::new(io::Error::new(io::ErrorKind::NotFound, "nope"))
            .context("spawning backend");
        assert_eq!(exit_code_for_error(&err), 127);
        assert_eq!(exit_code_for_error(&anyhow::anyhow!("other")), 1);
    }

    #[test]
    fn test_tool_error_result_shape() {
        let v = ToolError::Containment("../x".into()).to_result();
        assert_eq!(v["kind"], "containment");
        assert!(v["error"].as_str().unwrap().contains("escapes workspace root"));
    }
}
