/*!
aifo-gateway library: an OpenAI-compatible HTTP gateway in front of a pluggable backend, with
heuristic tool-call extraction and a workspace-confined tool sandbox.

Module map:
- gateway: request reader, router, chat and auxiliary handlers, response encoder, server loop
- tools: static catalog, extractor, sandbox executor, workspace confinement
- supervisor: deadline race with progress logging
- backend: the `Brain` collaborator and its shipped implementations
- config, errors, telemetry, trace, util: ambient plumbing
*/

pub mod backend;
pub mod config;
pub mod errors;
pub mod gateway;
pub mod supervisor;
pub mod telemetry;
pub mod tools;
pub mod trace;
pub mod util;

pub use backend::{brain_from_config, Brain, CommandBrain, EchoBrain, HttpBrain};
pub use config::{BackendKind, CliOverrides, GatewayConfig};
pub use errors::{exit_code_for_error, exit_code_for_io_error, GatewayError, ToolError};
pub use gateway::{gateway_start, GatewayHandle, GatewayState};
pub use supervisor::{CancelToken, Deadline, SuperviseError};
pub use telemetry::telemetry_init;
pub use trace::{TraceBuilder, TraceRecord, TraceStore};
