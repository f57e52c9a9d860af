//! OpenAI-compatible HTTP gateway: request reader, router, handlers, response encoder and the
//! thread-per-connection server.

pub mod chat;
pub mod handlers;
pub mod http;
pub mod response;
pub mod routing;
pub mod server;

pub use server::{gateway_start, handle_connection, Disposition, GatewayHandle, GatewayState};
