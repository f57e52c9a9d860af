/*!
Listener and per-connection driver.

- One nonblocking accept loop on its own thread, polling a shared `running` flag.
- One thread per accepted connection: read one request, route, write one response (or one SSE
  stream), close. No keep-alive.
- Shared state is read-only apart from the trace store.
*/
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use super::chat::handle_chat;
use super::handlers::{self, Reply};
use super::http::{read_request, HttpRequest, ReadOutcome, ReaderLimits};
use super::response::Response;
use super::routing::{route, Route};
use crate::backend::Brain;
use crate::config::GatewayConfig;
use crate::errors::GatewayError;
use crate::tools::{Sandbox, SandboxConfig};
use crate::trace::{TraceBuilder, TraceStore};

const ACCEPT_POLL: Duration = Duration::from_millis(50);
/// After an early error reply, unread request bytes are drained for at most this long so the
/// peer sees the response instead of a reset.
const ERROR_DRAIN: Duration = Duration::from_millis(200);
const ERROR_DRAIN_BYTES: usize = 1024 * 1024;

pub struct GatewayState {
    pub config: GatewayConfig,
    pub brain: Arc<dyn Brain>,
    pub sandbox: Sandbox,
    pub traces: TraceStore,
}

impl GatewayState {
    pub fn new(config: GatewayConfig, brain: Arc<dyn Brain>) -> io::Result<Self> {
        let sandbox = Sandbox::new(SandboxConfig::from_gateway(&config))?;
        let traces = TraceStore::new(config.trace_capacity);
        Ok(GatewayState {
            config,
            brain,
            sandbox,
            traces,
        })
    }

    fn limits(&self) -> ReaderLimits {
        ReaderLimits {
            max_header_bytes: self.config.max_header_bytes,
            max_body_bytes: self.config.max_body_bytes,
        }
    }
}

pub struct GatewayHandle {
    pub url: String,
    pub addr: SocketAddr,
    pub state: Arc<GatewayState>,
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl GatewayHandle {
    /// Stop accepting; in-flight connections finish on their own threads.
    pub fn shutdown(mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(h) = self.handle.take() {
            let _ = h.join();
        }
    }

    /// Block until the accept loop ends.
    pub fn join(mut self) {
        if let Some(h) = self.handle.take() {
            let _ = h.join();
        }
    }
}

impl Drop for GatewayHandle {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

/// Bind and start serving on a background thread.
pub fn gateway_start(config: GatewayConfig, brain: Arc<dyn Brain>) -> io::Result<GatewayHandle> {
    let listener = TcpListener::bind(config.bind_addr())
        .map_err(|e| io::Error::new(e.kind(), format!("bind {} failed: {e}", config.bind_addr())))?;
    let addr = listener.local_addr()?;
    listener.set_nonblocking(true)?;

    let state = Arc::new(GatewayState::new(config, brain)?);
    let running = Arc::new(AtomicBool::new(true));
    let running_cl = running.clone();
    let state_cl = state.clone();

    let handle = thread::Builder::new()
        .name("gateway-accept".into())
        .spawn(move || accept_loop(listener, state_cl, running_cl))?;

    tracing::info!(%addr, workspace = %state.sandbox.root().display(), "gateway: listening");
    Ok(GatewayHandle {
        url: format!("http://{addr}"),
        addr,
        state,
        running,
        handle: Some(handle),
    })
}

fn accept_loop(listener: TcpListener, state: Arc<GatewayState>, running: Arc<AtomicBool>) {
    while running.load(Ordering::SeqCst) {
        let (stream, peer) = match listener.accept() {
            Ok(pair) => pair,
            Err(e) => {
                if e.kind() != io::ErrorKind::WouldBlock {
                    tracing::warn!(error = %e, "gateway: accept error");
                }
                thread::sleep(ACCEPT_POLL);
                continue;
            }
        };
        let _ = stream.set_nonblocking(false);
        let read_timeout = state.config.read_timeout;
        let _ = stream.set_read_timeout((!read_timeout.is_zero()).then_some(read_timeout));
        let _ = stream.set_nodelay(true);

        let st = state.clone();
        let spawned = thread::Builder::new()
            .name("gateway-conn".into())
            .spawn(move || {
                let mut s = stream;
                if handle_connection(&st, &mut s) == Disposition::DrainInput {
                    let _ = s.set_read_timeout(Some(ERROR_DRAIN));
                    drain_briefly(&mut s);
                }
                let _ = s.shutdown(Shutdown::Both);
            });
        if let Err(e) = spawned {
            tracing::error!(%peer, error = %e, "gateway: failed to spawn connection thread");
        }
    }
    tracing::info!("gateway: stopped");
}

/// How the connection should be wound down after `handle_connection`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Done,
    /// Rejected before the request was fully read; unread input should be drained briefly.
    DrainInput,
}

/// Drive one connection: read, dispatch, respond, record the trace.
pub fn handle_connection<S: Read + Write>(state: &GatewayState, stream: &mut S) -> Disposition {
    let started = Instant::now();
    let req = match read_request(stream, &state.limits()) {
        Ok(ReadOutcome::Request(req)) => req,
        Ok(ReadOutcome::Closed) => return Disposition::Done,
        Err(e) => {
            tracing::info!(status = e.status_code(), error = %e, "gateway: rejected request");
            let _ = Response::error(&e).write_to(stream);
            return Disposition::DrainInput;
        }
    };

    let mut trace = TraceBuilder::begin(req.method.as_str(), &req.path);
    let route = route(&req.method, &req.path);
    trace.meta("route", route.label());

    let outcome = dispatch(state, &route, &req, stream, &mut trace);
    let (status, error) = match outcome {
        Ok(Reply::Full(resp)) => {
            let status = resp.status;
            let resp = resp.with_header("X-Trace-Id", trace.id());
            if let Err(e) = resp.write_to(stream) {
                tracing::debug!(error = %e, "gateway: client went away before response");
            }
            (status, None)
        }
        Ok(Reply::Streamed(res)) => (200, res.err()),
        Err(e) => {
            let resp = Response::error(&e).with_header("X-Trace-Id", trace.id());
            let _ = resp.write_to(stream);
            (e.status_code(), Some(e.to_string()))
        }
    };

    let elapsed_ms = started.elapsed().as_millis() as u64;
    tracing::info!(
        method = req.method.as_str(),
        path = %req.path,
        status,
        elapsed_ms,
        trace_id = trace.id(),
        "gateway: request"
    );
    trace.meta("status", status.to_string());
    let success = status < 400 && error.is_none();
    state.traces.record(trace.finish(success, error));
    Disposition::Done
}

fn dispatch<S: Write>(
    state: &GatewayState,
    route: &Route,
    req: &HttpRequest,
    stream: &mut S,
    trace: &mut TraceBuilder,
) -> Result<Reply, GatewayError> {
    let full = |r: Response| -> Result<Reply, GatewayError> { Ok(Reply::Full(r)) };
    match route {
        Route::Preflight => full(Response::preflight()),
        Route::Health => full(handlers::health(state)),
        Route::Models => full(handlers::models(state)),
        Route::Model(id) => full(handlers::model(state, id)?),
        Route::Tools => full(handlers::tools()),
        Route::ChatCompletions => handle_chat(state, req, stream, trace),
        Route::Process => full(handlers::process(state, req, trace)?),
        Route::Traces => full(handlers::traces(state)),
        Route::Trace(id) => full(handlers::trace(state, id)?),
        Route::NotFound => Err(GatewayError::NotFound(format!(
            "{} {}",
            req.method.as_str(),
            req.path
        ))),
    }
}

/// Read and discard pending request bytes for a short while.
fn drain_briefly<S: Read>(stream: &mut S) {
    let deadline = Instant::now() + ERROR_DRAIN;
    let mut drained = 0usize;
    let mut buf = [0u8; 8192];
    while Instant::now() < deadline && drained < ERROR_DRAIN_BYTES {
        match stream.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => drained += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(_) => break,
        }
    }
}
