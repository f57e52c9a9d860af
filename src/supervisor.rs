/*!
Deadline supervisor: race a labeled operation against a timeout.

The operation runs on its own thread; the calling thread is the countdown. Whichever finishes
first wins. On timeout the operation's `CancelToken` is tripped (cooperative cancellation) and
its eventual result is discarded. While waiting, a progress line is logged every interval and an
optional tick hook runs on the caller's thread (streaming uses it for SSE heartbeats).
*/
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::errors::GatewayError;

#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug)]
pub enum SuperviseError {
    Timeout { label: String, elapsed: Duration },
    Failed(anyhow::Error),
    /// The worker went away without reporting (panic).
    Aborted(String),
}

impl From<SuperviseError> for GatewayError {
    fn from(e: SuperviseError) -> Self {
        match e {
            SuperviseError::Timeout { label, elapsed } => {
                GatewayError::GatewayTimeout { label, elapsed }
            }
            SuperviseError::Failed(err) => GatewayError::Backend(format!("{err:#}")),
            SuperviseError::Aborted(label) => {
                GatewayError::Backend(format!("{label} aborted unexpectedly"))
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct Deadline {
    label: String,
    timeout: Duration,
    interval: Duration,
}

impl Deadline {
    pub fn new(label: impl Into<String>, timeout: Duration) -> Self {
        Deadline {
            label: label.into(),
            timeout,
            interval: Duration::from_secs(1),
        }
    }

    pub fn progress_interval(mut self, interval: Duration) -> Self {
        if !interval.is_zero() {
            self.interval = interval;
        }
        self
    }

    pub fn run<T, F>(&self, op: F) -> Result<T, SuperviseError>
    where
        T: Send + 'static,
        F: FnOnce(&CancelToken) -> anyhow::Result<T> + Send + 'static,
    {
        self.run_with_progress(op, |_| {})
    }

    pub fn run_with_progress<T, F, P>(&self, op: F, mut on_tick: P) -> Result<T, SuperviseError>
    where
        T: Send + 'static,
        F: FnOnce(&CancelToken) -> anyhow::Result<T> + Send + 'static,
        P: FnMut(Duration),
    {
        let token = CancelToken::new();
        let (tx, rx) = mpsc::sync_channel::<anyhow::Result<T>>(1);
        let worker_token = token.clone();
        let spawned = thread::Builder::new()
            .name(format!("deadline-{}", self.label))
            .spawn(move || {
                let res = op(&worker_token);
                // Receiver may be gone after a timeout; the result is dropped then.
                let _ = tx.send(res);
            });
        if let Err(e) = spawned {
            return Err(SuperviseError::Failed(anyhow::anyhow!(
                "failed to spawn worker for {}: {e}",
                self.label
            )));
        }

        let started = Instant::now();
        let deadline = started + self.timeout;
        loop {
            let now = Instant::now();
            if now >= deadline {
                token.cancel();
                let elapsed = started.elapsed();
                tracing::warn!(
                    label = %self.label,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "deadline: timed out"
                );
                return Err(SuperviseError::Timeout {
                    label: self.label.clone(),
                    elapsed,
                });
            }
            let wait = self.interval.min(deadline - now);
            match rx.recv_timeout(wait) {
                Ok(Ok(v)) => {
                    tracing::debug!(
                        label = %self.label,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "deadline: completed"
                    );
                    return Ok(v);
                }
                Ok(Err(e)) => return Err(SuperviseError::Failed(e)),
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(SuperviseError::Aborted(self.label.clone()))
                }
                Err(RecvTimeoutError::Timeout) => {
                    let elapsed = started.elapsed();
                    if elapsed < self.timeout {
                        tracing::info!(
                            label = %self.label,
                            elapsed_ms = elapsed.as_millis() as u64,
                            "deadline: still waiting"
                        );
                        on_tick(elapsed);
                    }
                }
            }
        }
    }
}
