/*!
Structured command execution with a watchdog deadline and cooperative cancellation.

- Output pipes are drained on reader threads so a chatty child can't wedge on a full pipe.
- The watchdog runs on its own thread: it sleeps until the deadline (or until the caller reports
  exit) and then terminates the child, TERM first and KILL after a short grace. The caller's
  wait path never blocks on it.
- A request may carry a `CancelToken`; the watchdog polls it and terminates the child as soon as
  it is tripped, the same way it does on deadline.
- With `own_process_group(true)` the child leads a new process group and the watchdog signals
  the whole group, so `sh -c 'a | b'` pipelines can't outlive the deadline.
*/
use std::ffi::OsString;
use std::io::{Read, Write};
use std::path::PathBuf;
use std::process::{Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
#[cfg(unix)]
use nix::sys::signal::{kill, killpg, Signal};
#[cfg(unix)]
use nix::unistd::Pid;

use crate::supervisor::CancelToken;

/// How long readers may keep draining after the child exited (background grandchildren
/// can hold the pipes open indefinitely).
const DRAIN_GRACE: Duration = Duration::from_millis(500);
const KILL_GRACE: Duration = Duration::from_millis(250);
const CANCEL_POLL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone)]
pub struct ExecService {
    default_timeout: Duration,
}

impl ExecService {
    pub fn new(default_timeout: Duration) -> Self {
        Self { default_timeout }
    }

    pub fn run(&self, request: ExecRequest) -> Result<ExecOutput> {
        let mut cmd = Command::new(&request.program);
        for arg in &request.args {
            cmd.arg(arg);
        }
        if let Some(ref cwd) = request.cwd {
            cmd.current_dir(cwd);
        }

        if !request.inherit_env {
            cmd.env_clear();
        }

        for (key, value) in &request.env {
            cmd.env(key, value);
        }

        cmd.stdin(if request.stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        });
        cmd.stdout(Stdio::piped()).stderr(Stdio::piped());

        #[cfg(unix)]
        if request.own_process_group {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }

        let started = Instant::now();
        let mut child = cmd.spawn().with_context(|| {
            format!(
                "failed to spawn {:?} with args {:?}",
                request.program, request.args
            )
        })?;

        if let Some(input) = request.stdin {
            if let Some(mut pipe) = child.stdin.take() {
                thread::spawn(move || {
                    let _ = pipe.write_all(&input);
                });
            }
        }

        let stdout_buf: Arc<Mutex<Vec<u8>>> = Arc::new(Mutex::new(Vec::new()));
        let stderr_buf: Arc<Mutex<Vec<u8>>> = Arc::new(Mutex::new(Vec::new()));
        let (drained_tx, drained_rx) = mpsc::channel::<()>();
        let mut readers = 0usize;
        if let Some(pipe) = child.stdout.take() {
            spawn_reader(pipe, stdout_buf.clone(), drained_tx.clone());
            readers += 1;
        }
        if let Some(pipe) = child.stderr.take() {
            spawn_reader(pipe, stderr_buf.clone(), drained_tx.clone());
            readers += 1;
        }
        drop(drained_tx);

        let timeout = Some(request.timeout.unwrap_or(self.default_timeout)).filter(|t| !t.is_zero());
        let fired = Arc::new(AtomicBool::new(false));
        let cancelled = Arc::new(AtomicBool::new(false));
        let (exited_tx, exited_rx) = mpsc::channel::<()>();
        let watchdog = if timeout.is_none() && request.cancel.is_none() {
            None
        } else {
            Some(spawn_watchdog(
                child.id(),
                request.own_process_group,
                Watch {
                    timeout,
                    cancel: request.cancel.clone(),
                    fired: fired.clone(),
                    cancelled: cancelled.clone(),
                },
                exited_rx,
            ))
        };

        let status = child.wait().context("failed to wait for process")?;
        let _ = exited_tx.send(());
        if let Some(handle) = watchdog {
            let _ = handle.join();
        }

        let drain_deadline = Instant::now() + DRAIN_GRACE;
        for _ in 0..readers {
            let left = drain_deadline.saturating_duration_since(Instant::now());
            if drained_rx.recv_timeout(left).is_err() {
                break;
            }
        }

        let duration = started.elapsed();
        Ok(ExecOutput {
            status,
            duration,
            timed_out: fired.load(Ordering::SeqCst),
            cancelled: cancelled.load(Ordering::SeqCst),
            stdout: take_lossy(&stdout_buf),
            stderr: take_lossy(&stderr_buf),
        })
    }
}

impl Default for ExecService {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

fn spawn_reader<R: Read + Send + 'static>(
    mut pipe: R,
    buf: Arc<Mutex<Vec<u8>>>,
    drained: mpsc::Sender<()>,
) {
    thread::spawn(move || {
        let mut chunk = [0u8; 4096];
        loop {
            match pipe.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => {
                    if let Ok(mut guard) = buf.lock() {
                        guard.extend_from_slice(&chunk[..n]);
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(_) => break,
            }
        }
        let _ = drained.send(());
    });
}

fn take_lossy(buf: &Arc<Mutex<Vec<u8>>>) -> String {
    let guard = buf.lock().unwrap_or_else(|e| e.into_inner());
    String::from_utf8_lossy(&guard).to_string()
}

/// What the watchdog waits for besides the child's exit.
struct Watch {
    timeout: Option<Duration>,
    cancel: Option<CancelToken>,
    fired: Arc<AtomicBool>,
    cancelled: Arc<AtomicBool>,
}

fn spawn_watchdog(
    pid: u32,
    group: bool,
    watch: Watch,
    exited: mpsc::Receiver<()>,
) -> JoinHandle<()> {
    thread::spawn(move || {
        let deadline = watch.timeout.map(|t| Instant::now() + t);
        loop {
            let left = deadline.map(|d| d.saturating_duration_since(Instant::now()));
            if left == Some(Duration::ZERO) {
                watch.fired.store(true, Ordering::SeqCst);
                tracing::warn!(
                    pid,
                    timeout_ms = watch.timeout.unwrap_or_default().as_millis() as u64,
                    "exec: deadline reached, terminating"
                );
                terminate(pid, group, &exited);
                return;
            }
            let slice = match (&watch.cancel, left) {
                (Some(_), Some(l)) => l.min(CANCEL_POLL),
                (Some(_), None) => CANCEL_POLL,
                (None, Some(l)) => l,
                (None, None) => return,
            };
            match exited.recv_timeout(slice) {
                Ok(()) | Err(RecvTimeoutError::Disconnected) => return,
                Err(RecvTimeoutError::Timeout) => {}
            }
            if watch.cancel.as_ref().is_some_and(CancelToken::is_cancelled) {
                watch.cancelled.store(true, Ordering::SeqCst);
                tracing::info!(pid, "exec: cancelled, terminating");
                terminate(pid, group, &exited);
                return;
            }
        }
    })
}

#[cfg(unix)]
fn terminate(pid: u32, group: bool, exited: &mpsc::Receiver<()>) {
    let target = Pid::from_raw(pid as i32);
    let send = |sig: Signal| {
        if group {
            let _ = killpg(target, sig);
        } else {
            let _ = kill(target, sig);
        }
    };
    send(Signal::SIGTERM);
    if exited.recv_timeout(KILL_GRACE).is_err() || group {
        // A group may still hold detached members after the leader exited.
        send(Signal::SIGKILL);
    }
}

#[cfg(not(unix))]
fn terminate(pid: u32, _group: bool, _exited: &mpsc::Receiver<()>) {
    let _ = Command::new("taskkill")
        .args(["/F", "/T", "/PID", &pid.to_string()])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();
}

#[derive(Debug, Default)]
pub struct ExecRequest {
    program: OsString,
    args: Vec<OsString>,
    cwd: Option<PathBuf>,
    env: Vec<(OsString, OsString)>,
    inherit_env: bool,
    timeout: Option<Duration>,
    stdin: Option<Vec<u8>>,
    own_process_group: bool,
    cancel: Option<CancelToken>,
}

impl ExecRequest {
    pub fn new(program: impl Into<OsString>) -> Self {
        Self {
            program: program.into(),
            inherit_env: false,
            ..Self::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<OsString>, value: impl Into<OsString>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn inherit_env(mut self, inherit: bool) -> Self {
        self.inherit_env = inherit;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn stdin(mut self, input: impl Into<Vec<u8>>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    pub fn own_process_group(mut self, enabled: bool) -> Self {
        self.own_process_group = enabled;
        self
    }

    /// Terminate the child once `token` is cancelled.
    pub fn cancel(mut self, token: &CancelToken) -> Self {
        self.cancel = Some(token.clone());
        self
    }
}

#[derive(Debug)]
pub struct ExecOutput {
    pub status: ExitStatus,
    pub duration: Duration,
    pub timed_out: bool,
    /// Terminated because the request's `CancelToken` was tripped.
    pub cancelled: bool,
    pub stdout: String,
    pub stderr: String,
}

impl ExecOutput {
    /// Exit code; signal-terminated children report 128+signo on unix, -1 otherwise.
    pub fn exit_code(&self) -> i32 {
        if let Some(code) = self.status.code() {
            return code;
        }
        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            if let Some(sig) = self.status.signal() {
                return 128 + sig;
            }
        }
        -1
    }
}
