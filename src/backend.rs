/*!
Backend collaborator ("brain"): the opaque conversational engine behind the gateway.

The gateway only ever calls `health_check()` and `process(text)`. Three implementations ship:
- EchoBrain: returns the prompt unchanged (local smoke tests).
- CommandBrain: local program, prompt on stdin, reply on stdout.
- HttpBrain: OpenAI-compatible upstream over blocking HTTP.
*/
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use serde_json::{json, Value};

use crate::config::{BackendKind, GatewayConfig};
use crate::supervisor::CancelToken;
use crate::util::exec::{ExecRequest, ExecService};
use crate::util::{shell_join, shell_like_split_args};

pub trait Brain: Send + Sync {
    fn health_check(&self) -> bool;
    fn process(&self, text: &str) -> Result<String>;

    /// `process` that stops early once `cancel` is tripped. Implementations that cannot be
    /// interrupted keep the default and finish on their own (bounded by their own timeouts).
    fn process_cancellable(&self, text: &str, cancel: &CancelToken) -> Result<String> {
        let _ = cancel;
        self.process(text)
    }
}

/// Returns its input.
#[derive(Debug, Default, Clone)]
pub struct EchoBrain;

impl Brain for EchoBrain {
    fn health_check(&self) -> bool {
        true
    }

    fn process(&self, text: &str) -> Result<String> {
        Ok(text.to_string())
    }
}

#[derive(Debug, Clone)]
pub struct CommandBrain {
    program: PathBuf,
    args: Vec<String>,
    exec: ExecService,
}

impl CommandBrain {
    /// Build from a shell-like command line, e.g. `llm -m gpt-4o-mini`.
    pub fn from_command_line(line: &str, timeout: Duration) -> Result<Self> {
        let mut argv = shell_like_split_args(line);
        if argv.is_empty() {
            bail!("backend command is empty");
        }
        let program = PathBuf::from(argv.remove(0));
        Ok(CommandBrain {
            program,
            args: argv,
            exec: ExecService::new(timeout),
        })
    }

    fn resolved_program(&self) -> Option<PathBuf> {
        if self.program.components().count() > 1 {
            return self.program.is_file().then(|| self.program.clone());
        }
        which::which(&self.program).ok()
    }
}

impl Brain for CommandBrain {
    fn health_check(&self) -> bool {
        self.resolved_program().is_some()
    }

    fn process(&self, text: &str) -> Result<String> {
        self.run(text, None)
    }

    fn process_cancellable(&self, text: &str, cancel: &CancelToken) -> Result<String> {
        self.run(text, Some(cancel))
    }
}

impl CommandBrain {
    fn run(&self, text: &str, cancel: Option<&CancelToken>) -> Result<String> {
        let program = self
            .resolved_program()
            .ok_or_else(|| anyhow!("backend program {} not found", self.program.display()))?;
        let mut shown = vec![program.display().to_string()];
        shown.extend(self.args.iter().cloned());
        tracing::debug!(cmd = %shell_join(&shown), "backend: exec");
        let mut req = ExecRequest::new(&program)
            .args(&self.args)
            .inherit_env(true)
            .own_process_group(true)
            .stdin(text.as_bytes().to_vec());
        if let Some(token) = cancel {
            req = req.cancel(token);
        }
        let out = self.exec.run(req)?;
        if out.cancelled {
            bail!("backend command cancelled after {:?}", out.duration);
        }
        if out.timed_out {
            bail!("backend command timed out after {:?}", out.duration);
        }
        if !out.status.success() {
            bail!(
                "backend command exited with code {}: {}",
                out.exit_code(),
                out.stderr.trim()
            );
        }
        Ok(out.stdout.trim_end().to_string())
    }
}

pub struct HttpBrain {
    base_url: String,
    model: String,
    api_key: Option<String>,
    client: reqwest::blocking::Client,
}

impl HttpBrain {
    pub fn new(
        base_url: &str,
        model: Option<&str>,
        api_key: Option<&str>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build HTTP client")?;
        Ok(HttpBrain {
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.unwrap_or("default").to_string(),
            api_key: api_key.map(str::to_string),
            client,
        })
    }

    fn authorize(&self, rb: reqwest::blocking::RequestBuilder) -> reqwest::blocking::RequestBuilder {
        match &self.api_key {
            Some(k) => rb.bearer_auth(k),
            None => rb,
        }
    }
}

/// Extract `choices[0].message.content` from an upstream completion.
pub(crate) fn completion_text(body: &Value) -> Result<String> {
    body.pointer("/choices/0/message/content")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| anyhow!("upstream response has no choices[0].message.content"))
}

impl Brain for HttpBrain {
    fn health_check(&self) -> bool {
        let rb = self.client.get(format!("{}/models", self.base_url));
        match self.authorize(rb).timeout(Duration::from_secs(5)).send() {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                tracing::debug!(error = %e, "backend: upstream health probe failed");
                false
            }
        }
    }

    fn process(&self, text: &str) -> Result<String> {
        let payload = json!({
            "model": self.model,
            "messages": [{ "role": "user", "content": text }],
            "stream": false,
        });
        let rb = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .json(&payload);
        let resp = self
            .authorize(rb)
            .send()
            .context("upstream request failed")?;
        let status = resp.status();
        let body: Value = resp.json().context("upstream returned invalid JSON")?;
        if !status.is_success() {
            let msg = body
                .pointer("/error/message")
                .and_then(Value::as_str)
                .unwrap_or("no error message");
            bail!("upstream returned {status}: {msg}");
        }
        completion_text(&body)
    }
}

/// Build the configured backend.
pub fn brain_from_config(cfg: &GatewayConfig) -> Result<Arc<dyn Brain>> {
    match cfg.backend {
        BackendKind::Echo => Ok(Arc::new(EchoBrain)),
        BackendKind::Command => {
            let line = cfg
                .backend_cmd
                .as_deref()
                .ok_or_else(|| anyhow!("backend 'command' requires a command line"))?;
            Ok(Arc::new(CommandBrain::from_command_line(
                line,
                cfg.backend_timeout,
            )?))
        }
        BackendKind::Http => {
            let url = cfg
                .backend_url
                .as_deref()
                .ok_or_else(|| anyhow!("backend 'http' requires a base URL"))?;
            Ok(Arc::new(HttpBrain::new(
                url,
                cfg.backend_model.as_deref(),
                cfg.backend_api_key.as_deref(),
                cfg.backend_timeout,
            )?))
        }
    }
}
