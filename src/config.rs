/*!
Gateway configuration: built once at startup and passed by reference everywhere else.

Precedence (lowest to highest): defaults, YAML file, `AIFO_GATEWAY_*` environment, CLI flags.
Environment access is injected as a lookup closure so tests never touch the process env.
*/
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use serde::Deserialize;

pub const ENV_PREFIX: &str = "AIFO_GATEWAY_";

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum BackendKind {
    /// Echo the prompt back (local smoke tests)
    Echo,
    /// Run a local program; prompt on stdin, reply on stdout
    Command,
    /// Forward to an OpenAI-compatible upstream
    Http,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Echo => "echo",
            BackendKind::Command => "command",
            BackendKind::Http => "http",
        }
    }

    fn parse(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "echo" => Ok(BackendKind::Echo),
            "command" | "cmd" => Ok(BackendKind::Command),
            "http" | "openai" => Ok(BackendKind::Http),
            other => Err(anyhow!("unknown backend '{other}' (expected echo|command|http)")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
    pub workspace: PathBuf,
    pub model_id: String,

    pub backend: BackendKind,
    pub backend_cmd: Option<String>,
    pub backend_url: Option<String>,
    pub backend_model: Option<String>,
    pub backend_api_key: Option<String>,

    pub backend_timeout: Duration,
    pub health_timeout: Duration,
    pub progress_interval: Duration,
    pub shell_timeout: Duration,
    pub git_timeout: Duration,
    pub read_timeout: Duration,
    pub stream_delay: Duration,

    pub max_body_bytes: usize,
    pub max_header_bytes: usize,
    pub max_prompt_chars: usize,
    pub max_tool_output_chars: usize,
    pub trace_capacity: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            workspace: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            model_id: "aifo-gateway".to_string(),
            backend: BackendKind::Echo,
            backend_cmd: None,
            backend_url: None,
            backend_model: None,
            backend_api_key: None,
            backend_timeout: Duration::from_secs(120),
            health_timeout: Duration::from_secs(5),
            progress_interval: Duration::from_secs(1),
            shell_timeout: Duration::from_secs(15),
            git_timeout: Duration::from_secs(30),
            read_timeout: Duration::from_secs(30),
            stream_delay: Duration::from_millis(20),
            max_body_bytes: 5_000_000,
            max_header_bytes: 64 * 1024,
            max_prompt_chars: 8000,
            max_tool_output_chars: 4000,
            trace_capacity: 256,
        }
    }
}

/// YAML file shape; every key optional, unknown keys rejected.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
struct FileConfig {
    host: Option<String>,
    port: Option<u16>,
    workspace: Option<PathBuf>,
    model_id: Option<String>,
    backend: Option<String>,
    backend_cmd: Option<String>,
    backend_url: Option<String>,
    backend_model: Option<String>,
    backend_timeout: Option<String>,
    health_timeout: Option<String>,
    shell_timeout: Option<String>,
    git_timeout: Option<String>,
    read_timeout: Option<String>,
    stream_delay_ms: Option<u64>,
    max_body_bytes: Option<usize>,
    max_prompt_chars: Option<usize>,
    max_tool_output_chars: Option<usize>,
    trace_capacity: Option<usize>,
}

/// Overrides coming from CLI flags (highest precedence).
#[derive(Debug, Default, Clone)]
pub struct CliOverrides {
    pub config_file: Option<PathBuf>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub workspace: Option<PathBuf>,
    pub backend: Option<BackendKind>,
    pub backend_cmd: Option<String>,
    pub backend_url: Option<String>,
    pub backend_model: Option<String>,
}

/// Parse `15s`, `2m`, `500ms` (humantime) or bare seconds.
pub fn parse_duration(s: &str) -> Result<Duration> {
    let t = s.trim();
    if let Ok(secs) = t.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }
    humantime::parse_duration(t).with_context(|| format!("invalid duration '{t}'"))
}

impl GatewayConfig {
    /// Full layered load used by the binary: `.env`, file, process env, CLI flags; then validate.
    pub fn load(cli: &CliOverrides) -> Result<Self> {
        let _ = dotenvy::dotenv();
        let mut cfg = GatewayConfig::default();
        let file = cli
            .config_file
            .clone()
            .or_else(|| std::env::var(format!("{ENV_PREFIX}CONFIG")).ok().map(PathBuf::from));
        if let Some(path) = file {
            cfg.apply_file(&path)?;
        }
        cfg.apply_env(|k| std::env::var(k).ok())?;
        cfg.apply_cli(cli);
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_yaml_file(path: &Path) -> Result<Self> {
        let mut cfg = GatewayConfig::default();
        cfg.apply_file(path)?;
        Ok(cfg)
    }

    fn apply_file(&mut self, path: &Path) -> Result<()> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("cannot read {}", path.display()))?;
        self.apply_yaml(&raw)
            .with_context(|| format!("cannot parse {}", path.display()))
    }

    pub fn apply_yaml(&mut self, raw: &str) -> Result<()> {
        let fc: FileConfig = if raw.trim().is_empty() {
            FileConfig::default()
        } else {
            serde_yaml::from_str(raw)?
        };
        if let Some(v) = fc.host {
            self.host = v;
        }
        if let Some(v) = fc.port {
            self.port = v;
        }
        if let Some(v) = fc.workspace {
            self.workspace = v;
        }
        if let Some(v) = fc.model_id {
            self.model_id = v;
        }
        if let Some(v) = fc.backend {
            self.backend = BackendKind::parse(&v)?;
        }
        if fc.backend_cmd.is_some() {
            self.backend_cmd = fc.backend_cmd;
        }
        if fc.backend_url.is_some() {
            self.backend_url = fc.backend_url;
        }
        if fc.backend_model.is_some() {
            self.backend_model = fc.backend_model;
        }
        if let Some(v) = fc.backend_timeout {
            self.backend_timeout = parse_duration(&v)?;
        }
        if let Some(v) = fc.health_timeout {
            self.health_timeout = parse_duration(&v)?;
        }
        if let Some(v) = fc.shell_timeout {
            self.shell_timeout = parse_duration(&v)?;
        }
        if let Some(v) = fc.git_timeout {
            self.git_timeout = parse_duration(&v)?;
        }
        if let Some(v) = fc.read_timeout {
            self.read_timeout = parse_duration(&v)?;
        }
        if let Some(v) = fc.stream_delay_ms {
            self.stream_delay = Duration::from_millis(v);
        }
        if let Some(v) = fc.max_body_bytes {
            self.max_body_bytes = v;
        }
        if let Some(v) = fc.max_prompt_chars {
            self.max_prompt_chars = v;
        }
        if let Some(v) = fc.max_tool_output_chars {
            self.max_tool_output_chars = v;
        }
        if let Some(v) = fc.trace_capacity {
            self.trace_capacity = v;
        }
        Ok(())
    }

    /// Apply `AIFO_GATEWAY_*` variables through `lookup`; empty values are ignored.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| {
            lookup(&format!("{ENV_PREFIX}{name}"))
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
        };
        if let Some(v) = get("HOST") {
            self.host = v;
        }
        if let Some(v) = get("PORT") {
            self.port = v
                .parse()
                .with_context(|| format!("{ENV_PREFIX}PORT: invalid port '{v}'"))?;
        }
        if let Some(v) = get("WORKSPACE") {
            self.workspace = PathBuf::from(v);
        }
        if let Some(v) = get("MODEL_ID") {
            self.model_id = v;
        }
        if let Some(v) = get("BACKEND") {
            self.backend = BackendKind::parse(&v)?;
        }
        if let Some(v) = get("BACKEND_CMD") {
            self.backend_cmd = Some(v);
        }
        if let Some(v) = get("BACKEND_URL") {
            self.backend_url = Some(v);
        }
        if let Some(v) = get("BACKEND_MODEL") {
            self.backend_model = Some(v);
        }
        if let Some(v) = get("BACKEND_API_KEY") {
            self.backend_api_key = Some(v);
        }
        if let Some(v) = get("BACKEND_TIMEOUT") {
            self.backend_timeout = parse_duration(&v)?;
        }
        if let Some(v) = get("SHELL_TIMEOUT") {
            self.shell_timeout = parse_duration(&v)?;
        }
        if let Some(v) = get("STREAM_DELAY_MS") {
            let ms: u64 = v
                .parse()
                .with_context(|| format!("{ENV_PREFIX}STREAM_DELAY_MS: invalid value '{v}'"))?;
            self.stream_delay = Duration::from_millis(ms);
        }
        if let Some(v) = get("MAX_BODY_BYTES") {
            self.max_body_bytes = v
                .parse()
                .with_context(|| format!("{ENV_PREFIX}MAX_BODY_BYTES: invalid value '{v}'"))?;
        }
        if let Some(v) = get("MAX_PROMPT_CHARS") {
            self.max_prompt_chars = v
                .parse()
                .with_context(|| format!("{ENV_PREFIX}MAX_PROMPT_CHARS: invalid value '{v}'"))?;
        }
        if let Some(v) = get("TRACE_CAPACITY") {
            self.trace_capacity = v
                .parse()
                .with_context(|| format!("{ENV_PREFIX}TRACE_CAPACITY: invalid value '{v}'"))?;
        }
        Ok(())
    }

    pub fn apply_cli(&mut self, cli: &CliOverrides) {
        if let Some(v) = &cli.host {
            self.host = v.clone();
        }
        if let Some(v) = cli.port {
            self.port = v;
        }
        if let Some(v) = &cli.workspace {
            self.workspace = v.clone();
        }
        if let Some(v) = cli.backend {
            self.backend = v;
        }
        if cli.backend_cmd.is_some() {
            self.backend_cmd = cli.backend_cmd.clone();
        }
        if cli.backend_url.is_some() {
            self.backend_url = cli.backend_url.clone();
        }
        if cli.backend_model.is_some() {
            self.backend_model = cli.backend_model.clone();
        }
    }

    /// Check invariants and canonicalize the workspace root.
    pub fn validate(&mut self) -> Result<()> {
        if self.max_body_bytes == 0 {
            bail!("max-body-bytes must be greater than zero");
        }
        if self.max_prompt_chars == 0 {
            bail!("max-prompt-chars must be greater than zero");
        }
        if self.trace_capacity == 0 {
            bail!("trace-capacity must be greater than zero");
        }
        if self.backend_timeout.is_zero() {
            bail!("backend-timeout must be greater than zero");
        }
        match self.backend {
            BackendKind::Command if self.backend_cmd.is_none() => {
                bail!("backend 'command' requires --backend-cmd or {ENV_PREFIX}BACKEND_CMD")
            }
            BackendKind::Http if self.backend_url.is_none() => {
                bail!("backend 'http' requires --backend-url or {ENV_PREFIX}BACKEND_URL")
            }
            _ => {}
        }
        self.workspace = fs::canonicalize(&self.workspace).with_context(|| {
            format!("workspace {} is not accessible", self.workspace.display())
        })?;
        if !self.workspace.is_dir() {
            bail!("workspace {} is not a directory", self.workspace.display());
        }
        Ok(())
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
