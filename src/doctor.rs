use std::path::PathBuf;
use std::process::Command;

use aifo_gateway::{brain_from_config, tools, CliOverrides, GatewayConfig};

fn paint(s: &str) -> String {
    if atty::is(atty::Stream::Stderr) {
        format!("\x1b[34;1m{}\x1b[0m", s)
    } else {
        s.to_string()
    }
}

fn program_line(name: &str, version_arg: &str) -> String {
    match which::which(name) {
        Ok(p) => {
            let version = Command::new(&p)
                .arg(version_arg)
                .output()
                .ok()
                .map(|o| String::from_utf8_lossy(&o.stdout).trim().to_string())
                .filter(|s| !s.is_empty());
            match version {
                Some(v) => format!("{} ({})", p.display(), v),
                None => p.display().to_string(),
            }
        }
        Err(_) => "not found".to_string(),
    }
}

/// Print environment diagnostics to stderr. Returns false when the configuration cannot load.
pub fn run_doctor(verbose: bool, config_file: Option<PathBuf>) -> bool {
    let version = env!("CARGO_PKG_VERSION");
    eprintln!("aifo-gateway doctor");
    eprintln!();
    eprintln!("  version: v{}", version);
    eprintln!(
        "  host:    {} / {}",
        std::env::consts::OS,
        std::env::consts::ARCH
    );
    eprintln!("  build:   {}", env!("AIFO_GATEWAY_BUILD_DATE"));
    eprintln!();

    eprintln!("  sh:  {}", paint(&program_line("sh", "--version")));
    eprintln!("  git: {}", paint(&program_line("git", "--version")));
    eprintln!();

    let overrides = CliOverrides {
        config_file,
        ..Default::default()
    };
    let cfg = match GatewayConfig::load(&overrides) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("  configuration: {}", paint("invalid"));
            eprintln!("    {:#}", e);
            eprintln!();
            return false;
        }
    };

    eprintln!("  listen:    {}", paint(&cfg.bind_addr()));
    eprintln!("  workspace: {}", paint(&cfg.workspace.display().to_string()));
    eprintln!("  model id:  {}", paint(&cfg.model_id));
    eprintln!("  backend:   {}", paint(cfg.backend.as_str()));
    match brain_from_config(&cfg) {
        Ok(brain) => {
            let state = if brain.health_check() {
                "healthy"
            } else {
                "unhealthy"
            };
            eprintln!("  backend health: {}", paint(state));
        }
        Err(e) => eprintln!("  backend health: {} ({:#})", paint("unavailable"), e),
    }

    if verbose {
        eprintln!();
        eprintln!(
            "  timeouts: backend={:?} health={:?} shell={:?} git={:?}",
            cfg.backend_timeout, cfg.health_timeout, cfg.shell_timeout, cfg.git_timeout
        );
        eprintln!(
            "  limits:   body={} header={} prompt_chars={} tool_output_chars={}",
            cfg.max_body_bytes, cfg.max_header_bytes, cfg.max_prompt_chars, cfg.max_tool_output_chars
        );
        let names: Vec<&str> = tools::catalog().iter().map(|t| t.name).collect();
        eprintln!("  tools:    {}", names.join(", "));
    }
    eprintln!();
    true
}
