use clap::{Parser, Subcommand};
use std::path::PathBuf;

use aifo_gateway::{BackendKind, CliOverrides};

#[derive(Parser, Debug)]
#[command(
    name = "aifo-gateway",
    version,
    about = "OpenAI-compatible HTTP gateway with a workspace-confined tool sandbox"
)]
pub(crate) struct Cli {
    /// Verbose logging (debug level for this crate unless RUST_LOG is set)
    #[arg(long, global = true)]
    pub(crate) verbose: bool,

    #[command(subcommand)]
    pub(crate) command: Agent,
}

#[derive(Subcommand, Debug, Clone)]
pub(crate) enum Agent {
    /// Start the HTTP gateway and serve until interrupted
    Serve(ServeArgs),

    /// Print the tool catalog as OpenAI function definitions
    Tools,

    /// Run environment diagnostics
    Doctor {
        /// Optional YAML configuration file to inspect
        #[arg(long = "config")]
        config: Option<PathBuf>,
    },
}

#[derive(clap::Args, Debug, Clone, Default)]
pub(crate) struct ServeArgs {
    /// YAML configuration file (also AIFO_GATEWAY_CONFIG)
    #[arg(long = "config")]
    pub(crate) config: Option<PathBuf>,

    /// Interface to bind
    #[arg(long)]
    pub(crate) host: Option<String>,

    /// Port to bind (0 picks an ephemeral port)
    #[arg(long)]
    pub(crate) port: Option<u16>,

    /// Directory tools are confined to
    #[arg(long)]
    pub(crate) workspace: Option<PathBuf>,

    /// Backend implementation
    #[arg(long, value_enum)]
    pub(crate) backend: Option<BackendKind>,

    /// Command line for the `command` backend (prompt on stdin, reply on stdout)
    #[arg(long = "backend-cmd")]
    pub(crate) backend_cmd: Option<String>,

    /// Base URL for the `http` backend
    #[arg(long = "backend-url")]
    pub(crate) backend_url: Option<String>,

    /// Upstream model name for the `http` backend
    #[arg(long = "backend-model")]
    pub(crate) backend_model: Option<String>,
}

impl ServeArgs {
    pub(crate) fn to_overrides(&self) -> CliOverrides {
        CliOverrides {
            config_file: self.config.clone(),
            host: self.host.clone(),
            port: self.port,
            workspace: self.workspace.clone(),
            backend: self.backend,
            backend_cmd: self.backend_cmd.clone(),
            backend_url: self.backend_url.clone(),
            backend_model: self.backend_model.clone(),
        }
    }
}
