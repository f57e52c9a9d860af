use clap::Parser;
use std::process::ExitCode;

use aifo_gateway::{
    brain_from_config, exit_code_for_error, gateway_start, telemetry, tools, GatewayConfig,
};

mod cli;
mod doctor;

use cli::{Agent, Cli, ServeArgs};

fn run_serve(args: &ServeArgs) -> anyhow::Result<()> {
    let cfg = GatewayConfig::load(&args.to_overrides())?;
    telemetry::log_build_info();
    tracing::info!(
        backend = cfg.backend.as_str(),
        model = %cfg.model_id,
        workspace = %cfg.workspace.display(),
        "serve: configuration loaded"
    );
    let brain = brain_from_config(&cfg)?;
    let handle = gateway_start(cfg, brain)?;
    eprintln!("aifo-gateway listening on {}", handle.url);
    handle.join();
    Ok(())
}

fn print_tools() -> anyhow::Result<()> {
    let rendered = serde_json::to_string_pretty(&tools::catalog_json())?;
    println!("{rendered}");
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    telemetry::telemetry_init(cli.verbose);

    let result = match &cli.command {
        Agent::Serve(args) => run_serve(args),
        Agent::Tools => print_tools(),
        Agent::Doctor { config } => {
            return if doctor::run_doctor(cli.verbose, config.clone()) {
                ExitCode::from(0)
            } else {
                ExitCode::from(1)
            };
        }
    };

    match result {
        Ok(()) => ExitCode::from(0),
        Err(e) => {
            eprintln!("aifo-gateway: {:#}", e);
            ExitCode::from(exit_code_for_error(&e))
        }
    }
}
