//! Logging setup: a `tracing` fmt subscriber on stderr, filtered by `RUST_LOG` when set.
//!
//! Idempotent; the first call wins. Tests and embedders may skip it entirely, every
//! `tracing` macro is a no-op without a subscriber.
use std::env;

use once_cell::sync::OnceCell;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

static INIT: OnceCell<()> = OnceCell::new();

fn default_directive(verbose: bool) -> &'static str {
    if verbose {
        "aifo_gateway=debug,info"
    } else {
        "info"
    }
}

/// Install the global subscriber. `verbose` lowers the default level to debug for this crate;
/// an explicit `RUST_LOG` always takes precedence.
pub fn telemetry_init(verbose: bool) {
    INIT.get_or_init(|| {
        let filter = env::var("RUST_LOG")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .and_then(|s| EnvFilter::try_new(s).ok())
            .unwrap_or_else(|| EnvFilter::new(default_directive(verbose)));
        let layer = fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false)
            .with_ansi(atty::is(atty::Stream::Stderr));
        // Another subscriber may already be installed by an embedding application.
        let _ = tracing_subscriber::registry()
            .with(filter)
            .with(layer)
            .try_init();
    });
}

/// Build metadata baked in by build.rs, logged once at startup.
pub fn log_build_info() {
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        build = env!("AIFO_GATEWAY_BUILD_DATE"),
        target = env!("AIFO_GATEWAY_BUILD_TARGET"),
        profile = env!("AIFO_GATEWAY_BUILD_PROFILE"),
        rustc = env!("AIFO_GATEWAY_BUILD_RUSTC"),
        "aifo-gateway: starting"
    );
}
