//! Log output setup for the command line tool.

use std::sync::OnceLock;

use tracing::debug;
use tracing_subscriber::{fmt, EnvFilter};

static LOGGING_INIT: OnceLock<()> = OnceLock::new();

/// Install the global log subscriber with `level` as the default filter, e.g. `info` or
/// `light_minded=debug`. `RUST_LOG` overrides it if set. Later calls do nothing.
pub fn init_logging(level: &str) {
    if LOGGING_INIT.get().is_some() {
        return;
    }
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let installed = fmt::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .try_init()
        .is_ok();
    LOGGING_INIT.set(()).ok();
    if installed {
        debug!("Logging initialized with default level '{}'", level);
    }
}
