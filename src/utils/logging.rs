//! Logging configuration for the pipeline.

use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

/// Initialize the logging system.
///
/// `TRADELOOP_LOG` takes precedence over `level` when set. Safe to call more
/// than once; later calls are no-ops.
pub fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_env("TRADELOOP_LOG")
        .unwrap_or_else(|_| EnvFilter::new(level));

    let installed = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .is_ok();

    if installed {
        info!("Logging initialized at level: {}", level);
    }
}

/// Initialize test logging (for use in tests)
pub fn init_test_logging() {
    let _ = fmt()
        .with_env_filter(EnvFilter::new("debug"))
        .with_test_writer()
        .try_init();
}
