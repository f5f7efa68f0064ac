//! Debug logging utilities.

use std::sync::atomic::{AtomicBool, Ordering};

use tracing_subscriber::EnvFilter;

/// Global debug flag.
static DEBUG_ENABLED: AtomicBool = AtomicBool::new(false);

/// Environment variable for debug mode.
pub const GSBX_DEBUG_ENV: &str = "GSBX_DEBUG";

/// Initialize logging, at debug level when `force_debug` is set or `GSBX_DEBUG` is present.
pub fn init_debug_logging(force_debug: bool) {
    let debug_enabled = force_debug || std::env::var(GSBX_DEBUG_ENV).is_ok();
    DEBUG_ENABLED.store(debug_enabled, Ordering::SeqCst);

    let filter = if debug_enabled {
        EnvFilter::new("grading_sandbox=debug,gsbx=debug,warn")
    } else {
        EnvFilter::new("grading_sandbox=info,gsbx=info,warn")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(debug_enabled)
        .with_level(true)
        .with_writer(std::io::stderr)
        .try_init()
        .ok();
}

/// Check if debug mode is enabled.
pub fn is_debug_enabled() -> bool {
    DEBUG_ENABLED.load(Ordering::SeqCst)
}
