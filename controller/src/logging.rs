//! Diagnostic tracing for the controller.
//!
//! Tracing goes to stderr and is controlled by `RUST_LOG`. The run report
//! (console summary and `--report` JSON) is the product output and is
//! written regardless of the filter.

use tracing_subscriber::EnvFilter;

/// Filter used when `RUST_LOG` is unset or invalid.
pub const DEFAULT_FILTER: &str = "warn";

/// Install the global compact stderr subscriber.
///
/// Later calls are no-ops, so library callers and tests may call it freely.
///
/// # Example
/// ```bash
/// RUST_LOG=automation=debug automation run --manifest tests.toml
/// ```
pub fn init() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .compact()
        .try_init();
}
