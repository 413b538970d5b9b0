//! Logging setup for the CLI.

use tracing_subscriber::EnvFilter;

/// Installs the global subscriber: stderr, `RUST_LOG` override, `info` by
/// default and `debug` under `--verbose`. Progress output owns stdout.
pub fn init(verbose: bool) {
    let default_directive = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}
