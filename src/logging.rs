//! Tracing subscriber setup.
//!
//! Logs go to stderr so `focus ask` output on stdout stays clean. The
//! `RUST_LOG` environment variable wins over the default level.

use tracing_subscriber::EnvFilter;

/// Install the global subscriber.
///
/// `default_level` applies when `RUST_LOG` is unset or invalid. Calling
/// this twice is a no-op.
pub fn init_logging(default_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
