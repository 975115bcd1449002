//! Log output for binaries and tests embedding the pipeline.
//!
//! Library code logs through the `log` macros; [`init_logging`] routes those
//! records into a `tracing` fmt subscriber.

use tracing_subscriber::EnvFilter;

/// Install the global subscriber. `filter` uses `RUST_LOG` syntax and is
/// used when `RUST_LOG` is unset. Returns `false` if a subscriber or logger
/// was already installed, in which case nothing changes.
pub fn init_logging(filter: &str) -> bool {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_ansi(false)
        .finish();

    if tracing::subscriber::set_global_default(subscriber).is_err() {
        return false;
    }
    tracing_log::LogTracer::init().is_ok()
}
