//! Structured logging bootstrap.
//!
//! Components log through `tracing` with `chat_id`, `generation`, `attempt`
//! and `index` fields. The host application installs a subscriber once at
//! startup; `RUST_LOG` takes precedence over the configured level.

use tracing_subscriber::EnvFilter;

fn filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
}

/// Initialize the global tracing subscriber with human-readable stderr output.
///
/// Subsequent calls are no-ops.
///
/// # Arguments
///
/// * `level` - Minimum level (or full filter directive), e.g. `"warn"`.
pub fn init_subscriber(level: &str) {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter(level))
        .with_target(true)
        .with_writer(std::io::stderr)
        .compact();

    // try_init fails (harmlessly) if a global subscriber is already set
    if subscriber.try_init().is_ok() {
        tracing::debug!(level, "logging initialized");
    }
}

/// Initialize the global tracing subscriber with JSON lines on stderr.
///
/// Meant for hosts that ship logs to a collector. Subsequent calls are no-ops.
pub fn init_subscriber_json(level: &str) {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter(level))
        .with_target(true)
        .with_writer(std::io::stderr)
        .json();

    if subscriber.try_init().is_ok() {
        tracing::debug!(level, format = "json", "logging initialized");
    }
}
