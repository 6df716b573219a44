//! Tracing subscriber setup
//!
//! Libraries in this workspace only emit `tracing` events; the embedding
//! process decides where they go. These helpers install the same
//! registry + `EnvFilter` + fmt layer stack the daemons use.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install a global subscriber filtered by `RUST_LOG`, falling back to `level`.
///
/// # Panics
/// Panics if a global subscriber is already installed.
pub fn init_logging(level: &str) {
    tracing_subscriber::registry()
        .with(env_filter(level))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Like [`init_logging`] but returns `false` instead of panicking when a
/// subscriber is already set. Intended for tests, which may race to install one.
pub fn try_init_logging(level: &str) -> bool {
    tracing_subscriber::registry()
        .with(env_filter(level))
        .with(tracing_subscriber::fmt::layer().with_test_writer())
        .try_init()
        .is_ok()
}

fn env_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
}
