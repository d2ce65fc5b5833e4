//! Tracing subscriber setup

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Install a global subscriber
///
/// `RUST_LOG` wins over `default_filter`. Panics if a subscriber is already
/// installed; use [`try_init`] where that can happen.
pub fn init(default_filter: &str) {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter(default_filter))
        .init();
}

/// Install a global subscriber unless one already exists
///
/// Returns false when another subscriber was already installed.
pub fn try_init(default_filter: &str) -> bool {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter(default_filter))
        .try_init()
        .is_ok()
}

fn filter(default_filter: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter))
}
