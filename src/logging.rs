//! Tracing subscriber setup.
//!
//! The library itself only emits `tracing` events. Applications that do not
//! install their own subscriber can call [`init`] (human readable) or
//! [`init_json`] (one JSON object per line). The filter comes from
//! `RUST_LOG`, defaulting to `info`. Both are safe to call more than once.

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

fn filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install a stdout subscriber.
///
/// Returns false if a global subscriber was already set.
pub fn init() -> bool {
    tracing_subscriber::registry()
        .with(filter())
        .with(fmt::layer().with_target(true))
        .try_init()
        .is_ok()
}

/// Install a stdout subscriber emitting JSON lines.
///
/// Returns false if a global subscriber was already set.
pub fn init_json() -> bool {
    tracing_subscriber::registry()
        .with(filter())
        .with(fmt::layer().json().with_current_span(false))
        .try_init()
        .is_ok()
}
