#![forbid(unsafe_code)]

//! Logging helpers.
//!
//! The runtime only emits `tracing` events. Applications choose where they
//! go; with the `subscriber` feature enabled, [`init_subscriber`] installs a
//! formatted subscriber filtered by [`RuntimeConfig::log_filter`].

use std::any::Any;

#[cfg(feature = "subscriber")]
use crate::config::RuntimeConfig;

/// Best-effort text of a caught panic payload.
#[must_use]
pub fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "unknown panic"
    }
}

/// Install a global `fmt` subscriber using the configured filter.
///
/// # Errors
///
/// Fails if the filter directive does not parse or a global subscriber is
/// already installed.
#[cfg(feature = "subscriber")]
pub fn init_subscriber(
    config: &RuntimeConfig,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_new(&config.log_filter)?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
}
