//! Tracing subscriber setup for binaries.
//!
//! Library code only emits `tracing` events; installing a subscriber is left
//! to the executable.

use tracing_subscriber::{fmt, EnvFilter};

/// Install a global fmt subscriber.
///
/// `RUST_LOG` wins over `default_filter` when set. Calling this twice is
/// harmless; the second call is ignored.
pub fn init_tracing(default_filter: &str, json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let result = if json {
        fmt().with_env_filter(filter).json().with_target(true).try_init()
    } else {
        fmt().with_env_filter(filter).with_target(false).try_init()
    };

    if let Err(e) = result {
        tracing::debug!("tracing subscriber already installed: {}", e);
    }
}
