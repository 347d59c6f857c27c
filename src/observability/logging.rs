//! # Structured Logging
//!
//! Installs the process-wide `tracing` subscriber. `RUST_LOG` takes precedence
//! over the configured level so operators can raise verbosity for one module
//! (`RUST_LOG=secret_broker::secrets::vault=debug`) without touching config.
//!
//! Secret values never reach the log output: providers log keys and paths only,
//! and values travel as [`SecretString`](crate::secrets::SecretString), whose
//! `Debug` and `Display` are redacted.

use tracing_subscriber::{fmt, EnvFilter};

use crate::config::LoggingSettings;

/// Build the filter: `RUST_LOG` when set and valid, otherwise `settings.level`.
pub fn env_filter(settings: &LoggingSettings) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&settings.level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install the global subscriber.
///
/// Returns `false` when a subscriber was already installed (for example by a
/// test harness); the existing one is kept.
pub fn init_logging(settings: &LoggingSettings) -> bool {
    let builder = fmt().with_env_filter(env_filter(settings)).with_target(true);

    let installed = if settings.json {
        builder.json().with_current_span(true).try_init()
    } else {
        builder.try_init()
    };

    installed.is_ok()
}
