//! Centralised tracing initialisation for binaries embedding the engine.
//!
//! Call [`init_tracing`] once at process start. Safe to call more than
//! once — the global subscriber can only be installed once per process,
//! so later calls are silently ignored.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Initialise the global tracing subscriber.
///
/// `json` selects newline-delimited JSON output over human-readable text.
/// `level` is the default verbosity when `RUST_LOG` is unset; `RUST_LOG`
/// always takes precedence when present.
pub fn init_tracing(json: bool, level: Level) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));

    if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_target(false).json())
            .try_init()
            .ok();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_target(false))
            .try_init()
            .ok();
    }
}
