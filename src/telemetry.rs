//! Structured logging bootstrap.
//!
//! Host applications that already install a `tracing` subscriber can skip
//! this; calling it twice is harmless.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialise console logging with an env-filter default of
/// `info,kds_engine=debug`. Returns quietly if a global subscriber is
/// already set.
pub fn init() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,kds_engine=debug"));
    let console_layer = fmt::layer().with_target(true);
    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .try_init();
}
