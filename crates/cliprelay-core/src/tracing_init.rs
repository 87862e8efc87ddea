//! Tracing/logging initialization for the relay binary.

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Crates whose events pass the default filter.
const RELAY_TARGETS: &[&str] = &["cliprelay_core", "cliprelay_daemon"];

/// Build the default filter directive for the relay crates, e.g.
/// `"cliprelay_core=info,cliprelay_daemon=info"`.
pub fn default_directive(log_level: &str) -> String {
    RELAY_TARGETS
        .iter()
        .map(|target| format!("{target}={log_level}"))
        .collect::<Vec<_>>()
        .join(",")
}

/// Initialise the global tracing subscriber.
///
/// * `log_level` -- level applied to the relay crates when `RUST_LOG` is not set.
/// * `log_json` -- when `true`, emit structured JSON log lines instead of the
///   human-readable format.
pub fn init_tracing(log_level: &str, log_json: bool) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(log_level)));
    let registry = tracing_subscriber::registry().with(env_filter);
    if log_json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_target(true))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_target(false))
            .init();
    }
}
