//! Logging initialisation and span helpers.
//!
//! Structured logging goes through `tracing`; binaries and test harnesses call
//! [`init_logging`] once at startup.

use std::sync::Once;
use tracing::Span;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

static INIT: Once = Once::new();

/// Log output format.
#[derive(Debug, Clone, Copy, Default)]
pub enum LogFormat {
    /// JSON structured logs (for production).
    Json,
    /// Pretty-printed logs (for development).
    #[default]
    Pretty,
}

/// Initializes the logging subsystem.
///
/// Safe to call multiple times; subsequent calls are no-ops. Levels are
/// controlled through `RUST_LOG` (e.g. `info`, `sediment_statestore=debug`).
pub fn init_logging(format: LogFormat) {
    INIT.call_once(|| {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        // try_init: a test harness may already have installed a subscriber
        let _ = match format {
            LogFormat::Json => tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json())
                .try_init(),
            LogFormat::Pretty => tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().pretty())
                .try_init(),
        };
    });
}

/// Creates a span for state store operations with standard fields.
#[must_use]
pub fn statestore_span(operation: &str, table_id: &str) -> Span {
    tracing::info_span!("statestore", op = operation, table = table_id)
}

/// Creates a span for garbage collection runs.
#[must_use]
pub fn gc_span(run_id: &str) -> Span {
    tracing::info_span!("gc", run_id = run_id)
}
