//! Observability infrastructure for Strata.
//!
//! Structured logging with consistent spans. This module provides the
//! initialization helper and the span constructors used by the migration
//! engine, so every log line from a run carries its run and phase.

use std::sync::Once;
use tracing::Span;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

static INIT: Once = Once::new();

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// JSON structured logs (for production).
    Json,
    /// Pretty-printed logs (for development).
    #[default]
    Pretty,
}

/// Initializes the logging subsystem.
///
/// Call once at application startup. Safe to call multiple times;
/// subsequent calls are no-ops.
///
/// # Environment Variables
///
/// - `RUST_LOG`: Controls log levels (e.g., `info`, `strata_migrate=debug`)
///
/// # Example
///
/// ```rust
/// use strata_core::observability::{init_logging, LogFormat};
///
/// init_logging(LogFormat::Pretty, "info");
/// ```
pub fn init_logging(format: LogFormat, default_directive: &str) {
    INIT.call_once(|| {
        let env_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(default_directive));

        match format {
            LogFormat::Json => {
                let _ = tracing_subscriber::registry()
                    .with(env_filter)
                    .with(fmt::layer().json().with_writer(std::io::stderr))
                    .try_init();
            }
            LogFormat::Pretty => {
                let _ = tracing_subscriber::registry()
                    .with(env_filter)
                    .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
                    .try_init();
            }
        }
    });
}

/// Creates the span covering one migration run.
///
/// # Example
///
/// ```rust
/// use strata_core::observability::migration_span;
///
/// let span = migration_span("migrate", "01J0000000000000000000000");
/// let _guard = span.enter();
/// ```
#[must_use]
pub fn migration_span(operation: &str, run_id: &str) -> Span {
    tracing::info_span!("migration", op = operation, run_id = run_id)
}

/// Creates the span for work on the destination that belongs to no single
/// run, such as verification or a prefix rollback.
#[must_use]
pub fn destination_span(operation: &str) -> Span {
    tracing::info_span!("destination", op = operation)
}

/// Creates the span covering one entity-type phase within a run.
#[must_use]
pub fn phase_span(entity_type: &str, phase_index: usize) -> Span {
    tracing::info_span!("phase", entity_type = entity_type, index = phase_index)
}
