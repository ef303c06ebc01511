//! Logging setup
//!
//! Console output through `tracing-subscriber`, with an optional daily
//! rolling file appender. Initialization is idempotent so tests can call
//! it freely.

use std::path::Path;
use std::sync::Once;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::fmt::time::LocalTime;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Registry};

static LOGGER_INIT: Once = Once::new();

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Console-only logging. Used by the test suites and as the fallback when no
/// log directory is configured.
pub fn init() {
    LOGGER_INIT.call_once(|| {
        let _ = Registry::default()
            .with(env_filter())
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_timer(LocalTime::rfc_3339()),
            )
            .try_init();
    });
}

/// Console plus a daily rolling file under `log_dir`. The returned guard
/// must be held for the lifetime of the process or buffered lines are lost.
pub fn init_with_file<P: AsRef<Path>>(log_dir: P) -> std::io::Result<Option<WorkerGuard>> {
    std::fs::create_dir_all(log_dir.as_ref())?;
    let mut guard = None;

    LOGGER_INIT.call_once(|| {
        let file_appender = rolling::daily(log_dir.as_ref(), "edgescope.log");
        let (file_writer, file_guard) = non_blocking(file_appender);

        let console_layer = tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_timer(LocalTime::rfc_3339());
        let file_layer = tracing_subscriber::fmt::layer()
            .with_writer(file_writer)
            .with_target(true)
            .with_ansi(false)
            .with_timer(LocalTime::rfc_3339());

        let _ = Registry::default()
            .with(env_filter())
            .with(console_layer)
            .with(file_layer)
            .try_init();

        guard = Some(file_guard);
    });

    Ok(guard)
}
