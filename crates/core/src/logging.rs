//! Logging initialization and configuration.

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Filter used when neither `RUST_LOG` nor the config provides one.
pub const DEFAULT_LOG_FILTER: &str = "info,kiln=debug";

/// Initialize the logging system with tracing.
///
/// `RUST_LOG` takes precedence; otherwise `default_directives` is used
/// (typically `EngineConfig::logging.filter`). Invalid directives fall back
/// to [`DEFAULT_LOG_FILTER`].
///
/// Calling this more than once is harmless; later calls are ignored.
///
/// # Example
/// ```
/// kiln_core::init_logging(kiln_core::DEFAULT_LOG_FILTER);
/// tracing::info!("Engine starting");
/// ```
pub fn init_logging(default_directives: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_directives))
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .try_init();
}
