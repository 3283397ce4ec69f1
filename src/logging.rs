//! # Logging
//!
//! Every lifecycle transition is reported through `tracing`: `debug!` for
//! state changes, `warn!` for recoverable failures, `error!` for metadata the
//! loader rejected. With the `profiling` feature, `poll_load` and
//! `load_resource` also open spans.
//!
//! ```toml
//! [dependencies]
//! resource_lifecycle = { version = "0.3", features = ["profiling"] }
//! ```
//!
//! ```ignore
//! resource_lifecycle::logging::init()?;
//! // or keep the returned guard alive for the whole run
//! let _guard = resource_lifecycle::logging::init_to_file("logs")?;
//! ```
//!
//! Filtering follows `RUST_LOG`, e.g. `RUST_LOG=resource_lifecycle=debug`.

use crate::error::{ResourceError, Result};
use std::path::Path;
use tracing::level_filters::LevelFilter;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn env_filter() -> Result<EnvFilter> {
    let default = if cfg!(debug_assertions) {
        "resource_lifecycle=debug"
    } else {
        "resource_lifecycle=info"
    };
    let directive = default
        .parse()
        .map_err(|e| ResourceError::Config(format!("bad log directive: {e}")))?;
    EnvFilter::builder()
        .with_default_directive(LevelFilter::WARN.into())
        .from_env()
        .map(|filter| filter.add_directive(directive))
        .map_err(|e| ResourceError::Config(format!("bad RUST_LOG: {e}")))
}

/// Install a stderr subscriber. Call once, early.
pub fn init() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .with(env_filter()?)
        .try_init()
        .map_err(|e| ResourceError::Config(e.to_string()))
}

/// Install a subscriber writing JSON lines to a daily file under `dir`.
///
/// Keep the guard alive; dropping it flushes and stops the writer.
pub fn init_to_file(dir: impl AsRef<Path>) -> Result<WorkerGuard> {
    let appender = tracing_appender::rolling::daily(dir.as_ref(), "resources.log");
    let (writer, guard) = tracing_appender::non_blocking(appender);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(writer),
        )
        .with(env_filter()?)
        .try_init()
        .map_err(|e| ResourceError::Config(e.to_string()))?;
    Ok(guard)
}
