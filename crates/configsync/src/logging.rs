//! Subscriber setup for processes embedding the engine.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

use crate::config::{LogFormat, LogSettings};
use crate::error::ConfigError;

/// Installs the global subscriber. `RUST_LOG` takes precedence over
/// `settings.level`; `log` records are bridged into the same output.
///
/// Returns `Ok(false)` when a global subscriber was already installed.
pub fn init(settings: &LogSettings) -> Result<bool, ConfigError> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&settings.level)
            .map_err(|e| ConfigError::Logging(format!("invalid level '{}': {e}", settings.level)))?,
    };

    let layer = match settings.format {
        LogFormat::Text => fmt::layer().with_target(false).boxed(),
        LogFormat::Json => fmt::layer().json().with_current_span(true).boxed(),
    };

    Ok(tracing_subscriber::registry()
        .with(filter)
        .with(layer)
        .try_init()
        .is_ok())
}
