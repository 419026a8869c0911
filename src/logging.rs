use tracing_subscriber::{fmt, EnvFilter};

use crate::error::LoggingError;

/// Install the fmt subscriber, filtered by `RUST_LOG` (default `info`).
pub fn init() -> Result<(), LoggingError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .map_err(|e| LoggingError(e.to_string()))
}
