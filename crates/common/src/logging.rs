//! Logging setup and configuration

use serde::{Deserialize, Serialize};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Output format of the fmt layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Multi-field default formatter
    #[default]
    Full,
    /// Single-line compact formatter without targets
    Compact,
}

/// Setup tracing subscriber for the application
///
/// `RUST_LOG` takes precedence over `default_level`.
pub fn setup_logging(default_level: &str, format: LogFormat) -> crate::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .map_err(|e| crate::Error::Config(format!("Invalid log filter: {}", e)))?;

    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Full => registry.with(fmt::layer()).init(),
        LogFormat::Compact => registry
            .with(fmt::layer().compact().with_target(false))
            .init(),
    }

    Ok(())
}
