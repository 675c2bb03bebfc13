//! Process-wide tracing setup.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

pub use tracing_subscriber::util::TryInitError;

use crate::config::LoggingConfig;

/// Install the global tracing subscriber.
///
/// `RUST_LOG` takes precedence over `config.level`. Only the first call in a
/// process succeeds; later calls return an error and leave the installed
/// subscriber untouched.
pub fn init_logging(config: &LoggingConfig) -> Result<(), TryInitError> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(config)));

    let fmt_layer = if config.json_format {
        tracing_subscriber::fmt::layer()
            .json()
            .flatten_event(true)
            .with_current_span(true)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer().boxed()
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init()
}

/// Filter directives used when `RUST_LOG` is unset.
pub fn default_directives(config: &LoggingConfig) -> String {
    let level = config.level.trim().to_lowercase();
    // Trace layer output stays off unless RUST_LOG asks for it.
    format!("{level},tower_http=warn")
}

#[cfg(test)]
#[path = "logging_tests.rs"]
mod tests;
