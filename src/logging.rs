//! Tracing setup for applications embedding Moorings.
//!
//! All crates in the workspace log through `tracing`. This module builds the
//! subscriber: the filter comes from `MOORINGS_LOG` (default `info`) and
//! `MOORINGS_LOG_FORMAT=json` switches to JSON lines.

use tracing::Subscriber;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

/// Variable holding the `EnvFilter` directives.
pub const FILTER_ENV: &str = "MOORINGS_LOG";

/// Variable selecting the output format.
pub const FORMAT_ENV: &str = "MOORINGS_LOG_FORMAT";

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable lines
    #[default]
    Text,
    /// One JSON object per line
    Json,
}

impl LogFormat {
    /// Parse a format name. Anything but `json` is text.
    pub fn from_name(name: &str) -> Self {
        if name.trim().eq_ignore_ascii_case("json") {
            Self::Json
        } else {
            Self::Text
        }
    }

    /// Read the format from `MOORINGS_LOG_FORMAT`.
    pub fn from_env() -> Self {
        std::env::var(FORMAT_ENV)
            .map(|name| Self::from_name(&name))
            .unwrap_or_default()
    }
}

/// Filter from `MOORINGS_LOG`, falling back to `info`.
pub fn filter() -> EnvFilter {
    EnvFilter::try_from_env(FILTER_ENV).unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Build a subscriber with the given format and the environment filter.
pub fn subscriber_with(format: LogFormat) -> Box<dyn Subscriber + Send + Sync> {
    let registry = tracing_subscriber::registry().with(filter());
    match format {
        LogFormat::Json => Box::new(registry.with(fmt::layer().json())),
        LogFormat::Text => Box::new(registry.with(fmt::layer())),
    }
}

/// Build a subscriber configured from the environment.
pub fn subscriber() -> Box<dyn Subscriber + Send + Sync> {
    subscriber_with(LogFormat::from_env())
}

/// Install the environment-configured subscriber globally.
///
/// Returns `false` if a global subscriber was already set.
pub fn init() -> bool {
    tracing::subscriber::set_global_default(subscriber()).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_from_name() {
        assert_eq!(LogFormat::from_name("json"), LogFormat::Json);
        assert_eq!(LogFormat::from_name(" JSON "), LogFormat::Json);
        assert_eq!(LogFormat::from_name("text"), LogFormat::Text);
        assert_eq!(LogFormat::from_name(""), LogFormat::Text);
    }

    #[test]
    fn test_subscribers_accept_events() {
        for format in [LogFormat::Text, LogFormat::Json] {
            tracing::subscriber::with_default(subscriber_with(format), || {
                tracing::info!(session_id = "1234", "Logging check");
            });
        }
    }
}
