//! Schoolhouse logging setup.
//!
//! Every crate logs through `tracing` macros; binaries call [`init_logging`]
//! once at startup to install a `tracing-subscriber` registry.
//!
//! # Configuration
//!
//! - `RUST_LOG`: full filter directive, takes precedence when set
//! - `LOG_LEVEL`: level for Schoolhouse crates when `RUST_LOG` is unset (default: `info`)
//! - `LOG_FORMAT`: `json` for structured output, anything else for compact console output
//!
//! # Example
//!
//! ```no_run
//! schoolhouse_observability::init_logging();
//! tracing::info!("ready");
//! ```

use tracing_subscriber::{EnvFilter, Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Compact,
    Json,
}

impl LogFormat {
    pub fn from_env() -> Self {
        match std::env::var("LOG_FORMAT") {
            Ok(v) if v.eq_ignore_ascii_case("json") => LogFormat::Json,
            _ => LogFormat::Compact,
        }
    }
}

fn default_filter(log_level: &str) -> String {
    format!(
        "schoolhouse={level},schoolhouse_cli={level},schoolhouse_db={level},sqlx=warn,lettre=warn",
        level = log_level
    )
}

/// Installs the global subscriber. Subsequent calls are ignored.
pub fn init_logging() {
    let log_level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter(&log_level)));

    let layer = match LogFormat::from_env() {
        LogFormat::Json => fmt::layer()
            .json()
            .with_target(true)
            .with_current_span(true)
            .with_filter(env_filter)
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .compact()
            .with_target(true)
            .with_file(true)
            .with_line_number(true)
            .with_filter(env_filter)
            .boxed(),
    };

    // try_init so tests and embedding binaries can call this more than once
    let _ = tracing_subscriber::registry().with(layer).try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_filter_mentions_level() {
        let filter = default_filter("debug");
        assert!(filter.starts_with("schoolhouse=debug"));
        assert!(filter.contains("sqlx=warn"));
    }

    #[test]
    fn test_init_logging_is_idempotent() {
        init_logging();
        init_logging();
    }
}
