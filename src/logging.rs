//! # Structured Logging
//!
//! Console tracing setup shared by the library and the `config-validator` binary.
//!
//! The environment is read from `AUDIT_ENV` (falling back to `APP_ENV`, then
//! `development`). The filter comes from `LOG_LEVEL`, then `RUST_LOG`, then an
//! environment default. Setting `AUDIT_LOG_FORMAT=json` switches the console
//! layer to one JSON object per event.

use std::io::IsTerminal;
use std::sync::OnceLock;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

static TRACING_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Output format of the console layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

/// Initialize console logging once per process.
///
/// Safe to call repeatedly and from tests: if another subscriber is already
/// installed the existing one is kept.
pub fn init_tracing() {
    TRACING_INITIALIZED.get_or_init(|| {
        let environment = get_environment();
        let log_level = get_log_level(&environment);
        let format = get_log_format();

        // Colors only when a human is watching
        let use_ansi = format == LogFormat::Pretty && std::io::stdout().is_terminal();

        let filter = EnvFilter::try_new(&log_level).unwrap_or_else(|_| EnvFilter::new("info"));

        let layer = match format {
            LogFormat::Json => fmt::layer()
                .json()
                .with_target(true)
                .with_thread_ids(true)
                .with_current_span(false)
                .with_filter(filter)
                .boxed(),
            LogFormat::Pretty => fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_level(true)
                .with_ansi(use_ansi)
                .with_filter(filter)
                .boxed(),
        };

        let subscriber = tracing_subscriber::registry().with(layer);

        if subscriber.try_init().is_err() {
            tracing::debug!(
                "Global tracing subscriber already initialized - continuing with existing subscriber"
            );
        } else {
            info!(
                environment = %environment,
                log_level = %log_level,
                format = ?format,
                ansi_colors = use_ansi,
                "Console logging initialized"
            );
        }
    });
}

/// Current environment name
fn get_environment() -> String {
    std::env::var("AUDIT_ENV")
        .or_else(|_| std::env::var("APP_ENV"))
        .unwrap_or_else(|_| "development".to_string())
}

/// Filter directive from explicit variables or the environment default
fn get_log_level(environment: &str) -> String {
    if let Ok(level) = std::env::var("LOG_LEVEL") {
        return level.to_lowercase();
    }

    if let Ok(level) = std::env::var("RUST_LOG") {
        return level.to_lowercase();
    }

    match environment {
        "production" => "info".to_string(),
        _ => "debug".to_string(),
    }
}

fn get_log_format() -> LogFormat {
    match std::env::var("AUDIT_LOG_FORMAT") {
        Ok(format) if format.eq_ignore_ascii_case("json") => LogFormat::Json,
        _ => LogFormat::Pretty,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Environment variables are process-wide
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn test_environment_detection() {
        let _guard = ENV_LOCK.lock().unwrap();
        std::env::set_var("AUDIT_ENV", "test");
        assert_eq!(get_environment(), "test");
        std::env::remove_var("AUDIT_ENV");
    }

    #[test]
    fn test_log_level_mapping() {
        let _guard = ENV_LOCK.lock().unwrap();
        std::env::remove_var("LOG_LEVEL");
        std::env::remove_var("RUST_LOG");

        assert_eq!(get_log_level("test"), "debug");
        assert_eq!(get_log_level("development"), "debug");
        assert_eq!(get_log_level("production"), "info");
        assert_eq!(get_log_level("unknown"), "debug");

        std::env::set_var("LOG_LEVEL", "INFO");
        assert_eq!(get_log_level("development"), "info");

        // RUST_LOG loses to LOG_LEVEL
        std::env::set_var("RUST_LOG", "trace");
        assert_eq!(get_log_level("development"), "info");

        std::env::remove_var("LOG_LEVEL");
        std::env::set_var("RUST_LOG", "WARN");
        assert_eq!(get_log_level("test"), "warn");

        std::env::remove_var("RUST_LOG");
    }

    #[test]
    fn test_log_format_selection() {
        let _guard = ENV_LOCK.lock().unwrap();
        std::env::remove_var("AUDIT_LOG_FORMAT");
        assert_eq!(get_log_format(), LogFormat::Pretty);

        std::env::set_var("AUDIT_LOG_FORMAT", "JSON");
        assert_eq!(get_log_format(), LogFormat::Json);

        std::env::remove_var("AUDIT_LOG_FORMAT");
    }

    #[test]
    fn test_init_is_idempotent() {
        init_tracing();
        init_tracing();
        assert!(TRACING_INITIALIZED.get().is_some());
    }
}
