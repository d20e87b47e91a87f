//! # Structured Logging Module
//!
//! Environment-aware structured logging for the publish and subscribe paths.
//! Console output by default; set `PUBSUB_LOG_FORMAT=json` for JSON lines.

use std::sync::OnceLock;

use chrono::Utc;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize structured logging with environment-specific configuration.
///
/// Safe to call more than once; only the first call installs a subscriber, and
/// an already-installed global subscriber is left in place.
pub fn init_structured_logging() {
    LOGGER_INITIALIZED.get_or_init(|| {
        let environment = get_environment();
        let filter = || {
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(get_log_level(&environment)))
        };

        let json = std::env::var("PUBSUB_LOG_FORMAT")
            .map(|v| v.eq_ignore_ascii_case("json"))
            .unwrap_or(false);

        let console = if json {
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_level(true)
                .json()
                .with_filter(filter())
                .boxed()
        } else {
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_level(true)
                .with_ansi(true)
                .with_filter(filter())
                .boxed()
        };

        if tracing_subscriber::registry().with(console).try_init().is_err() {
            tracing::debug!("Global tracing subscriber already initialized - continuing with existing subscriber");
        }

        tracing::info!(
            pid = std::process::id(),
            environment = %environment,
            json = json,
            "🔧 STRUCTURED LOGGING: Initialized"
        );
    });
}

/// Get current environment from environment variables
fn get_environment() -> String {
    std::env::var("PUBSUB_ENV")
        .or_else(|_| std::env::var("APP_ENV"))
        .unwrap_or_else(|_| "development".to_string())
}

/// Get log level based on environment
fn get_log_level(environment: &str) -> String {
    match environment {
        "production" => "info".to_string(),
        _ => "debug".to_string(),
    }
}

/// Log structured data for publish operations
pub fn log_publish_operation(
    operation: &str,
    topic: &str,
    status: &str,
    attempts: Option<u32>,
    entries: Option<usize>,
    details: Option<&str>,
) {
    tracing::info!(
        operation = %operation,
        topic = %topic,
        status = %status,
        attempts = attempts,
        entries = entries,
        details = details,
        timestamp = %Utc::now().to_rfc3339(),
        "📤 PUBLISH_OPERATION"
    );
}

/// Log structured data for subscription lifecycle events
pub fn log_subscription_operation(
    operation: &str,
    topic: &str,
    consumer_id: &str,
    session_id: Option<&str>,
    status: &str,
    details: Option<&str>,
) {
    tracing::info!(
        operation = %operation,
        topic = %topic,
        consumer_id = %consumer_id,
        session_id = session_id,
        status = %status,
        details = details,
        timestamp = %Utc::now().to_rfc3339(),
        "📥 SUBSCRIPTION_OPERATION"
    );
}

/// Log error with full context
pub fn log_error(component: &str, operation: &str, error: &str, context: Option<&str>) {
    tracing::error!(
        component = %component,
        operation = %operation,
        error = %error,
        context = context,
        timestamp = %Utc::now().to_rfc3339(),
        "❌ ERROR"
    );
}
