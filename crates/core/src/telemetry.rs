// Telemetry Module
//
// Installs the tracing subscriber used by every coldstart binary:
// - Env-filter driven log levels (RUST_LOG / LOG_LEVEL)
// - Human-readable or JSON line output (LOG_FORMAT)
// - Engine stdout/stderr is re-emitted under the `engine` target
// - Logs go to stderr; stdout is reserved for command output

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Target used for re-emitted engine output
pub const ENGINE_LOG_TARGET: &str = "engine";

// ============================================================================
// Telemetry Configuration
// ============================================================================

/// Output format for log lines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    /// One JSON object per line (what log collectors on hosted runtimes expect)
    Json,
}

/// Configuration for logging
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Service name attached to the startup log line
    pub service_name: String,
    /// Log filter (e.g., "info", "debug", "coldstart_supervisor=debug")
    pub log_filter: Option<String>,
    pub format: LogFormat,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "coldstart".to_string(),
            log_filter: None,
            format: LogFormat::Text,
        }
    }
}

impl TelemetryConfig {
    /// Create configuration from environment variables
    ///
    /// Environment variables:
    /// - `SERVICE_NAME`: Service name (default: "coldstart")
    /// - `RUST_LOG` or `LOG_LEVEL`: Log filter
    /// - `LOG_FORMAT`: "text" (default) or "json"
    pub fn from_env() -> Self {
        Self {
            service_name: std::env::var("SERVICE_NAME").unwrap_or_else(|_| "coldstart".to_string()),
            log_filter: std::env::var("RUST_LOG")
                .ok()
                .or_else(|| std::env::var("LOG_LEVEL").ok()),
            format: std::env::var("LOG_FORMAT")
                .map(|v| parse_format(&v))
                .unwrap_or_default(),
        }
    }
}

fn parse_format(raw: &str) -> LogFormat {
    match raw.trim().to_lowercase().as_str() {
        "json" => LogFormat::Json,
        _ => LogFormat::Text,
    }
}

// ============================================================================
// Initialization
// ============================================================================

/// Install the global tracing subscriber
///
/// Calling this more than once is harmless; later calls are ignored.
///
/// # Example
///
/// ```ignore
/// use coldstart_core::telemetry::{init_telemetry, TelemetryConfig};
///
/// #[tokio::main]
/// async fn main() {
///     init_telemetry(TelemetryConfig::from_env());
///     // ... your application code
/// }
/// ```
pub fn init_telemetry(config: TelemetryConfig) {
    // Build log filter
    let filter = config
        .log_filter
        .as_ref()
        .and_then(|f| EnvFilter::try_new(f).ok())
        .unwrap_or_else(|| EnvFilter::new("info"));

    let layer = match config.format {
        LogFormat::Text => tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_filter(filter)
            .boxed(),
        LogFormat::Json => tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_current_span(true)
            .with_target(true)
            .with_filter(filter)
            .boxed(),
    };

    if tracing_subscriber::registry().with(layer).try_init().is_err() {
        return;
    }

    tracing::debug!(
        service = %config.service_name,
        format = ?config.format,
        "Telemetry initialized"
    );
}
