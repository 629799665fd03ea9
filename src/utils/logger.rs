//! Logging setup for Whale Alert

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LogFormat;

pub const DEFAULT_FILTER: &str = "info,whale_alert=debug";

/// Initialize the tracing logger (colored text or JSON lines)
pub fn init_logger(format: LogFormat) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Pretty => registry
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false)
                    .with_ansi(true),
            )
            .init(),
        LogFormat::Json => registry
            .with(fmt::layer().json().with_target(true).with_current_span(false))
            .init(),
    }
}

#[macro_export]
macro_rules! log_success {
    ($module:expr, $($arg:tt)*) => {
        tracing::info!(target: $module, "✅ {}", format!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_whale {
    ($($arg:tt)*) => {
        tracing::info!(target: "WHALE", "🐋 {}", format!($($arg)*))
    };
}
