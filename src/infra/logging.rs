//! Usage: Process-wide tracing setup for hosts embedding the auth core.
//!
//! Logs go to stderr (stdout usually carries the host's protocol stream) and,
//! optionally, to a daily-rolling file.

use crate::shared::error::AppResult;
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

pub const ENV_LOG_FILTER: &str = "GWS_LOG";
const DEFAULT_FILTER: &str = "info";
const LOG_FILE_PREFIX: &str = "google-workspace-auth.log";

#[derive(Debug, Clone, Default)]
pub struct LoggingOptions {
    /// Directory for the rolling log file; `None` logs to stderr only.
    pub log_dir: Option<PathBuf>,
    /// Filter directive used when neither `GWS_LOG` nor `RUST_LOG` is set.
    pub default_filter: Option<String>,
}

pub(crate) fn resolve_filter_directive(
    gws_log: Option<&str>,
    rust_log: Option<&str>,
    fallback: Option<&str>,
) -> String {
    [gws_log, rust_log, fallback]
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|v| !v.is_empty())
        .unwrap_or(DEFAULT_FILTER)
        .to_string()
}

fn build_filter(directive: &str) -> EnvFilter {
    EnvFilter::try_new(directive).unwrap_or_else(|err| {
        eprintln!("invalid log filter {directive:?} ({err}); using {DEFAULT_FILTER:?}");
        EnvFilter::new(DEFAULT_FILTER)
    })
}

/// Install the global subscriber. Keep the returned guard alive for the life of the
/// process when a log directory is configured, otherwise buffered lines are lost.
pub fn init(options: &LoggingOptions) -> AppResult<Option<WorkerGuard>> {
    let gws_log = std::env::var(ENV_LOG_FILTER).ok();
    let rust_log = std::env::var("RUST_LOG").ok();
    let directive = resolve_filter_directive(
        gws_log.as_deref(),
        rust_log.as_deref(),
        options.default_filter.as_deref(),
    );

    // Bridge `log` records from dependencies; a second init is harmless.
    let _ = tracing_log::LogTracer::init();

    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_filter(build_filter(&directive));

    let (file_layer, guard) = match options.log_dir.as_ref() {
        Some(dir) => {
            std::fs::create_dir_all(dir).map_err(|e| {
                format!(
                    "SYSTEM_ERROR: failed to create log dir {}: {e}",
                    dir.display()
                )
            })?;
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_filter(build_filter(&directive));
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let subscriber = tracing_subscriber::registry()
        .with(stderr_layer)
        .with(file_layer);
    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| format!("SYSTEM_ERROR: tracing subscriber already installed: {e}"))?;

    Ok(guard)
}
