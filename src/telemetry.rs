//! Tracing subscriber setup for the CLI.
//!
//! Logs go to stderr so stdout stays clean for `--json` output. When a log
//! directory is given, a daily-rolling file receives the same events in JSON.

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;

const LOG_FILE_PREFIX: &str = "deal-engine.log";

fn default_filter(verbose: bool) -> EnvFilter {
    let level = if verbose { "deal_engine=debug,info" } else { "warn" };
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
}

/// Install the global subscriber.
///
/// The returned guard flushes the file writer on drop and must be held for
/// the lifetime of the process. Calling this twice is harmless; the second
/// call leaves the first subscriber in place.
pub fn init_tracing(verbose: bool, json: bool, log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let (file_layer, guard) = match log_dir {
        Some(dir) if std::fs::create_dir_all(dir).is_ok() => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().json().with_writer(writer).with_ansi(false);
            (Some(layer), Some(guard))
        }
        _ => (None, None),
    };

    let json_layer = json.then(|| fmt::layer().json().with_writer(std::io::stderr));
    let text_layer = (!json).then(|| {
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(verbose)
            .compact()
    });

    let _ = tracing_subscriber::registry()
        .with(default_filter(verbose))
        .with(json_layer)
        .with(text_layer)
        .with(file_layer)
        .try_init();

    guard
}
