//! Logging setup for the blocksync CLI
//!
//! Console output always goes to stderr. With `--log-file`, a detailed trace
//! log is also written to `<tmp>/blocksync-{session_id}.log`.

use std::path::PathBuf;

use tracing_subscriber::Layer as _;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

/// Keeps the non-blocking file writer flushing until dropped
pub struct LogSession {
    pub log_path: PathBuf,
    _guard: tracing_appender::non_blocking::WorkerGuard,
}

fn console_level(verbose: bool) -> LevelFilter {
    if verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    }
}

/// Install the global subscriber.
///
/// Returns the session when a log file was requested; keep it alive for the
/// duration of the program.
pub fn init(verbose: bool, log_file: bool) -> Option<LogSession> {
    fn console_layer<S>(verbose: bool) -> impl tracing_subscriber::Layer<S>
    where
        S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
    {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false)
            .with_filter(console_level(verbose))
    }

    if !log_file {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(if verbose { "debug" } else { "info" }));
        tracing_subscriber::registry()
            .with(filter)
            .with(console_layer(verbose))
            .init();
        return None;
    }

    let session_id = uuid::Uuid::new_v4();
    let log_filename = format!("blocksync-{session_id}.log");
    let log_dir = std::env::temp_dir();
    let log_path = log_dir.join(&log_filename);

    let file_appender = tracing_appender::rolling::never(&log_dir, &log_filename);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(true)
        .with_thread_names(true)
        .with_file(true)
        .with_line_number(true);

    // Everything from our crates reaches the file; the console layer filters
    // down further on its own.
    let file_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new("warn,blocksync=trace,blocksync_core=trace")
    });

    tracing_subscriber::registry()
        .with(file_filter)
        .with(file_layer)
        .with(console_layer(verbose))
        .init();

    Some(LogSession {
        log_path,
        _guard: guard,
    })
}
