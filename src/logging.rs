//! Structured logging setup, mirroring the teacher's `tracing_subscriber`
//! bootstrap in `main.rs`: an `EnvFilter` seeded from `--log-level`
//! (overridable via `RUST_LOG`), optionally teed to a log file through a
//! non-blocking writer.

use tracing_subscriber::EnvFilter;

/// Keeps the non-blocking file writer's worker thread alive for the
/// process lifetime; drop it only at shutdown.
pub struct LoggingGuard(#[allow(dead_code)] Option<tracing_appender::non_blocking::WorkerGuard>);

pub fn init(log_level: &str, log_file: Option<&std::path::Path>) -> LoggingGuard {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    match log_file {
        Some(path) => {
            let dir = path.parent().filter(|p| !p.as_os_str().is_empty());
            let file_name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "ble-proxyd.log".to_string());
            let appender = tracing_appender::rolling::never(
                dir.unwrap_or_else(|| std::path::Path::new(".")),
                file_name,
            );
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(writer)
                .init();
            LoggingGuard(Some(guard))
        }
        None => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
            LoggingGuard(None)
        }
    }
}
