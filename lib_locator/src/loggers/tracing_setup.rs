use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Debug, Error)]
pub enum LoggerError {
    #[error("Log directory error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid log filter: {0}")]
    Filter(String),
    #[error("Failed to install the global subscriber: {0}")]
    Init(String),
}

/// Installs the global `tracing` subscriber.
///
/// `RUST_LOG` wins over `log_level` when set. With a `log_dir` a fresh
/// `<app>_<timestamp>.log` file receives a plain-text copy of every event;
/// the returned guard must be kept alive for the file writer to flush.
pub fn init_tracing(
    app_name: &str,
    log_dir: Option<&Path>,
    log_level: &str,
) -> Result<Option<WorkerGuard>, LoggerError> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(log_level).map_err(|e| LoggerError::Filter(e.to_string()))?,
    };
    let console = fmt::layer().with_target(true);

    match log_dir {
        Some(dir) => {
            let log_path = prepare_log_file(app_name, dir)?;
            let file_name = log_path
                .file_name()
                .map(|name| name.to_os_string())
                .unwrap_or_else(|| format!("{}.log", app_name).into());
            let appender = tracing_appender::rolling::never(dir, file_name);
            let (writer, guard) = tracing_appender::non_blocking(appender);

            tracing_subscriber::registry()
                .with(filter)
                .with(console)
                .with(fmt::layer().with_ansi(false).with_writer(writer))
                .try_init()
                .map_err(|e| LoggerError::Init(e.to_string()))?;
            Ok(Some(guard))
        }
        None => {
            tracing_subscriber::registry()
                .with(filter)
                .with(console)
                .try_init()
                .map_err(|e| LoggerError::Init(e.to_string()))?;
            Ok(None)
        }
    }
}

/// Creates the directory if needed, prunes old logs and returns the path of
/// the file this process will write.
fn prepare_log_file(app_name: &str, log_dir: &Path) -> Result<PathBuf, LoggerError> {
    if !log_dir.exists() {
        fs::create_dir_all(log_dir)?;
    }

    cleanup_old_logs(log_dir)?;

    let log_file_name = format!("{}_{}.log", app_name, chrono::Local::now().format("%Y-%m-%d_%H-%M-%S"));
    Ok(log_dir.join(log_file_name))
}

/// Keeps only the most recently modified `*.log` file in `log_dir`.
pub(crate) fn cleanup_old_logs(log_dir: &Path) -> Result<(), LoggerError> {
    let mut entries: Vec<_> = fs::read_dir(log_dir)?
        .filter_map(|res| res.ok())
        .filter(|e| e.path().extension().is_some_and(|ext| ext == "log"))
        .filter_map(|e| {
            let modified = e.metadata().and_then(|m| m.modified()).ok()?;
            Some((modified, e.path()))
        })
        .collect();

    // Newest first
    entries.sort_by(|a, b| b.0.cmp(&a.0));

    for (_, path) in entries.iter().skip(1) {
        if let Err(e) = fs::remove_file(path) {
            eprintln!("Failed to delete old log file {:?}: {}", path, e);
        }
    }

    Ok(())
}
