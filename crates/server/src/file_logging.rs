//! File-based logging configuration.
//!
//! Console logging is always on. When `SPRINTS_FILE_LOGGING` is set, logs are
//! also written as JSON to daily rotated files.
//!
//! # Configuration
//!
//! - `SPRINTS_FILE_LOGGING`: "true" or "1" enables file logging
//! - `SPRINTS_LOG_DIR`: log directory (default `{data_dir}/logs`)
//! - `SPRINTS_LOG_MAX_FILES`: daily files to keep (default: 7)
//!
//! # Log Format
//!
//! ```json
//! {"timestamp":"2025-12-26T10:30:00Z","level":"INFO","target":"services::services::ingest","message":"Committed snapshot"}
//! ```

use std::path::{Path, PathBuf};

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, Layer, layer::SubscriberExt, util::SubscriberInitExt};
use utils::assets::log_dir;

const LOG_FILE_PREFIX: &str = "sprints.log";

/// Configuration for file logging.
#[derive(Debug, Clone)]
pub struct FileLoggingConfig {
    /// Whether file logging is enabled.
    pub enabled: bool,
    /// Directory to write log files to.
    pub log_dir: PathBuf,
    /// Number of daily log files to retain.
    pub max_files: usize,
}

impl Default for FileLoggingConfig {
    fn default() -> Self {
        let enabled = std::env::var("SPRINTS_FILE_LOGGING")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(false);

        let log_dir = std::env::var("SPRINTS_LOG_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| log_dir());

        let max_files = std::env::var("SPRINTS_LOG_MAX_FILES")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(7);

        Self {
            enabled,
            log_dir,
            max_files,
        }
    }
}

/// Directives enabling `level` for the workspace crates and `warn` elsewhere.
fn crate_filter(level: &str) -> String {
    format!(
        "warn,sprints={level},server={level},services={level},db={level},utils={level}",
        level = level
    )
}

fn env_filter(log_level: &str) -> EnvFilter {
    EnvFilter::try_new(crate_filter(log_level)).unwrap_or_else(|e| {
        eprintln!("Invalid log level '{log_level}' ({e}), falling back to info");
        EnvFilter::new(crate_filter("info"))
    })
}

/// Initialize the logging system with optional file output.
///
/// Hold the returned guard until shutdown so buffered file logs are
/// flushed. `None` when file logging is off.
pub fn init_logging(log_level: &str) -> Option<WorkerGuard> {
    let config = FileLoggingConfig::default();

    let console_layer = tracing_subscriber::fmt::layer().with_filter(env_filter(log_level));

    if config.enabled {
        if let Err(e) = std::fs::create_dir_all(&config.log_dir) {
            eprintln!("Failed to create log directory {:?}: {}", config.log_dir, e);
            tracing_subscriber::registry().with(console_layer).init();
            return None;
        }

        let file_appender = tracing_appender::rolling::daily(&config.log_dir, LOG_FILE_PREFIX);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        let file_layer = tracing_subscriber::fmt::layer()
            .json()
            .with_writer(non_blocking)
            .with_filter(env_filter(log_level));

        tracing_subscriber::registry()
            .with(console_layer)
            .with(file_layer)
            .init();

        tracing::info!(
            log_dir = ?config.log_dir,
            max_files = config.max_files,
            "File logging enabled"
        );

        let log_dir = config.log_dir.clone();
        let max_files = config.max_files;
        std::thread::spawn(move || {
            cleanup_old_logs(&log_dir, max_files);
        });

        Some(guard)
    } else {
        tracing_subscriber::registry().with(console_layer).init();
        None
    }
}

/// Clean up old log files, keeping only the most recent `max_files`.
fn cleanup_old_logs(log_dir: &Path, max_files: usize) {
    let entries = match std::fs::read_dir(log_dir) {
        Ok(entries) => entries,
        Err(_) => return,
    };

    let mut log_files: Vec<_> = entries
        .filter_map(|e| e.ok())
        .filter(|e| {
            e.path()
                .file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.starts_with(LOG_FILE_PREFIX))
                .unwrap_or(false)
        })
        .filter_map(|e| {
            e.metadata()
                .ok()
                .and_then(|m| m.modified().ok())
                .map(|t| (e.path(), t))
        })
        .collect();

    // Newest first.
    log_files.sort_by(|a, b| b.1.cmp(&a.1));

    for (path, _) in log_files.into_iter().skip(max_files) {
        if let Err(e) = std::fs::remove_file(&path) {
            tracing::warn!("Failed to remove old log file {:?}: {}", path, e);
        } else {
            tracing::debug!("Removed old log file: {:?}", path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_scopes_level_to_workspace_crates() {
        let filter = crate_filter("debug");
        assert!(filter.starts_with("warn,"));
        assert!(filter.contains("services=debug"));
        assert!(EnvFilter::try_new(&filter).is_ok());
    }

    #[test]
    fn cleanup_keeps_newest_files() {
        let dir = tempfile::tempdir().unwrap();
        for (i, day) in ["2025-03-01", "2025-03-02", "2025-03-03"].iter().enumerate() {
            let path = dir.path().join(format!("{LOG_FILE_PREFIX}.{day}"));
            std::fs::write(&path, "{}").unwrap();
            let mtime = std::time::SystemTime::UNIX_EPOCH + std::time::Duration::from_secs(1_000 + i as u64);
            std::fs::File::options()
                .write(true)
                .open(&path)
                .unwrap()
                .set_modified(mtime)
                .unwrap();
        }
        std::fs::write(dir.path().join("unrelated.txt"), "").unwrap();

        cleanup_old_logs(dir.path(), 2);

        let mut left: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        left.sort();
        assert_eq!(
            left,
            vec![
                format!("{LOG_FILE_PREFIX}.2025-03-02"),
                format!("{LOG_FILE_PREFIX}.2025-03-03"),
                "unrelated.txt".to_string(),
            ]
        );
    }
}
