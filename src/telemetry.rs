//! Tracing subscriber setup for the CLI and embedding hosts.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tracing_subscriber::layer::{Layer, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Registry};

use crate::config::{FileLoggingConfig, LogFormat, LogRotation, LoggingConfig};

const LOG_FILE_PREFIX: &str = "duplex-session.log";
const FILTER_ENV: &str = "LOG";

#[derive(Clone, Debug)]
pub struct TelemetryConfig {
    pub verbosity: u8,
    pub logging: LoggingConfig,
}

impl TelemetryConfig {
    pub fn new(verbosity: u8, logging: LoggingConfig) -> Self {
        Self { verbosity, logging }
    }
}

/// Keeps the non-blocking file writers alive; drop flushes them.
pub struct TelemetryGuard {
    _guards: Vec<tracing_appender::non_blocking::WorkerGuard>,
}

/// Installs the global subscriber. A second call in the same process is a
/// no-op (the first subscriber stays installed).
pub fn init(config: TelemetryConfig) -> TelemetryGuard {
    let filter = build_filter(config.verbosity, config.logging.filter.as_deref());

    let mut guards = Vec::new();
    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();

    if config.logging.stdout {
        layers.push(build_stdout_layer(config.logging.stdout_format));
    }

    let mut pruned = None;
    let mut file_setup_error = None;
    if config.logging.file.enabled {
        let dir = resolve_log_dir(&config.logging.file);
        match fs::create_dir_all(&dir) {
            Ok(()) => {
                if let Some(max_files) = config.logging.file.retention_max_files {
                    match prune_logs(&dir, LOG_FILE_PREFIX, max_files) {
                        Ok(removed) => pruned = Some(removed),
                        Err(err) => {
                            file_setup_error = Some(format!("log retention failed: {err}"));
                        }
                    }
                }
                let (layer, guard) = build_file_layer(&config.logging.file, &dir);
                layers.push(layer);
                guards.push(guard);
            }
            Err(err) => {
                file_setup_error =
                    Some(format!("log dir init failed for {}: {err}", dir.display()));
            }
        }
    }

    layers.push(Box::new(filter));

    if Registry::default().with(layers).try_init().is_err() {
        tracing::debug!("global subscriber already installed");
    }

    if let Some(removed) = pruned
        && removed > 0
    {
        tracing::info!(removed, "log retention applied");
    }
    if let Some(error) = file_setup_error {
        tracing::warn!("{error}");
    }

    TelemetryGuard { _guards: guards }
}

/// `LOG` wins over the configured filter, which wins over `-v` counting.
fn build_filter(verbosity: u8, configured: Option<&str>) -> EnvFilter {
    if let Ok(raw) = std::env::var(FILTER_ENV)
        && let Ok(filter) = EnvFilter::try_new(&raw)
    {
        return filter;
    }
    if let Some(raw) = configured
        && let Ok(filter) = EnvFilter::try_new(raw)
    {
        return filter;
    }
    EnvFilter::builder()
        .with_default_directive(level_from_verbosity(verbosity).into())
        .parse_lossy("")
}

fn build_stdout_layer(format: LogFormat) -> Box<dyn Layer<Registry> + Send + Sync> {
    match format {
        LogFormat::Tree => Box::new(
            tracing_tree::HierarchicalLayer::new(2).with_writer(std::io::stderr),
        ),
        LogFormat::Pretty => Box::new(
            tracing_subscriber::fmt::layer()
                .pretty()
                .with_writer(std::io::stderr)
                .with_target(true),
        ),
        LogFormat::Compact => Box::new(
            tracing_subscriber::fmt::layer()
                .compact()
                .with_writer(std::io::stderr)
                .with_target(true),
        ),
        LogFormat::Json => Box::new(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_current_span(true),
        ),
    }
}

fn build_file_layer(
    config: &FileLoggingConfig,
    dir: &Path,
) -> (
    Box<dyn Layer<Registry> + Send + Sync>,
    tracing_appender::non_blocking::WorkerGuard,
) {
    let rotation = match config.rotation {
        LogRotation::Daily => tracing_appender::rolling::Rotation::DAILY,
        LogRotation::Hourly => tracing_appender::rolling::Rotation::HOURLY,
        LogRotation::Minutely => tracing_appender::rolling::Rotation::MINUTELY,
        LogRotation::Never => tracing_appender::rolling::Rotation::NEVER,
    };
    let appender =
        tracing_appender::rolling::RollingFileAppender::new(rotation, dir, LOG_FILE_PREFIX);
    let (writer, guard) = tracing_appender::non_blocking(appender);
    let layer: Box<dyn Layer<Registry> + Send + Sync> = match config.format {
        LogFormat::Tree => Box::new(
            tracing_tree::HierarchicalLayer::new(2)
                .with_ansi(false)
                .with_writer(writer),
        ),
        LogFormat::Pretty => Box::new(
            tracing_subscriber::fmt::layer()
                .pretty()
                .with_writer(writer)
                .with_ansi(false),
        ),
        LogFormat::Compact => Box::new(
            tracing_subscriber::fmt::layer()
                .compact()
                .with_writer(writer)
                .with_ansi(false),
        ),
        LogFormat::Json => Box::new(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(writer)
                .with_current_span(true),
        ),
    };
    (layer, guard)
}

fn level_from_verbosity(verbosity: u8) -> tracing::metadata::LevelFilter {
    match verbosity {
        0 => tracing::metadata::LevelFilter::WARN,
        1 => tracing::metadata::LevelFilter::INFO,
        2 => tracing::metadata::LevelFilter::DEBUG,
        _ => tracing::metadata::LevelFilter::TRACE,
    }
}

fn resolve_log_dir(config: &FileLoggingConfig) -> PathBuf {
    config.dir.clone().unwrap_or_else(|| {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join("duplex-session")
            .join("logs")
    })
}

fn prune_logs(dir: &Path, prefix: &str, max_files: usize) -> std::io::Result<usize> {
    let mut entries = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|name| name.to_str()) else {
            continue;
        };
        if !name.starts_with(prefix) {
            continue;
        }
        let meta = entry.metadata()?;
        if !meta.is_file() {
            continue;
        }
        let modified = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
        entries.push((modified, path));
    }
    let doomed = oldest_beyond(entries, max_files);
    let mut removed = 0;
    for path in doomed {
        if fs::remove_file(&path).is_ok() {
            removed += 1;
        }
    }
    Ok(removed)
}

/// Paths to drop so that at most `keep` of the newest remain.
fn oldest_beyond(mut entries: Vec<(SystemTime, PathBuf)>, keep: usize) -> Vec<PathBuf> {
    if entries.len() <= keep {
        return Vec::new();
    }
    entries.sort_by_key(|(modified, _)| *modified);
    let excess = entries.len() - keep;
    entries.drain(..excess).map(|(_, path)| path).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn oldest_files_are_pruned_first() {
        let base = SystemTime::UNIX_EPOCH + Duration::from_secs(10_000);
        let entries = vec![
            (base - Duration::from_secs(5), PathBuf::from("newest.log")),
            (base - Duration::from_secs(9_000), PathBuf::from("old.log")),
            (base - Duration::from_secs(500), PathBuf::from("mid.log")),
        ];
        let removed = oldest_beyond(entries, 1);
        assert_eq!(
            removed,
            vec![PathBuf::from("old.log"), PathBuf::from("mid.log")]
        );
    }

    #[test]
    fn nothing_pruned_under_the_cap() {
        let entries = vec![(SystemTime::UNIX_EPOCH, PathBuf::from("only.log"))];
        assert!(oldest_beyond(entries, 10).is_empty());
    }

    #[test]
    fn prune_ignores_foreign_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        for name in ["duplex-session.log.1", "duplex-session.log.2", "other.txt"] {
            fs::write(dir.path().join(name), b"x").expect("write");
        }
        let removed = prune_logs(dir.path(), LOG_FILE_PREFIX, 1).expect("prune");
        assert_eq!(removed, 1);
        assert!(dir.path().join("other.txt").exists());
    }

    #[test]
    fn verbosity_maps_to_levels() {
        assert_eq!(
            level_from_verbosity(0),
            tracing::metadata::LevelFilter::WARN
        );
        assert_eq!(
            level_from_verbosity(7),
            tracing::metadata::LevelFilter::TRACE
        );
    }
}
