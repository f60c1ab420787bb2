// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Unified logging initialization for Sapphire
//!
//! Console output always; with the `file-logging` feature, a combined JSON log file in a
//! timestamped run folder with configurable retention.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

use crate::cli::CrateDebugFlags;
use crate::config::{LogFormat, ObservabilityConfig};

const RUN_PREFIX: &str = "run_";
const RUN_TIMESTAMP: &str = "%Y%m%d_%H%M%S";

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Keeps log writers alive; logs are flushed when dropped
pub struct LoggingGuard {
    #[cfg(feature = "file-logging")]
    _file_guards: Vec<tracing_appender::non_blocking::WorkerGuard>,
    log_dir: Option<PathBuf>,
}

impl LoggingGuard {
    /// Run folder receiving log files, if file logging is active
    pub fn log_dir(&self) -> Option<&Path> {
        self.log_dir.as_deref()
    }
}

fn env_filter(debug_flags: &CrateDebugFlags, level: &str) -> Result<EnvFilter> {
    let directives = debug_flags.to_filter_string(level);
    EnvFilter::try_new(&directives)
        .with_context(|| format!("Invalid log filter: {}", directives))
}

/// Initialize the global subscriber
///
/// # Errors
///
/// Fails if the level is not a valid filter, the log folder cannot be created, or a
/// global subscriber is already installed.
pub fn init_logging(
    config: &ObservabilityConfig,
    debug_flags: &CrateDebugFlags,
) -> Result<LoggingGuard> {
    let mut layers: Vec<BoxedLayer> = Vec::new();

    // Console layer
    let console = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_file(false)
        .with_line_number(false);
    let console: BoxedLayer = match config.format {
        LogFormat::Text => console
            .with_filter(env_filter(debug_flags, &config.level)?)
            .boxed(),
        LogFormat::Json => console
            .json()
            .with_filter(env_filter(debug_flags, &config.level)?)
            .boxed(),
    };
    layers.push(console);

    #[cfg_attr(not(feature = "file-logging"), allow(unused_mut))]
    let mut guard = LoggingGuard {
        #[cfg(feature = "file-logging")]
        _file_guards: Vec::new(),
        log_dir: None,
    };

    if config.file_logging {
        #[cfg(feature = "file-logging")]
        {
            let run_folder = config.log_dir.join(run_folder_name(Utc::now()));
            std::fs::create_dir_all(&run_folder).with_context(|| {
                format!("Failed to create log directory: {}", run_folder.display())
            })?;
            cleanup_old_logs(&config.log_dir, config.retention_days, config.retention_runs)?;

            let appender = tracing_appender::rolling::daily(&run_folder, "sapphire.log");
            let (non_blocking, file_guard) = tracing_appender::non_blocking(appender);
            let file_layer = tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_target(true)
                .with_file(true)
                .with_line_number(true)
                .json()
                .with_filter(env_filter(debug_flags, &config.level)?)
                .boxed();
            layers.push(file_layer);
            guard._file_guards.push(file_guard);
            guard.log_dir = Some(run_folder);
        }
        #[cfg(not(feature = "file-logging"))]
        eprintln!("Warning: file logging requested but the file-logging feature is disabled");
    }

    Registry::default()
        .with(layers)
        .try_init()
        .context("Failed to install the global log subscriber")?;

    Ok(guard)
}

/// Initialize console logging at `info` with the given debug flags
pub fn init_logging_default(debug_flags: &CrateDebugFlags) -> Result<LoggingGuard> {
    init_logging(&ObservabilityConfig::default(), debug_flags)
}

/// Folder name for a run started at `now`: `run_20250101_120000`
pub fn run_folder_name(now: DateTime<Utc>) -> String {
    format!("{}{}", RUN_PREFIX, now.format(RUN_TIMESTAMP))
}

/// Clean up old run folders based on retention policy
///
/// Runs older than `retention_days` are removed, then the oldest remaining runs until at
/// most `retention_runs` are left. Folders not named like a run are left alone.
pub fn cleanup_old_logs(
    base_log_dir: &Path,
    retention_days: u64,
    retention_runs: usize,
) -> Result<()> {
    if !base_log_dir.exists() {
        return Ok(());
    }

    let cutoff_date = Utc::now() - chrono::Duration::days(retention_days as i64);

    let mut runs: Vec<(PathBuf, DateTime<Utc>)> = Vec::new();
    for entry in std::fs::read_dir(base_log_dir)? {
        let path = entry?.path();
        if !path.is_dir() {
            continue;
        }
        let started = path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(|n| n.strip_prefix(RUN_PREFIX))
            .and_then(|ts| NaiveDateTime::parse_from_str(ts, RUN_TIMESTAMP).ok());
        if let Some(started) = started {
            runs.push((path, started.and_utc()));
        }
    }

    // Oldest first
    runs.sort_by_key(|(_, dt)| *dt);

    let expired = runs.iter().filter(|(_, dt)| *dt < cutoff_date).count();
    let excess = (runs.len() - expired).saturating_sub(retention_runs);
    for (path, _) in runs.iter().take(expired + excess) {
        if let Err(e) = std::fs::remove_dir_all(path) {
            eprintln!(
                "Warning: Failed to remove old log directory {}: {}",
                path.display(),
                e
            );
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_run_folder_name() {
        let at = Utc.with_ymd_and_hms(2025, 1, 2, 3, 4, 5).unwrap();
        assert_eq!(run_folder_name(at), "run_20250102_030405");
    }

    #[test]
    fn test_cleanup_keeps_recent_runs() {
        let dir = tempfile::tempdir().unwrap();
        let now = Utc::now();
        let mut names = Vec::new();
        for hours in 0..5 {
            let name = run_folder_name(now - chrono::Duration::hours(hours));
            std::fs::create_dir_all(dir.path().join(&name)).unwrap();
            names.push(name);
        }
        let ancient = run_folder_name(now - chrono::Duration::days(90));
        std::fs::create_dir_all(dir.path().join(&ancient)).unwrap();
        std::fs::create_dir_all(dir.path().join("keep-me")).unwrap();

        cleanup_old_logs(dir.path(), 30, 3).unwrap();

        assert!(!dir.path().join(&ancient).exists());
        for name in &names[..3] {
            assert!(dir.path().join(name).exists(), "{} removed", name);
        }
        for name in &names[3..] {
            assert!(!dir.path().join(name).exists(), "{} kept", name);
        }
        assert!(dir.path().join("keep-me").exists());
    }

    #[test]
    fn test_cleanup_missing_dir_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        assert!(cleanup_old_logs(&dir.path().join("absent"), 30, 10).is_ok());
    }
}
