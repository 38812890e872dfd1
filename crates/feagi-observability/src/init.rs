// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Unified logging initialization
//!
//! Console output always; optionally a timestamped run folder holding a
//! combined log and one log per debug-flagged crate, with retention cleanup.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use tracing_appender::rolling;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

use crate::cli::CrateDebugFlags;

const RUN_PREFIX: &str = "run_";
const RUN_TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Combined log file inside each run folder
pub const COMBINED_LOG_FILE: &str = "kernelgen.log";

/// Where and how much to log
#[derive(Debug, Clone)]
pub struct LoggingOptions {
    /// Level for crates without a debug flag
    pub default_level: String,
    /// Base directory for run folders; `None` logs to the console only
    pub log_dir: Option<PathBuf>,
    /// Remove run folders older than this many days
    pub retention_days: u64,
    /// Keep at most this many run folders, the current one included
    pub retention_runs: usize,
}

impl Default for LoggingOptions {
    fn default() -> Self {
        Self {
            default_level: "info".to_string(),
            log_dir: None,
            retention_days: 30,
            retention_runs: 10,
        }
    }
}

/// Keeps file writers alive; logs are flushed when it is dropped
pub struct LoggingGuard {
    _file_guards: Vec<tracing_appender::non_blocking::WorkerGuard>,
    log_dir: Option<PathBuf>,
}

impl LoggingGuard {
    /// Run folder of this process, if file logging is enabled
    pub fn log_dir(&self) -> Option<&Path> {
        self.log_dir.as_deref()
    }
}

/// Initialize logging with console output and, if requested, file output
///
/// Creates a timestamped folder structure:
/// ```text
/// ./logs/
///   └── run_20250101_120000/
///       ├── feagi-kernelgen-codegen.log   (only for debug-flagged crates)
///       └── kernelgen.log                 (combined)
/// ```
pub fn init_logging(debug_flags: &CrateDebugFlags, options: &LoggingOptions) -> Result<LoggingGuard> {
    let filter = debug_flags.to_filter_string(&options.default_level);
    let env_filter = EnvFilter::try_new(&filter)
        .with_context(|| format!("Invalid log filter: {}", filter))?;

    let mut layers = Vec::new();
    let mut file_guards = Vec::new();

    let console_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_file(false)
        .with_line_number(false)
        .with_filter(env_filter)
        .boxed();
    layers.push(console_layer);

    let run_folder = match &options.log_dir {
        Some(base_log_dir) => {
            let timestamp = Utc::now().format(RUN_TIMESTAMP_FORMAT);
            let run_folder = base_log_dir.join(format!("{}{}", RUN_PREFIX, timestamp));
            std::fs::create_dir_all(&run_folder).with_context(|| {
                format!("Failed to create log directory: {}", run_folder.display())
            })?;
            cleanup_old_logs(
                base_log_dir,
                options.retention_days,
                options.retention_runs,
                &run_folder,
            )?;

            // One file per flagged crate, holding only that crate's events
            for crate_name in &debug_flags.enabled_crates {
                let appender = rolling::never(&run_folder, format!("{}.log", crate_name));
                let (non_blocking, guard) = tracing_appender::non_blocking(appender);
                file_guards.push(guard);

                let crate_filter = format!("{}=debug,off", crate_name.replace('-', "_"));
                let file_layer = tracing_subscriber::fmt::layer()
                    .with_writer(non_blocking)
                    .with_ansi(false)
                    .with_target(true)
                    .with_file(true)
                    .with_line_number(true)
                    .with_filter(EnvFilter::try_new(&crate_filter)?)
                    .boxed();
                layers.push(file_layer);
            }

            let combined_appender = rolling::never(&run_folder, COMBINED_LOG_FILE);
            let (combined_non_blocking, combined_guard) =
                tracing_appender::non_blocking(combined_appender);
            file_guards.push(combined_guard);

            let combined_layer = tracing_subscriber::fmt::layer()
                .with_writer(combined_non_blocking)
                .with_ansi(false)
                .with_target(true)
                .with_file(true)
                .with_line_number(true)
                .with_filter(EnvFilter::try_new(&filter)?)
                .boxed();
            layers.push(combined_layer);

            Some(run_folder)
        }
        None => None,
    };

    Registry::default()
        .with(layers)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to install tracing subscriber: {}", e))?;

    Ok(LoggingGuard {
        _file_guards: file_guards,
        log_dir: run_folder,
    })
}

/// Initialize console-only logging at `info`
pub fn init_logging_default(debug_flags: &CrateDebugFlags) -> Result<LoggingGuard> {
    init_logging(debug_flags, &LoggingOptions::default())
}

fn parse_run_timestamp(dir_name: &str) -> Option<DateTime<Utc>> {
    let timestamp = dir_name.strip_prefix(RUN_PREFIX)?;
    let naive = NaiveDateTime::parse_from_str(timestamp, RUN_TIMESTAMP_FORMAT).ok()?;
    Some(Utc.from_utc_datetime(&naive))
}

/// Remove run folders past the retention policy; returns how many were removed
///
/// Folders older than `retention_days` go first, then the oldest runs beyond
/// `retention_runs`. `current` is never removed and other directories are
/// left alone.
pub fn cleanup_old_logs(
    base_log_dir: &Path,
    retention_days: u64,
    retention_runs: usize,
    current: &Path,
) -> Result<usize> {
    if !base_log_dir.exists() {
        return Ok(0);
    }

    let cutoff_date = Utc::now() - chrono::Duration::days(retention_days as i64);

    let mut runs: Vec<(PathBuf, DateTime<Utc>)> = Vec::new();
    for entry in std::fs::read_dir(base_log_dir)? {
        let path = entry?.path();
        if !path.is_dir() || path == current {
            continue;
        }
        let timestamp = path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(parse_run_timestamp);
        if let Some(dt) = timestamp {
            runs.push((path, dt));
        }
    }

    // Newest first
    runs.sort_by(|a, b| b.1.cmp(&a.1));

    // The current run takes one of the retained slots
    let keep_others = retention_runs.saturating_sub(1);
    let mut removed = 0;
    for (index, (path, dt)) in runs.iter().enumerate() {
        if *dt < cutoff_date || index >= keep_others {
            match std::fs::remove_dir_all(path) {
                Ok(()) => removed += 1,
                Err(e) => eprintln!(
                    "Warning: Failed to remove old log directory {}: {}",
                    path.display(),
                    e
                ),
            }
        }
    }

    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn run_name(dt: DateTime<Utc>) -> String {
        format!("{}{}", RUN_PREFIX, dt.format(RUN_TIMESTAMP_FORMAT))
    }

    #[test]
    fn test_parse_run_timestamp() {
        let dt = parse_run_timestamp("run_20250101_120000").unwrap();
        assert_eq!(dt.format("%Y-%m-%d %H:%M:%S").to_string(), "2025-01-01 12:00:00");
        assert!(parse_run_timestamp("run_latest").is_none());
        assert!(parse_run_timestamp("20250101_120000").is_none());
    }

    #[test]
    fn test_cleanup_applies_age_and_count_limits() {
        let base = tempdir().unwrap();
        let now = Utc::now();

        let current = base.path().join(run_name(now));
        std::fs::create_dir_all(&current).unwrap();
        std::fs::create_dir_all(base.path().join("run_20200101_000000")).unwrap();
        std::fs::create_dir_all(base.path().join("notes")).unwrap();
        let recent: Vec<PathBuf> = (1..=4)
            .map(|minutes| base.path().join(run_name(now - chrono::Duration::minutes(minutes))))
            .collect();
        for dir in &recent {
            std::fs::create_dir_all(dir).unwrap();
        }

        let removed = cleanup_old_logs(base.path(), 30, 3, &current).unwrap();

        assert_eq!(removed, 3);
        assert!(current.exists());
        assert!(base.path().join("notes").exists());
        assert!(!base.path().join("run_20200101_000000").exists());
        assert!(recent[0].exists());
        assert!(recent[1].exists());
        assert!(!recent[2].exists());
        assert!(!recent[3].exists());
    }

    #[test]
    fn test_cleanup_of_missing_directory() {
        let base = tempdir().unwrap();
        let missing = base.path().join("logs");
        assert_eq!(cleanup_old_logs(&missing, 30, 10, &missing).unwrap(), 0);
    }
}
