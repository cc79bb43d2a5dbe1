//! Logging setup for the command-line tools.
//!
//! Each tool logs to stderr and, unless disabled, to its own run log
//! `<app root>/logs/<tool>_<timestamp>.log`. Only the newest runs of a tool
//! are kept.

use std::{
    fs::{self, OpenOptions},
    path::{Path, PathBuf},
    sync::OnceLock,
};

use time::{OffsetDateTime, UtcOffset, format_description::BorrowedFormatItem, macros::format_description};
use tracing_appender::{non_blocking::WorkerGuard, rolling};
use tracing_subscriber::{EnvFilter, Registry, fmt, prelude::*};

use crate::app_dirs;

/// Run logs kept per tool.
pub const KEEP_RUN_LOGS: usize = 10;

const FILE_STAMP: &[BorrowedFormatItem<'static>] =
    format_description!("[year]-[month]-[day]_[hour]-[minute]-[second]");
const LINE_STAMP: &[BorrowedFormatItem<'static>] =
    format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]");

static FILE_GUARD: OnceLock<Option<WorkerGuard>> = OnceLock::new();

#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("Failed to prepare log directory: {0}")]
    Dir(#[from] app_dirs::AppDirError),
    #[error("Failed to list run logs in {path}: {source}")]
    ListLogs {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to remove run log {path}: {source}")]
    RemoveLog {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to create run log {path}: {source}")]
    CreateLog {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to timestamp run log name: {0}")]
    Timestamp(#[from] time::error::Format),
    #[error("A global tracing subscriber is already installed: {0}")]
    Install(#[from] tracing::subscriber::SetGlobalDefaultError),
}

/// How a tool wants its logs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogOptions {
    /// Run log file prefix, normally the binary name.
    pub tool: String,
    /// Filter used when `RUST_LOG` is unset.
    pub default_filter: String,
    pub to_file: bool,
}

impl LogOptions {
    /// File logging at `info`, or `debug` when `verbose` is set.
    pub fn for_tool(tool: &str, verbose: bool) -> Self {
        Self {
            tool: tool.to_string(),
            default_filter: if verbose { "debug" } else { "info" }.to_string(),
            to_file: true,
        }
    }

    fn run_log_name(&self, started: OffsetDateTime) -> Result<String, LoggingError> {
        Ok(format!("{}_{}.log", self.tool, started.format(FILE_STAMP)?))
    }
}

/// Install the global subscriber. Calling it again is a no-op.
///
/// Errors are returned rather than fatal so a tool can run without logs.
pub fn init(options: &LogOptions) -> Result<(), LoggingError> {
    if FILE_GUARD.get().is_some() {
        return Ok(());
    }

    let offset = UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC);
    let timer = fmt::time::OffsetTime::new(offset, LINE_STAMP);
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&options.default_filter));
    let stderr = fmt::layer()
        .with_timer(timer.clone())
        .with_writer(std::io::stderr);

    if !options.to_file {
        tracing::subscriber::set_global_default(Registry::default().with(filter).with(stderr))?;
        let _ = FILE_GUARD.set(None);
        return Ok(());
    }

    let dir = app_dirs::logs_dir()?;
    let started = OffsetDateTime::now_utc().to_offset(offset);
    let name = options.run_log_name(started)?;
    let path = dir.join(&name);
    touch(&path)?;
    prune_run_logs(&dir, &options.tool, KEEP_RUN_LOGS)?;

    let (writer, guard) = tracing_appender::non_blocking(rolling::never(&dir, &name));
    let file = fmt::layer()
        .with_ansi(false)
        .with_timer(timer)
        .with_writer(writer);
    tracing::subscriber::set_global_default(
        Registry::default().with(filter).with(stderr).with(file),
    )?;
    let _ = FILE_GUARD.set(Some(guard));

    tracing::debug!(path = %path.display(), "Run log opened");
    Ok(())
}

fn touch(path: &Path) -> Result<(), LoggingError> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map(drop)
        .map_err(|source| LoggingError::CreateLog {
            path: path.to_path_buf(),
            source,
        })
}

/// Delete all but the `keep` newest run logs of `tool`.
///
/// Names embed a sortable timestamp, so name order is age order.
fn prune_run_logs(dir: &Path, tool: &str, keep: usize) -> Result<(), LoggingError> {
    let prefix = format!("{tool}_");
    let mut logs: Vec<PathBuf> = fs::read_dir(dir)
        .map_err(|source| LoggingError::ListLogs {
            path: dir.to_path_buf(),
            source,
        })?
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| {
            path.is_file()
                && path.file_name().and_then(|n| n.to_str()).is_some_and(|name| {
                    name.strip_prefix(&prefix)
                        .is_some_and(|rest| rest.ends_with(".log"))
                })
        })
        .collect();
    logs.sort();
    let excess = logs.len().saturating_sub(keep);
    for path in logs.into_iter().take(excess) {
        fs::remove_file(&path).map_err(|source| LoggingError::RemoveLog { path, source })?;
    }
    Ok(())
}
