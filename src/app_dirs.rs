//! Application directory helpers anchored to a single `.astrobase` folder.
//!
//! Config, logs and the download caches all live under `~/.astrobase` by
//! default. `ASTROBASE_HOME` moves the whole tree, which tests and portable
//! setups rely on.

use std::{
    path::{Path, PathBuf},
    sync::{LazyLock, Mutex},
};

use directories::BaseDirs;
use thiserror::Error;

/// Name of the application directory that lives under the home directory.
pub const APP_DIR_NAME: &str = ".astrobase";
/// Environment variable overriding the application root.
pub const APP_HOME_ENV: &str = "ASTROBASE_HOME";

const STAMP_CACHE_DIR: &str = "stamp-cache";
const GAIA_CACHE_DIR: &str = "gaia-cache";

static ROOT_OVERRIDE: LazyLock<Mutex<Option<PathBuf>>> = LazyLock::new(|| Mutex::new(None));

/// Errors that can occur while resolving or preparing application directories.
#[derive(Debug, Error)]
pub enum AppDirError {
    /// No home directory could be resolved.
    #[error("No home directory available for application files")]
    NoBaseDir,
    /// Failed to create the application directory.
    #[error("Failed to create application directory at {path}: {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Return the root `.astrobase` directory, creating it if needed.
pub fn app_root_dir() -> Result<PathBuf, AppDirError> {
    let path = match root_override() {
        Some(path) => path,
        None => home_dir().ok_or(AppDirError::NoBaseDir)?.join(APP_DIR_NAME),
    };
    ensure_dir(&path)?;
    Ok(path)
}

/// Return the logs directory inside the application root, creating it if needed.
pub fn logs_dir() -> Result<PathBuf, AppDirError> {
    child_dir("logs")
}

/// Default cache directory for SkyView stamps.
pub fn stamp_cache_dir() -> Result<PathBuf, AppDirError> {
    child_dir(STAMP_CACHE_DIR)
}

/// Default cache directory for Gaia TAP results.
pub fn gaia_cache_dir() -> Result<PathBuf, AppDirError> {
    child_dir(GAIA_CACHE_DIR)
}

/// Create `path` (and parents) if it does not exist yet.
pub fn ensure_dir(path: &Path) -> Result<(), AppDirError> {
    std::fs::create_dir_all(path).map_err(|source| AppDirError::CreateDir {
        path: path.to_path_buf(),
        source,
    })
}

/// Expand a leading `~` to the current user's home directory.
pub fn expand_tilde(path: &Path) -> PathBuf {
    let Ok(rest) = path.strip_prefix("~") else {
        return path.to_path_buf();
    };
    match home_dir() {
        Some(home) => home.join(rest),
        None => path.to_path_buf(),
    }
}

/// Pin the application root for the rest of the process.
pub fn set_app_root_override(path: PathBuf) -> Result<(), AppDirError> {
    ensure_dir(&path)?;
    if let Ok(mut guard) = ROOT_OVERRIDE.lock() {
        *guard = Some(path);
    }
    Ok(())
}

fn child_dir(name: &str) -> Result<PathBuf, AppDirError> {
    let path = app_root_dir()?.join(name);
    ensure_dir(&path)?;
    Ok(path)
}

fn root_override() -> Option<PathBuf> {
    if let Some(path) = ROOT_OVERRIDE.lock().ok().and_then(|guard| guard.clone()) {
        return Some(path);
    }
    std::env::var_os(APP_HOME_ENV).map(PathBuf::from)
}

fn home_dir() -> Option<PathBuf> {
    BaseDirs::new().map(|dirs| dirs.home_dir().to_path_buf())
}

#[cfg(test)]
fn clear_app_root_override() {
    let mut guard = ROOT_OVERRIDE
        .lock()
        .expect("root override mutex poisoned");
    *guard = None;
}
