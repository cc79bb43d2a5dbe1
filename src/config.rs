//! User configuration stored as `config.toml` in the application root.
//!
//! Every field carries a serde default so partial files load cleanly; a missing
//! file means all defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::app_dirs::{self, AppDirError};
use crate::ml::metrics::Scoring;
use crate::services::gaia::{self, ResultFormat, TapOptions};
use crate::services::skyview::{self, SkyviewEndpoint, StampRequest};
use crate::varclass::train::{DEFAULT_SEED, TrainOptions};

/// File name of the configuration inside the application root.
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Errors that may occur while loading or saving configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Unable to create config directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Invalid config at {path}: {source}")]
    ParseToml {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("Failed to serialize config to TOML at {path}: {source}")]
    SerializeToml {
        path: PathBuf,
        source: toml::ser::Error,
    },
    #[error(transparent)]
    AppDir(#[from] AppDirError),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AstroConfig {
    #[serde(default)]
    pub stamp: StampConfig,
    #[serde(default)]
    pub gaia: GaiaConfig,
    #[serde(default)]
    pub classifier: ClassifierConfig,
}

/// `[stamp]`: SkyView cutout defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StampConfig {
    #[serde(default = "default_survey")]
    pub survey: String,
    #[serde(default = "default_scaling")]
    pub scaling: String,
    #[serde(default = "default_true")]
    pub flip: bool,
    #[serde(default = "default_stamp_timeout_secs")]
    pub timeout_secs: f64,
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,
    #[serde(default = "default_skyview_url")]
    pub query_url: String,
    #[serde(default = "default_skyview_base_url")]
    pub base_url: String,
}

/// `[gaia]`: TAP service defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GaiaConfig {
    #[serde(default = "default_gaia_table")]
    pub table: String,
    #[serde(default = "default_gaia_timeout_secs")]
    pub timeout_secs: f64,
    #[serde(default = "default_gaia_refresh_secs")]
    pub refresh_secs: f64,
    #[serde(default = "default_gaia_max_timeout_secs")]
    pub max_timeout_secs: f64,
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,
    #[serde(default)]
    pub format: ResultFormat,
    #[serde(default = "default_tap_url")]
    pub endpoint: String,
}

/// `[classifier]`: training defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifierConfig {
    #[serde(default = "default_test_fraction")]
    pub test_fraction: f64,
    #[serde(default = "default_cv_iterations")]
    pub cv_iterations: usize,
    #[serde(default = "default_cv_folds")]
    pub cv_folds: usize,
    #[serde(default)]
    pub scoring: Scoring,
    /// Worker threads; `0` uses every core.
    #[serde(default)]
    pub workers: usize,
    #[serde(default = "default_seed")]
    pub seed: u64,
}

fn default_survey() -> String {
    skyview::DEFAULT_SURVEY.to_string()
}

fn default_scaling() -> String {
    skyview::DEFAULT_SCALING.to_string()
}

fn default_true() -> bool {
    true
}

fn default_stamp_timeout_secs() -> f64 {
    skyview::DEFAULT_TIMEOUT.as_secs_f64()
}

fn default_skyview_url() -> String {
    skyview::SKYVIEW_URL.to_string()
}

fn default_skyview_base_url() -> String {
    skyview::SKYVIEW_BASE_URL.to_string()
}

fn default_gaia_table() -> String {
    gaia::DEFAULT_TABLE.to_string()
}

fn default_gaia_timeout_secs() -> f64 {
    60.0
}

fn default_gaia_refresh_secs() -> f64 {
    2.0
}

fn default_gaia_max_timeout_secs() -> f64 {
    700.0
}

fn default_tap_url() -> String {
    gaia::TAP_URL.to_string()
}

fn default_test_fraction() -> f64 {
    0.25
}

fn default_cv_iterations() -> usize {
    20
}

fn default_cv_folds() -> usize {
    5
}

fn default_seed() -> u64 {
    DEFAULT_SEED
}

impl Default for StampConfig {
    fn default() -> Self {
        Self {
            survey: default_survey(),
            scaling: default_scaling(),
            flip: true,
            timeout_secs: default_stamp_timeout_secs(),
            cache_dir: None,
            query_url: default_skyview_url(),
            base_url: default_skyview_base_url(),
        }
    }
}

impl Default for GaiaConfig {
    fn default() -> Self {
        Self {
            table: default_gaia_table(),
            timeout_secs: default_gaia_timeout_secs(),
            refresh_secs: default_gaia_refresh_secs(),
            max_timeout_secs: default_gaia_max_timeout_secs(),
            cache_dir: None,
            format: ResultFormat::default(),
            endpoint: default_tap_url(),
        }
    }
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            test_fraction: default_test_fraction(),
            cv_iterations: default_cv_iterations(),
            cv_folds: default_cv_folds(),
            scoring: Scoring::default(),
            workers: 0,
            seed: default_seed(),
        }
    }
}

impl AstroConfig {
    /// Clamp values into ranges the rest of the crate accepts.
    pub fn normalized(mut self) -> Self {
        self.stamp.timeout_secs = positive_or(self.stamp.timeout_secs, default_stamp_timeout_secs());
        self.gaia.timeout_secs = positive_or(self.gaia.timeout_secs, default_gaia_timeout_secs());
        self.gaia.refresh_secs = positive_or(self.gaia.refresh_secs, default_gaia_refresh_secs());
        self.gaia.max_timeout_secs =
            positive_or(self.gaia.max_timeout_secs, default_gaia_max_timeout_secs());
        let fraction = self.classifier.test_fraction;
        self.classifier.test_fraction = if fraction.is_finite() {
            fraction.clamp(0.01, 0.99)
        } else {
            default_test_fraction()
        };
        self.classifier.cv_iterations = self.classifier.cv_iterations.max(1);
        self.classifier.cv_folds = self.classifier.cv_folds.max(2);
        self
    }
}

impl StampConfig {
    /// Stamp request for a position using these defaults.
    pub fn request(&self, ra: f64, decl: f64) -> StampRequest {
        let mut request = StampRequest::new(ra, decl);
        request.survey = self.survey.clone();
        request.scaling = self.scaling.clone();
        request.flip = self.flip;
        request.timeout = Duration::from_secs_f64(self.timeout_secs);
        request.cache_dir = self.cache_dir.clone();
        request
    }

    pub fn endpoint(&self) -> SkyviewEndpoint {
        SkyviewEndpoint {
            query_url: self.query_url.clone(),
            base_url: self.base_url.clone(),
        }
    }
}

impl GaiaConfig {
    pub fn tap_options(&self) -> TapOptions {
        TapOptions {
            format: self.format,
            force_fetch: false,
            cache_dir: self.cache_dir.clone(),
            timeout: Duration::from_secs_f64(self.timeout_secs),
            refresh: Duration::from_secs_f64(self.refresh_secs),
            max_timeout: Duration::from_secs_f64(self.max_timeout_secs),
            endpoint: self.endpoint.clone(),
        }
    }
}

impl ClassifierConfig {
    pub fn train_options(&self) -> TrainOptions {
        TrainOptions {
            test_fraction: self.test_fraction,
            cv_iterations: self.cv_iterations,
            cv_folds: self.cv_folds,
            scoring: self.scoring,
            workers: self.workers,
            seed: self.seed,
            ..TrainOptions::default()
        }
    }
}

fn positive_or(value: f64, fallback: f64) -> f64 {
    if value.is_finite() && value > 0.0 {
        value
    } else {
        fallback
    }
}

/// Resolve the configuration file path inside the application root.
pub fn config_path() -> Result<PathBuf, ConfigError> {
    Ok(app_dirs::app_root_dir()?.join(CONFIG_FILE_NAME))
}

/// Load configuration from the application root, returning defaults if missing.
pub fn load_or_default() -> Result<AstroConfig, ConfigError> {
    load_from(&config_path()?)
}

/// Load configuration from `path`, returning defaults if the file does not exist.
pub fn load_from(path: &Path) -> Result<AstroConfig, ConfigError> {
    if !path.exists() {
        return Ok(AstroConfig::default());
    }
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let config: AstroConfig = toml::from_str(&text).map_err(|source| ConfigError::ParseToml {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(config.normalized())
}

/// Save configuration to `path`, creating parent directories as needed.
pub fn save_to_path(config: &AstroConfig, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|source| ConfigError::CreateDir {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    let data = toml::to_string_pretty(config).map_err(|source| ConfigError::SerializeToml {
        path: path.to_path_buf(),
        source,
    })?;
    crate::services::cache::write_plain(path, data.as_bytes()).map_err(|source| {
        ConfigError::Write {
            path: path.to_path_buf(),
            source,
        }
    })
}
