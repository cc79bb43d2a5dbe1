//! Queries against the Gaia archive's asynchronous TAP service.
//!
//! An ADQL query is submitted as a UWS job, the job document is polled until
//! the phase is `COMPLETED`, and the result table is downloaded into a
//! hash-keyed cache next to the stamp cache.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::LazyLock;
use std::time::{Duration, Instant};

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, info, warn};

use super::cache::{self, Provenance};
use crate::app_dirs;
use crate::http_client::{self, HttpError};

pub const TAP_URL: &str = "https://gea.esac.esa.int/tap-server/tap/async";
pub const DEFAULT_TABLE: &str = "gaiadr1.gaia_source";
pub const DEFAULT_COLUMNS: &[&str] = &[
    "source_id",
    "ra",
    "dec",
    "phot_g_mean_mag",
    "l",
    "b",
    "parallax",
    "parallax_error",
];

static PHASE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<uws:phase>\s*([A-Za-z_]+)\s*</uws:phase>").expect("valid phase regex")
});
static RESULT_ELEMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<uws:result\b[^>]*>").expect("valid result regex"));
static HREF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"xlink:href\s*=\s*"([^"]*)""#).expect("valid href regex"));
static ROWS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"\brows\s*=\s*"(\d+)""#).expect("valid rows regex"));

#[derive(Debug, Error)]
pub enum TapError {
    #[error("TAP request failed: {0}")]
    Http(#[from] HttpError),
    #[error("TAP job failed (probably an ADQL error), status URL {status_url}: {body}")]
    JobFailed { status_url: String, body: String },
    #[error("TAP job at {status_url} not finished after {elapsed:?}")]
    TimedOut {
        status_url: String,
        elapsed: Duration,
    },
    #[error("TAP job document from {url} has no {element} element")]
    MalformedJob { url: String, element: &'static str },
    #[error("TAP cache error at {path}: {source}")]
    Cache {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl TapError {
    /// A failed or stalled job may succeed with another query; transport and cache errors won't.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::JobFailed { .. } | Self::TimedOut { .. })
    }
}

/// Table serialization requested from the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultFormat {
    Json,
    #[default]
    Csv,
    Votable,
}

impl ResultFormat {
    pub fn as_param(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Csv => "csv",
            Self::Votable => "votable",
        }
    }

    /// Cache file extension; `.gz` formats are stored compressed.
    pub fn extension(self) -> &'static str {
        match self {
            Self::Json => "json.gz",
            Self::Csv => "csv.gz",
            Self::Votable => "vot",
        }
    }

    fn compressed(self) -> bool {
        self.extension().ends_with(".gz")
    }
}

impl FromStr for ResultFormat {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "csv" => Ok(Self::Csv),
            "votable" | "vot" => Ok(Self::Votable),
            other => Err(format!("Unknown TAP result format: {other}")),
        }
    }
}

/// Transport and caching options shared by all query helpers.
#[derive(Debug, Clone)]
pub struct TapOptions {
    pub format: ResultFormat,
    pub force_fetch: bool,
    /// Cache directory; `None` uses `<app root>/gaia-cache`.
    pub cache_dir: Option<PathBuf>,
    /// Timeout for each individual HTTP exchange.
    pub timeout: Duration,
    /// Delay between job status polls.
    pub refresh: Duration,
    /// Give up polling after this much waiting.
    pub max_timeout: Duration,
    pub endpoint: String,
}

impl Default for TapOptions {
    fn default() -> Self {
        Self {
            format: ResultFormat::Csv,
            force_fetch: false,
            cache_dir: None,
            timeout: Duration::from_secs(60),
            refresh: Duration::from_secs(2),
            max_timeout: Duration::from_secs(700),
            endpoint: TAP_URL.to_string(),
        }
    }
}

/// Location of a (possibly cached) TAP result table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TapResult {
    /// Form parameters submitted, job name excluded.
    pub params: BTreeMap<String, String>,
    pub provenance: Provenance,
    pub result: PathBuf,
}

/// Run an ADQL query, serving it from the cache when possible.
pub fn tap_query(query: &str, options: &TapOptions) -> Result<TapResult, TapError> {
    let params = query_params(query, options.format);
    let cache_dir = resolve_cache_dir(options)?;
    let key = cache::cache_key(&canonical_params(&params));
    let cache_path = cache_dir.join(format!("{key}.{}", options.format.extension()));

    if !options.force_fetch && cache_path.exists() {
        info!("Getting cached Gaia query result for {}", query.trim());
        return Ok(TapResult {
            params,
            provenance: Provenance::Cache,
            result: cache_path,
        });
    }

    let agent = http_client::agent(options.timeout);
    let mut form: Vec<(&str, &str)> = params
        .iter()
        .map(|(key, value)| (key.as_str(), value.as_str()))
        .collect();
    let job_name = job_name();
    form.push(("JOBNAME", job_name.as_str()));
    form.push(("JOBDESCRIPTION", "astrobase-gaia-tap-ADQL-query"));

    info!("Submitting Gaia TAP query {job_name}");
    let response = agent
        .post(&options.endpoint)
        .send_form(&form)
        .map_err(|err| log_failure(HttpError::from_ureq(&options.endpoint, options.timeout, err)))?;
    let status_url = response.get_url().to_string();
    let mut job = read_text(response, &status_url)?;

    let started = Instant::now();
    loop {
        let phase = job_phase(&job).ok_or_else(|| TapError::MalformedJob {
            url: status_url.clone(),
            element: "uws:phase",
        })?;
        match phase.as_str() {
            "COMPLETED" => {
                info!("Gaia query completed, retrieving results");
                break;
            }
            "ERROR" | "ABORTED" => {
                error!("Gaia query failed: status URL {status_url}");
                return Err(TapError::JobFailed {
                    status_url,
                    body: job,
                });
            }
            other => {
                let elapsed = started.elapsed();
                if elapsed >= options.max_timeout {
                    error!("Gaia TAP timed out after {elapsed:?} waiting for {status_url}");
                    return Err(TapError::TimedOut {
                        status_url,
                        elapsed,
                    });
                }
                info!("Status {other} after {elapsed:?}, waiting for results");
                std::thread::sleep(options.refresh);
                let response = agent.get(&status_url).call().map_err(|err| {
                    log_failure(HttpError::from_ureq(&status_url, options.timeout, err))
                })?;
                job = read_text(response, &status_url)?;
            }
        }
    }

    let (result_url, rows) = result_link(&job).ok_or_else(|| TapError::MalformedJob {
        url: status_url.clone(),
        element: "uws:result",
    })?;
    let response = agent
        .get(&result_url)
        .call()
        .map_err(|err| log_failure(HttpError::from_ureq(&result_url, options.timeout, err)))?;
    let bytes = http_client::read_response_bytes(response, http_client::MAX_DOWNLOAD_BYTES)
        .map_err(|source| HttpError::Body {
            url: result_url.clone(),
            source,
        })?;
    let written = if options.format.compressed() {
        cache::write_gzip(&cache_path, &bytes)
    } else {
        cache::write_plain(&cache_path, &bytes)
    };
    written.map_err(|source| TapError::Cache {
        path: cache_path.clone(),
        source,
    })?;
    match rows {
        Some(rows) => info!("Done, rows in result: {rows}"),
        None => info!("Done, row count not reported"),
    }

    Ok(TapResult {
        params,
        provenance: Provenance::NewDownload,
        result: cache_path,
    })
}

/// Objects within `radius_arcsec` of a position, nearest first.
pub fn objectlist_conesearch(
    ra_center: f64,
    decl_center: f64,
    radius_arcsec: f64,
    table: &str,
    columns: &[&str],
    options: &TapOptions,
) -> Result<TapResult, TapError> {
    tap_query(
        &conesearch_query(ra_center, decl_center, radius_arcsec, table, columns),
        options,
    )
}

/// Objects inside `[ra_min, ra_max, decl_min, decl_max]`.
pub fn objectlist_radeclbox(
    radeclbox: [f64; 4],
    table: &str,
    columns: &[&str],
    options: &TapOptions,
) -> Result<TapResult, TapError> {
    tap_query(&radeclbox_query(radeclbox, table, columns), options)
}

pub fn conesearch_query(
    ra_center: f64,
    decl_center: f64,
    radius_arcsec: f64,
    table: &str,
    columns: &[&str],
) -> String {
    let columns = columns.join(", ");
    let radius = radius_arcsec / 3600.0;
    format!(
        "select {columns}, \
         (DISTANCE(POINT('ICRS', {table}.ra, {table}.dec), \
         POINT('ICRS', {ra_center}, {decl_center})))*3600.0 AS dist_arcsec \
         from {table} where \
         CONTAINS(POINT('ICRS',{table}.ra,{table}.dec),\
         CIRCLE('ICRS',{ra_center},{decl_center},{radius}))=1 \
         ORDER by dist_arcsec asc "
    )
}

pub fn radeclbox_query(radeclbox: [f64; 4], table: &str, columns: &[&str]) -> String {
    let [ra_min, ra_max, decl_min, decl_max] = radeclbox;
    let ra_center = (ra_max + ra_min) / 2.0;
    let decl_center = (decl_max + decl_min) / 2.0;
    let ra_width = ra_max - ra_min;
    let decl_height = decl_max - decl_min;
    let columns = columns.join(", ");
    format!(
        "select {columns} from {table} where \
         CONTAINS(POINT('ICRS',{table}.ra, {table}.dec),\
         BOX('ICRS',{ra_center},{decl_center},{ra_width},{decl_height}))=1"
    )
}

fn query_params(query: &str, format: ResultFormat) -> BTreeMap<String, String> {
    [
        ("REQUEST", "doQuery"),
        ("LANG", "ADQL"),
        ("FORMAT", format.as_param()),
        ("PHASE", "RUN"),
        ("QUERY", query),
    ]
    .into_iter()
    .map(|(key, value)| (key.to_string(), value.to_string()))
    .collect()
}

fn canonical_params(params: &BTreeMap<String, String>) -> String {
    params
        .iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect::<Vec<_>>()
        .join("&")
}

fn job_name() -> String {
    format!(
        "ab-gaia-{}",
        time::OffsetDateTime::now_utc().unix_timestamp()
    )
}

fn job_phase(document: &str) -> Option<String> {
    PHASE
        .captures(document)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_ascii_uppercase())
}

fn result_link(document: &str) -> Option<(String, Option<u64>)> {
    let element = RESULT_ELEMENT.find(document)?.as_str();
    let href = HREF.captures(element)?.get(1)?.as_str();
    let rows = ROWS
        .captures(element)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok());
    Some((unescape_xml(href), rows))
}

fn unescape_xml(value: &str) -> String {
    value
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

fn read_text(response: ureq::Response, url: &str) -> Result<String, TapError> {
    http_client::read_response_text(response, http_client::MAX_TEXT_BYTES).map_err(|source| {
        TapError::Http(HttpError::Body {
            url: url.to_string(),
            source,
        })
    })
}

fn resolve_cache_dir(options: &TapOptions) -> Result<PathBuf, TapError> {
    match &options.cache_dir {
        Some(dir) => cache::prepare_cache_dir(dir).map_err(|source| TapError::Cache {
            path: dir.clone(),
            source,
        }),
        None => app_dirs::gaia_cache_dir().map_err(|err| TapError::Cache {
            path: Path::new(app_dirs::APP_DIR_NAME).to_path_buf(),
            source: std::io::Error::other(err.to_string()),
        }),
    }
}

fn log_failure(err: HttpError) -> TapError {
    if err.is_timeout() {
        warn!("Gaia TAP request timed out, the service is probably down: {err}");
    } else {
        error!("Gaia TAP request failed: {err}");
    }
    TapError::Http(err)
}
