//! Digitized Sky Survey stamps from the NASA GSFC SkyView service.
//!
//! A stamp request is a single form GET; the answer is an HTML page that links
//! to a FITS file generated on the server. That file is downloaded once and
//! kept gzip-compressed in a flat cache keyed by position, survey and scaling.

use std::path::PathBuf;
use std::sync::LazyLock;
use std::time::Duration;

use ndarray::{Array2, s};
use regex::Regex;
use thiserror::Error;
use tracing::{error, info, warn};
use url::Url;

use super::cache::{self, Provenance};
use super::convolve::{Kernel, convolve};
use super::fits::{self, FitsError, FitsHeader};
use crate::app_dirs;
use crate::http_client::{self, HttpError};

pub const SKYVIEW_URL: &str = "https://skyview.gsfc.nasa.gov/current/cgi/runquery.pl";
pub const SKYVIEW_BASE_URL: &str = "https://skyview.gsfc.nasa.gov";
pub const DEFAULT_SURVEY: &str = "DSS2 Red";
pub const DEFAULT_SCALING: &str = "Linear";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

static FITS_LINK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(tempspace/fits/skv\d{8,20}\.fits)").expect("valid FITS link regex")
});

/// Fixed form fields sent with every query; position, survey and scaling are added per call.
const FORM_DEFAULTS: &[(&str, &str)] = &[
    ("CatalogIDs", "on"),
    ("Deedger", "_skip_"),
    ("Sampler", "_skip_"),
    ("coordinates", "J2000"),
    ("ebins", "null"),
    ("float", "on"),
    ("grid", "_skip_"),
    ("gridlabels", "1"),
    ("lut", "colortables/b-w-linear.bin"),
    ("pixels", "300"),
    ("projection", "Tan"),
    ("resolver", "SIMBAD-NED"),
];

#[derive(Debug, Error)]
pub enum StampError {
    #[error("SkyView returned no FITS links for position {position}")]
    NoResults { position: String },
    #[error("SkyView request for {position} failed: {source}")]
    Http {
        position: String,
        #[source]
        source: HttpError,
    },
    #[error("Invalid SkyView URL {url}: {source}")]
    Url {
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error("Stamp cache error at {path}: {source}")]
    Cache {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Cached stamp {path} is not a readable FITS file: {source}")]
    Fits {
        path: PathBuf,
        #[source]
        source: FitsError,
    },
}

impl StampError {
    /// Whether the call may reasonably be repeated with other parameters.
    ///
    /// `NoResults` means the service answered but had nothing for this
    /// position; everything else is a transport, cache or decoding failure.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::NoResults { .. })
    }
}

/// Where queries go and how result links are resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkyviewEndpoint {
    pub query_url: String,
    pub base_url: String,
}

impl Default for SkyviewEndpoint {
    fn default() -> Self {
        Self {
            query_url: SKYVIEW_URL.to_string(),
            base_url: SKYVIEW_BASE_URL.to_string(),
        }
    }
}

/// Parameters of a single stamp fetch.
#[derive(Debug, Clone)]
pub struct StampRequest {
    /// Right ascension in decimal degrees.
    pub ra: f64,
    /// Declination in decimal degrees.
    pub decl: f64,
    pub survey: String,
    pub scaling: String,
    /// Reverse row order so north is up in the returned array.
    pub flip: bool,
    pub convolve_with: Option<Kernel>,
    pub force_fetch: bool,
    /// Cache directory; `None` uses `<app root>/stamp-cache`.
    pub cache_dir: Option<PathBuf>,
    pub timeout: Duration,
    pub want_header: bool,
}

impl StampRequest {
    pub fn new(ra: f64, decl: f64) -> Self {
        Self {
            ra,
            decl,
            survey: DEFAULT_SURVEY.to_string(),
            scaling: DEFAULT_SCALING.to_string(),
            flip: true,
            convolve_with: None,
            force_fetch: false,
            cache_dir: None,
            timeout: DEFAULT_TIMEOUT,
            want_header: true,
        }
    }

    /// Position string sent to the service and used in the cache key.
    pub fn formatted_position(&self) -> String {
        format!("{:.4}, {:.4}", self.ra, self.decl)
    }

    /// Hex cache key for this position/survey/scaling triple.
    pub fn cache_key(&self) -> String {
        cache::cache_key(&format!(
            "{}-{}-{}",
            self.formatted_position(),
            self.survey,
            self.scaling
        ))
    }
}

/// A stamp image and where it came from.
#[derive(Debug, Clone)]
pub struct Stamp {
    /// Pixel values, shape `(rows, columns)`.
    pub data: Array2<f64>,
    pub header: Option<FitsHeader>,
    pub provenance: Provenance,
    pub cache_path: PathBuf,
}

/// Fetch a stamp from the public SkyView service.
pub fn get_stamp(request: &StampRequest) -> Result<Stamp, StampError> {
    get_stamp_from(&SkyviewEndpoint::default(), request)
}

/// Fetch a stamp from a specific SkyView-compatible endpoint.
pub fn get_stamp_from(
    endpoint: &SkyviewEndpoint,
    request: &StampRequest,
) -> Result<Stamp, StampError> {
    let position = request.formatted_position();
    let cache_dir = resolve_cache_dir(request)?;
    let cache_path = cache_dir.join(format!("{}.fits.gz", request.cache_key()));

    let provenance = if request.force_fetch || !cache_path.exists() {
        download_stamp(endpoint, request, &position, &cache_path)?;
        Provenance::NewDownload
    } else {
        Provenance::Cache
    };

    let image = fits::decode(&cache_path).map_err(|source| StampError::Fits {
        path: cache_path.clone(),
        source,
    })?;

    let mut data = image.data;
    if request.flip {
        data = flip_rows(&data);
    }
    if let Some(kernel) = &request.convolve_with {
        data = convolve(&data, kernel);
    }
    info!("Fetched stamp for {position}, provenance: {provenance}");

    Ok(Stamp {
        data,
        header: request.want_header.then_some(image.header),
        provenance,
        cache_path,
    })
}

/// Reverse the row order of an image (top-to-bottom flip).
pub fn flip_rows(data: &Array2<f64>) -> Array2<f64> {
    data.slice(s![..;-1, ..]).to_owned()
}

/// Extract the server-side FITS paths linked from a query response.
pub fn scrape_fits_links(body: &str) -> Vec<String> {
    FITS_LINK
        .captures_iter(body)
        .filter_map(|caps| caps.get(1).map(|m| m.as_str().to_string()))
        .collect()
}

fn resolve_cache_dir(request: &StampRequest) -> Result<PathBuf, StampError> {
    match &request.cache_dir {
        Some(dir) => cache::prepare_cache_dir(dir).map_err(|source| StampError::Cache {
            path: dir.clone(),
            source,
        }),
        None => app_dirs::stamp_cache_dir().map_err(|err| StampError::Cache {
            path: PathBuf::from(app_dirs::APP_DIR_NAME),
            source: std::io::Error::other(err.to_string()),
        }),
    }
}

fn download_stamp(
    endpoint: &SkyviewEndpoint,
    request: &StampRequest,
    position: &str,
    cache_path: &std::path::Path,
) -> Result<(), StampError> {
    let agent = http_client::agent(request.timeout);
    info!(
        "Submitting stamp request for {position}, {}, {}",
        request.survey, request.scaling
    );

    let mut call = agent.get(&endpoint.query_url);
    for (key, value) in FORM_DEFAULTS {
        call = call.query(key, value);
    }
    call = call
        .query("Position", position)
        .query("scaling", &request.scaling)
        .query("survey", &request.survey);
    for _ in 0..3 {
        call = call.query("survey", "_skip_");
    }

    let body = call
        .call()
        .map_err(|err| HttpError::from_ureq(&endpoint.query_url, request.timeout, err))
        .and_then(|response| {
            http_client::read_response_text(response, http_client::MAX_TEXT_BYTES).map_err(
                |source| HttpError::Body {
                    url: endpoint.query_url.clone(),
                    source,
                },
            )
        })
        .map_err(|source| log_http_failure(position, request.timeout, source))?;

    let links = scrape_fits_links(&body);
    let Some(first) = links.first() else {
        error!("No FITS URLs found in query results for {position}");
        return Err(StampError::NoResults {
            position: position.to_string(),
        });
    };
    if links.len() > 1 {
        warn!(
            "SkyView returned {} FITS links for {position}; using the first",
            links.len()
        );
    }

    let fits_url = Url::parse(&endpoint.base_url)
        .and_then(|base| base.join(first))
        .map_err(|source| StampError::Url {
            url: format!("{}/{first}", endpoint.base_url),
            source,
        })?;
    info!("Getting {fits_url}");

    let bytes = agent
        .get(fits_url.as_str())
        .call()
        .map_err(|err| HttpError::from_ureq(fits_url.as_str(), request.timeout, err))
        .and_then(|response| {
            http_client::read_response_bytes(response, http_client::MAX_DOWNLOAD_BYTES).map_err(
                |source| HttpError::Body {
                    url: fits_url.to_string(),
                    source,
                },
            )
        })
        .map_err(|source| log_http_failure(position, request.timeout, source))?;

    cache::write_gzip(cache_path, &bytes).map_err(|source| StampError::Cache {
        path: cache_path.to_path_buf(),
        source,
    })
}

fn log_http_failure(position: &str, timeout: Duration, source: HttpError) -> StampError {
    if source.is_timeout() {
        error!("SkyView stamp request for {position} did not complete within {timeout:?}");
    } else {
        error!("SkyView stamp request for {position} failed: {source}");
    }
    StampError::Http {
        position: position.to_string(),
        source,
    }
}
