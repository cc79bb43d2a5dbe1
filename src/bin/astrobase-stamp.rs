//! Fetch a SkyView stamp for a sky position, using the local cache when possible.

use std::path::PathBuf;

use astrobase::config;
use astrobase::logging::{self, LogOptions};
use astrobase::services::convolve::Kernel;
use astrobase::services::fits;
use astrobase::services::skyview::get_stamp_from;

#[derive(Debug, Default)]
struct Options {
    ra: Option<f64>,
    dec: Option<f64>,
    survey: Option<String>,
    scaling: Option<String>,
    no_flip: bool,
    force: bool,
    no_header: bool,
    cache_dir: Option<PathBuf>,
    timeout_secs: Option<f64>,
    gaussian: Option<f64>,
    boxcar: Option<usize>,
    out: Option<PathBuf>,
    verbose: bool,
}

fn main() {
    if let Err(err) = run() {
        eprintln!("{err}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), String> {
    let options = parse_args(std::env::args().skip(1).collect())?;
    if let Err(err) = logging::init(&LogOptions::for_tool("astrobase-stamp", options.verbose)) {
        eprintln!("Logging disabled: {err}");
    }
    let settings = config::load_or_default().map_err(|err| err.to_string())?;
    let ra = options.ra.ok_or_else(|| "--ra is required".to_string())?;
    let dec = options.dec.ok_or_else(|| "--dec is required".to_string())?;

    let mut request = settings.stamp.request(ra, dec);
    if let Some(survey) = options.survey {
        request.survey = survey;
    }
    if let Some(scaling) = options.scaling {
        request.scaling = scaling;
    }
    if options.no_flip {
        request.flip = false;
    }
    request.force_fetch = options.force;
    request.want_header = !options.no_header || options.out.is_some();
    if let Some(dir) = options.cache_dir {
        request.cache_dir = Some(dir);
    }
    if let Some(secs) = options.timeout_secs {
        request.timeout = std::time::Duration::from_secs_f64(secs);
    }
    request.convolve_with = match (options.gaussian, options.boxcar) {
        (Some(_), Some(_)) => return Err("Use only one of --gaussian and --boxcar".to_string()),
        (Some(sigma), None) => Some(Kernel::gaussian(sigma).map_err(|err| err.to_string())?),
        (None, Some(width)) => Some(Kernel::boxcar(width).map_err(|err| err.to_string())?),
        (None, None) => None,
    };

    let stamp = get_stamp_from(&settings.stamp.endpoint(), &request).map_err(|err| {
        if err.is_recoverable() {
            format!("No stamp available: {err}")
        } else {
            err.to_string()
        }
    })?;
    let (rows, cols) = stamp.data.dim();
    println!(
        "Stamp {rows}x{cols} for {} ({} / {}) from {}",
        request.formatted_position(),
        request.survey,
        request.scaling,
        stamp.provenance
    );
    println!("Cache file: {}", stamp.cache_path.display());
    if let Some(header) = &stamp.header {
        if !options.no_header {
            println!("Header cards: {}", header.cards.len());
        }
    }
    if let Some(out) = options.out {
        let header = stamp.header.clone().unwrap_or_default();
        fits::write(&out, &stamp.data, &header)
            .map_err(|err| format!("Failed to write {}: {err}", out.display()))?;
        println!("Wrote {}", out.display());
    }
    Ok(())
}

fn parse_args(args: Vec<String>) -> Result<Options, String> {
    let mut options = Options::default();
    let mut idx = 0usize;
    while idx < args.len() {
        match args[idx].as_str() {
            "-h" | "--help" => return Err(help_text()),
            "--ra" => {
                idx += 1;
                options.ra = Some(parse_value(&args, idx, "--ra")?);
            }
            "--dec" => {
                idx += 1;
                options.dec = Some(parse_value(&args, idx, "--dec")?);
            }
            "--survey" => {
                idx += 1;
                options.survey = Some(string_value(&args, idx, "--survey")?);
            }
            "--scaling" => {
                idx += 1;
                options.scaling = Some(string_value(&args, idx, "--scaling")?);
            }
            "--cache-dir" => {
                idx += 1;
                options.cache_dir = Some(PathBuf::from(string_value(&args, idx, "--cache-dir")?));
            }
            "--timeout" => {
                idx += 1;
                options.timeout_secs = Some(parse_value(&args, idx, "--timeout")?);
            }
            "--gaussian" => {
                idx += 1;
                options.gaussian = Some(parse_value(&args, idx, "--gaussian")?);
            }
            "--boxcar" => {
                idx += 1;
                options.boxcar = Some(parse_value(&args, idx, "--boxcar")?);
            }
            "--out" => {
                idx += 1;
                options.out = Some(PathBuf::from(string_value(&args, idx, "--out")?));
            }
            "--no-flip" => options.no_flip = true,
            "--force" => options.force = true,
            "--no-header" => options.no_header = true,
            "-v" | "--verbose" => options.verbose = true,
            unknown => {
                return Err(format!("Unknown argument: {unknown}\n\n{}", help_text()));
            }
        }
        idx += 1;
    }
    Ok(options)
}

fn string_value(args: &[String], idx: usize, flag: &str) -> Result<String, String> {
    args.get(idx)
        .cloned()
        .ok_or_else(|| format!("{flag} requires a value"))
}

fn parse_value<T: std::str::FromStr>(args: &[String], idx: usize, flag: &str) -> Result<T, String> {
    let value = string_value(args, idx, flag)?;
    value
        .parse::<T>()
        .map_err(|_| format!("Invalid {flag} value: {value}"))
}

fn help_text() -> String {
    [
        "astrobase-stamp",
        "",
        "Fetches a digitized sky survey cutout from NASA SkyView, caching it locally.",
        "",
        "Usage:",
        "  astrobase-stamp --ra <deg> --dec <deg> [options]",
        "",
        "Options:",
        "  --ra <deg>          Right ascension in decimal degrees (required).",
        "  --dec <deg>         Declination in decimal degrees (required).",
        "  --survey <name>     Survey name (default: DSS2 Red).",
        "  --scaling <name>    Pixel scaling (default: Linear).",
        "  --no-flip           Keep the service's row order.",
        "  --force             Re-download even if the stamp is cached.",
        "  --cache-dir <dir>   Cache directory (default: ~/.astrobase/stamp-cache).",
        "  --timeout <secs>    Network timeout (default: 10).",
        "  --gaussian <sigma>  Smooth with a Gaussian kernel.",
        "  --boxcar <width>    Smooth with an odd-width box kernel.",
        "  --no-header         Do not report the FITS header.",
        "  --out <file.fits>   Write the returned pixels as a FITS file.",
        "  -v, --verbose       Debug logging.",
    ]
    .join("\n")
}
