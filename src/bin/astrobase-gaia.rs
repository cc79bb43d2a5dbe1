//! Run an ADQL query against the Gaia TAP service and cache the result table.

use std::path::PathBuf;

use astrobase::config;
use astrobase::logging::{self, LogOptions};
use astrobase::services::gaia::{
    self, ResultFormat, objectlist_conesearch, objectlist_radeclbox, tap_query,
};

#[derive(Debug)]
enum Query {
    Adql(String),
    Cone { ra: f64, dec: f64, radius_arcsec: f64 },
    Box([f64; 4]),
}

#[derive(Debug, Default)]
struct Options {
    query: Option<Query>,
    table: Option<String>,
    columns: Option<Vec<String>>,
    format: Option<ResultFormat>,
    force: bool,
    cache_dir: Option<PathBuf>,
    timeout_secs: Option<f64>,
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
    if let Err(err) = logging::init(&LogOptions::for_tool("astrobase-gaia", options.verbose)) {
        eprintln!("Logging disabled: {err}");
    }
    let settings = config::load_or_default().map_err(|err| err.to_string())?;
    let mut tap = settings.gaia.tap_options();
    tap.force_fetch = options.force;
    if let Some(format) = options.format {
        tap.format = format;
    }
    if let Some(dir) = options.cache_dir {
        tap.cache_dir = Some(dir);
    }
    if let Some(secs) = options.timeout_secs {
        tap.timeout = std::time::Duration::from_secs_f64(secs);
    }
    let table = options.table.unwrap_or(settings.gaia.table);
    let columns: Vec<String> = options.columns.unwrap_or_else(|| {
        gaia::DEFAULT_COLUMNS.iter().map(|c| c.to_string()).collect()
    });
    let columns: Vec<&str> = columns.iter().map(String::as_str).collect();

    let query = options
        .query
        .ok_or_else(|| "One of --query, --cone or --box is required".to_string())?;
    let result = match query {
        Query::Adql(adql) => tap_query(&adql, &tap),
        Query::Cone {
            ra,
            dec,
            radius_arcsec,
        } => objectlist_conesearch(ra, dec, radius_arcsec, &table, &columns, &tap),
        Query::Box(bounds) => objectlist_radeclbox(bounds, &table, &columns, &tap),
    }
    .map_err(|err| {
        if err.is_recoverable() {
            format!("Query did not complete: {err}")
        } else {
            err.to_string()
        }
    })?;
    println!("Result ({}): {}", result.provenance, result.result.display());
    Ok(())
}

fn parse_args(args: Vec<String>) -> Result<Options, String> {
    let mut options = Options::default();
    let mut idx = 0usize;
    while idx < args.len() {
        match args[idx].as_str() {
            "-h" | "--help" => return Err(help_text()),
            "--query" => {
                idx += 1;
                options.query = Some(Query::Adql(string_value(&args, idx, "--query")?));
            }
            "--cone" => {
                let ra = parse_value(&args, idx + 1, "--cone")?;
                let dec = parse_value(&args, idx + 2, "--cone")?;
                let radius_arcsec = parse_value(&args, idx + 3, "--cone")?;
                idx += 3;
                options.query = Some(Query::Cone {
                    ra,
                    dec,
                    radius_arcsec,
                });
            }
            "--box" => {
                let mut bounds = [0.0; 4];
                for (offset, bound) in bounds.iter_mut().enumerate() {
                    *bound = parse_value(&args, idx + 1 + offset, "--box")?;
                }
                idx += 4;
                options.query = Some(Query::Box(bounds));
            }
            "--table" => {
                idx += 1;
                options.table = Some(string_value(&args, idx, "--table")?);
            }
            "--columns" => {
                idx += 1;
                let value = string_value(&args, idx, "--columns")?;
                options.columns = Some(
                    value
                        .split(',')
                        .map(|c| c.trim().to_string())
                        .filter(|c| !c.is_empty())
                        .collect(),
                );
            }
            "--format" => {
                idx += 1;
                options.format = Some(string_value(&args, idx, "--format")?.parse()?);
            }
            "--cache-dir" => {
                idx += 1;
                options.cache_dir = Some(PathBuf::from(string_value(&args, idx, "--cache-dir")?));
            }
            "--timeout" => {
                idx += 1;
                options.timeout_secs = Some(parse_value(&args, idx, "--timeout")?);
            }
            "--force" => options.force = true,
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
        "astrobase-gaia",
        "",
        "Queries the Gaia archive TAP service and caches the result table.",
        "",
        "Usage:",
        "  astrobase-gaia --query <adql> [options]",
        "  astrobase-gaia --cone <ra> <dec> <radius_arcsec> [options]",
        "  astrobase-gaia --box <ra_min> <ra_max> <dec_min> <dec_max> [options]",
        "",
        "Options:",
        "  --table <name>      Table for --cone/--box (default: gaiadr1.gaia_source).",
        "  --columns <a,b,c>   Columns for --cone/--box.",
        "  --format <fmt>      json, csv or votable (default: csv).",
        "  --force             Re-run the query even if the result is cached.",
        "  --cache-dir <dir>   Cache directory (default: ~/.astrobase/gaia-cache).",
        "  --timeout <secs>    Per-request network timeout (default: 60).",
        "  -v, --verbose       Debug logging.",
    ]
    .join("\n")
}
