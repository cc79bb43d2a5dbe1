//! Collect per-object variability features into one JSON feature collection.

use std::path::PathBuf;

use astrobase::logging::{self, LogOptions};
use astrobase::varclass::{
    CollectRequest, LabelType, MissingLabelPolicy, collect_features, load_label_map,
};

#[derive(Debug, Default)]
struct Options {
    features_dir: PathBuf,
    magcol: String,
    out: PathBuf,
    glob: Option<String>,
    features: Option<Vec<String>>,
    max_objects: Option<usize>,
    labels: Option<PathBuf>,
    label_type: LabelType,
    missing_labels: MissingLabelPolicy,
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
    if let Err(err) = logging::init(&LogOptions::for_tool("astrobase-collect-features", options.verbose)) {
        eprintln!("Logging disabled: {err}");
    }
    let labels = match &options.labels {
        Some(path) => Some(load_label_map(path).map_err(|err| err.to_string())?),
        None => None,
    };

    let mut request = CollectRequest::new(&options.features_dir, options.magcol.clone());
    request.output_path = Some(options.out.clone());
    if let Some(glob) = options.glob {
        request.params.glob = glob;
    }
    if let Some(features) = options.features {
        request.params.feature_names = features;
    }
    request.params.max_objects = options.max_objects;
    request.params.label_type = options.label_type;
    request.params.missing_labels = options.missing_labels;

    let collection = collect_features(&request, labels.as_ref()).map_err(|err| err.to_string())?;
    println!(
        "Collected {} objects with {} features into {}",
        collection.n_objects(),
        collection.feature_names.len(),
        options.out.display()
    );
    if let Some(labels) = &collection.labels {
        let positives = labels.iter().filter(|label| **label != 0).count();
        println!("Labels: {} non-zero of {}", positives, labels.len());
    }
    Ok(())
}

fn parse_args(args: Vec<String>) -> Result<Options, String> {
    let mut options = Options::default();
    let mut idx = 0usize;
    while idx < args.len() {
        match args[idx].as_str() {
            "-h" | "--help" => return Err(help_text()),
            "--features-dir" => {
                idx += 1;
                options.features_dir = PathBuf::from(value(&args, idx, "--features-dir")?);
            }
            "--magcol" => {
                idx += 1;
                options.magcol = value(&args, idx, "--magcol")?;
            }
            "--out" => {
                idx += 1;
                options.out = PathBuf::from(value(&args, idx, "--out")?);
            }
            "--glob" => {
                idx += 1;
                options.glob = Some(value(&args, idx, "--glob")?);
            }
            "--features" => {
                idx += 1;
                let list = value(&args, idx, "--features")?;
                options.features = Some(
                    list.split(',')
                        .map(|name| name.trim().to_string())
                        .filter(|name| !name.is_empty())
                        .collect(),
                );
            }
            "--max-objects" => {
                idx += 1;
                let raw = value(&args, idx, "--max-objects")?;
                options.max_objects = Some(
                    raw.parse::<usize>()
                        .map_err(|_| format!("Invalid --max-objects value: {raw}"))?,
                );
            }
            "--labels" => {
                idx += 1;
                options.labels = Some(PathBuf::from(value(&args, idx, "--labels")?));
            }
            "--label-type" => {
                idx += 1;
                options.label_type = value(&args, idx, "--label-type")?.parse()?;
            }
            "--missing-labels" => {
                idx += 1;
                options.missing_labels = value(&args, idx, "--missing-labels")?.parse()?;
            }
            "-v" | "--verbose" => options.verbose = true,
            unknown => {
                return Err(format!("Unknown argument: {unknown}\n\n{}", help_text()));
            }
        }
        idx += 1;
    }
    if options.features_dir.as_os_str().is_empty() {
        return Err("--features-dir is required".to_string());
    }
    if options.magcol.is_empty() {
        return Err("--magcol is required".to_string());
    }
    if options.out.as_os_str().is_empty() {
        return Err("--out is required".to_string());
    }
    Ok(options)
}

fn value(args: &[String], idx: usize, flag: &str) -> Result<String, String> {
    args.get(idx)
        .cloned()
        .ok_or_else(|| format!("{flag} requires a value"))
}

fn help_text() -> String {
    [
        "astrobase-collect-features",
        "",
        "Collects variability features from per-object JSON records into one collection.",
        "",
        "Usage:",
        "  astrobase-collect-features --features-dir <dir> --magcol <col> --out <file.json> [options]",
        "",
        "Options:",
        "  --features-dir <dir>     Directory of feature records (required).",
        "  --magcol <col>           Magnitude column to read (required).",
        "  --out <file.json>        Output collection path (required).",
        "  --glob <pattern>         Record file pattern (default: varfeatures-*.json).",
        "  --features <a,b,c>       Features to collect (default: non-periodic set).",
        "  --max-objects <n>        Read at most n records.",
        "  --labels <file.json>     JSON object of objectid -> bool or class code.",
        "  --label-type <type>      binary or classes (default: binary).",
        "  --missing-labels <mode>  negative or skip (default: negative).",
        "  -v, --verbose            Debug logging.",
    ]
    .join("\n")
}
