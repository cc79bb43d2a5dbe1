//! Apply a trained random forest classifier to a directory of feature records.

use std::path::PathBuf;

use astrobase::logging::{self, LogOptions};
use astrobase::varclass::{TrainedClassifier, apply_classifier};

#[derive(Debug, Default)]
struct Options {
    classifier: PathBuf,
    features_dir: PathBuf,
    out: PathBuf,
    max_objects: Option<usize>,
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
    if let Err(err) = logging::init(&LogOptions::for_tool("astrobase-apply-rf", options.verbose)) {
        eprintln!("Logging disabled: {err}");
    }
    let classifier = TrainedClassifier::load(&options.classifier).map_err(|err| err.to_string())?;
    let result = apply_classifier(
        &classifier,
        &options.features_dir,
        &options.out,
        options.max_objects,
    )
    .map_err(|err| err.to_string())?;

    println!(
        "Classified {} objects; collected features in {}",
        result.predicted_labels.len(),
        result.features_path.display()
    );
    for label in classifier.model.classes() {
        let count = result
            .predicted_labels
            .iter()
            .filter(|predicted| *predicted == label)
            .count();
        println!("  class {label}: {count}");
    }
    println!("Wrote {}", options.out.display());
    Ok(())
}

fn parse_args(args: Vec<String>) -> Result<Options, String> {
    let mut options = Options::default();
    let mut idx = 0usize;
    while idx < args.len() {
        match args[idx].as_str() {
            "-h" | "--help" => return Err(help_text()),
            "--classifier" => {
                idx += 1;
                options.classifier = PathBuf::from(value(&args, idx, "--classifier")?);
            }
            "--features-dir" => {
                idx += 1;
                options.features_dir = PathBuf::from(value(&args, idx, "--features-dir")?);
            }
            "--out" => {
                idx += 1;
                options.out = PathBuf::from(value(&args, idx, "--out")?);
            }
            "--max-objects" => {
                idx += 1;
                let raw = value(&args, idx, "--max-objects")?;
                options.max_objects = Some(
                    raw.parse::<usize>()
                        .map_err(|_| format!("Invalid --max-objects value: {raw}"))?,
                );
            }
            "-v" | "--verbose" => options.verbose = true,
            unknown => {
                return Err(format!("Unknown argument: {unknown}\n\n{}", help_text()));
            }
        }
        idx += 1;
    }
    if options.classifier.as_os_str().is_empty() {
        return Err("--classifier is required".to_string());
    }
    if options.features_dir.as_os_str().is_empty() {
        return Err("--features-dir is required".to_string());
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
        "astrobase-apply-rf",
        "",
        "Predicts classes for new feature records with a trained classifier.",
        "",
        "Usage:",
        "  astrobase-apply-rf --classifier <file> --features-dir <dir> --out <file.json> [options]",
        "",
        "Options:",
        "  --classifier <file>   Classifier bundle from astrobase-train-rf (required).",
        "  --features-dir <dir>  Directory of feature records (required).",
        "  --out <file.json>     Output predictions (required).",
        "  --max-objects <n>     Read at most n records.",
        "  -v, --verbose         Debug logging.",
    ]
    .join("\n")
}
