//! Train a random forest classifier on a collected feature set.

use std::path::PathBuf;

use astrobase::config;
use astrobase::logging::{self, LogOptions};
use astrobase::ml::metrics::Scoring;
use astrobase::varclass::{FeatureCollection, train_classifier};

#[derive(Debug, Default)]
struct Options {
    features: PathBuf,
    out: PathBuf,
    test_fraction: Option<f64>,
    cv_iterations: Option<usize>,
    cv_folds: Option<usize>,
    scoring: Option<Scoring>,
    workers: Option<usize>,
    seed: Option<u64>,
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
    if let Err(err) = logging::init(&LogOptions::for_tool("astrobase-train-rf", options.verbose)) {
        eprintln!("Logging disabled: {err}");
    }
    let settings = config::load_or_default().map_err(|err| err.to_string())?;
    let mut train = settings.classifier.train_options();
    if let Some(value) = options.test_fraction {
        train.test_fraction = value;
    }
    if let Some(value) = options.cv_iterations {
        train.cv_iterations = value;
    }
    if let Some(value) = options.cv_folds {
        train.cv_folds = value;
    }
    if let Some(value) = options.scoring {
        train.scoring = value;
    }
    if let Some(value) = options.workers {
        train.workers = value;
    }
    if let Some(value) = options.seed {
        train.seed = value;
    }
    train.output_path = Some(options.out.clone());

    let collection = FeatureCollection::load(&options.features).map_err(|err| err.to_string())?;
    println!(
        "Training on {} objects with {} features",
        collection.n_objects(),
        collection.feature_names.len()
    );
    let classifier = train_classifier(&collection, &train).map_err(|err| err.to_string())?;
    println!(
        "Best CV {}: {:.3}",
        classifier.cv_report.scoring, classifier.best_score
    );
    println!(
        "Test split: precision {:.3}, recall {:.3}, F1 {:.3}, accuracy {:.3}",
        classifier.metrics.precision,
        classifier.metrics.recall,
        classifier.metrics.f1,
        classifier.metrics.accuracy
    );
    let matrix = &classifier.metrics.confusion_matrix;
    println!("Confusion matrix (rows actual, columns predicted) for {:?}:", matrix.labels);
    for row in matrix.rows() {
        let cells: Vec<String> = row.iter().map(|count| format!("{count:>6}")).collect();
        println!("  {}", cells.join(""));
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
            "--features" => {
                idx += 1;
                options.features = PathBuf::from(value(&args, idx, "--features")?);
            }
            "--out" => {
                idx += 1;
                options.out = PathBuf::from(value(&args, idx, "--out")?);
            }
            "--test-fraction" => {
                idx += 1;
                options.test_fraction = Some(parsed(&args, idx, "--test-fraction")?);
            }
            "--cv-iterations" => {
                idx += 1;
                options.cv_iterations = Some(parsed(&args, idx, "--cv-iterations")?);
            }
            "--cv-folds" => {
                idx += 1;
                options.cv_folds = Some(parsed(&args, idx, "--cv-folds")?);
            }
            "--scoring" => {
                idx += 1;
                options.scoring = Some(value(&args, idx, "--scoring")?.parse()?);
            }
            "--workers" => {
                idx += 1;
                options.workers = Some(parsed(&args, idx, "--workers")?);
            }
            "--seed" => {
                idx += 1;
                options.seed = Some(parsed(&args, idx, "--seed")?);
            }
            "-v" | "--verbose" => options.verbose = true,
            unknown => {
                return Err(format!("Unknown argument: {unknown}\n\n{}", help_text()));
            }
        }
        idx += 1;
    }
    if options.features.as_os_str().is_empty() {
        return Err("--features is required".to_string());
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

fn parsed<T: std::str::FromStr>(args: &[String], idx: usize, flag: &str) -> Result<T, String> {
    let raw = value(args, idx, flag)?;
    raw.parse::<T>()
        .map_err(|_| format!("Invalid {flag} value: {raw}"))
}

fn help_text() -> String {
    [
        "astrobase-train-rf",
        "",
        "Trains a random forest classifier with randomized cross-validated search.",
        "",
        "Usage:",
        "  astrobase-train-rf --features <collection.json> --out <classifier.json> [options]",
        "",
        "Options:",
        "  --features <file>        Labeled feature collection (required).",
        "  --out <file>             Output classifier bundle (required).",
        "  --test-fraction <f64>    Held-out fraction (default: 0.25).",
        "  --cv-iterations <n>      Sampled configurations (default: 20).",
        "  --cv-folds <n>           Cross-validation folds (default: 5).",
        "  --scoring <metric>       f1, precision, recall, accuracy or f1_macro (default: f1).",
        "  --workers <n>            Worker threads, 0 for all cores (default: 0).",
        "  --seed <u64>             Random seed (default: 14600959).",
        "  -v, --verbose            Debug logging.",
    ]
    .join("\n")
}
