//! Render the confusion matrix and feature importances of a trained classifier.

use std::path::PathBuf;

use astrobase::logging::{self, LogOptions};
use astrobase::varclass::{TrainedClassifier, plot_training_results};

#[derive(Debug, Default)]
struct Options {
    classifier: PathBuf,
    out: PathBuf,
    class_labels: Option<Vec<String>>,
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
    if let Err(err) = logging::init(&LogOptions::for_tool("astrobase-plot-rf", options.verbose)) {
        eprintln!("Logging disabled: {err}");
    }
    let classifier = TrainedClassifier::load(&options.classifier).map_err(|err| err.to_string())?;
    let class_labels = options.class_labels.unwrap_or_else(|| {
        classifier
            .metrics
            .confusion_matrix
            .labels
            .iter()
            .map(|label| label.to_string())
            .collect()
    });
    let written = plot_training_results(&classifier, &class_labels, &options.out)
        .map_err(|err| err.to_string())?;
    println!("Wrote {}", written.display());
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
            "--out" => {
                idx += 1;
                options.out = PathBuf::from(value(&args, idx, "--out")?);
            }
            "--class-labels" => {
                idx += 1;
                let list = value(&args, idx, "--class-labels")?;
                options.class_labels =
                    Some(list.split(',').map(|label| label.trim().to_string()).collect());
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
        "astrobase-plot-rf",
        "",
        "Plots the test-split confusion matrix and feature importances of a classifier.",
        "",
        "Usage:",
        "  astrobase-plot-rf --classifier <file> --out <image.png> [options]",
        "",
        "Options:",
        "  --classifier <file>     Classifier bundle from astrobase-train-rf (required).",
        "  --out <image>           Output image; format follows the extension (required).",
        "  --class-labels <a,b>    Axis labels, one per class (default: the class codes).",
        "  -v, --verbose           Debug logging.",
    ]
    .join("\n")
}
