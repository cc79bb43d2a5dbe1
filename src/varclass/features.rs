//! Collect per-object variability features into a fixed-width matrix.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};

use ndarray::Array2;
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::labels::{LabelMap, LabelType, MissingLabelPolicy};
use crate::persist::{self, PersistError};

/// Default file pattern for per-object feature records.
pub const DEFAULT_FEATURE_GLOB: &str = "varfeatures-*.json";

/// Non-periodic variability features collected when no list is given.
pub const NONPERIODIC_FEATURES: &[&str] = &[
    "stetsonj",
    "stetsonk",
    "amplitude",
    "magnitude_ratio",
    "linear_fit_slope",
    "eta_normal",
    "percentile_difference_flux_percentile",
    "mad",
    "skew",
    "kurtosis",
    "mag_iqr",
    "beyond1std",
    "grcolor",
    "gicolor",
    "ricolor",
    "bvcolor",
    "jhcolor",
    "jkcolor",
    "hkcolor",
    "gkcolor",
    "propermotion",
];

#[derive(Debug, thiserror::Error)]
pub enum CollectError {
    #[error("Failed to list features directory {path}: {source}")]
    ReadDir {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Invalid feature file pattern '{pattern}': {source}")]
    Pattern {
        pattern: String,
        source: regex::Error,
    },
    #[error(transparent)]
    Persist(#[from] PersistError),
}

/// Parameters of a collection run, persisted with the collection so a
/// trained classifier can re-collect features the same way.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectParams {
    /// File-name pattern with `*` and `?` wildcards.
    pub glob: String,
    /// Features to look for, in preferred column order.
    pub feature_names: Vec<String>,
    /// Only read this many files (after sorting); `None` or `0` reads all.
    pub max_objects: Option<usize>,
    pub label_type: LabelType,
    pub missing_labels: MissingLabelPolicy,
}

impl Default for CollectParams {
    fn default() -> Self {
        Self {
            glob: DEFAULT_FEATURE_GLOB.to_string(),
            feature_names: NONPERIODIC_FEATURES.iter().map(|s| s.to_string()).collect(),
            max_objects: None,
            label_type: LabelType::Binary,
            missing_labels: MissingLabelPolicy::Negative,
        }
    }
}

/// Input for [`collect_features`].
#[derive(Debug, Clone)]
pub struct CollectRequest {
    pub features_dir: PathBuf,
    /// Magnitude column whose features are read from each record.
    pub magcol: String,
    /// Persist the collection here when set.
    pub output_path: Option<PathBuf>,
    pub params: CollectParams,
}

impl CollectRequest {
    pub fn new(features_dir: impl Into<PathBuf>, magcol: impl Into<String>) -> Self {
        Self {
            features_dir: features_dir.into(),
            magcol: magcol.into(),
            output_path: None,
            params: CollectParams::default(),
        }
    }
}

/// Features of many objects assembled into one matrix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureCollection {
    /// Row order of [`FeatureCollection::features`].
    pub object_ids: Vec<String>,
    /// Column order of [`FeatureCollection::features`].
    pub feature_names: Vec<String>,
    /// Objects x features; missing entries are NaN.
    #[serde(with = "persist::nan_matrix")]
    pub features: Array2<f64>,
    /// One label per object when a label map was supplied.
    pub labels: Option<Vec<i64>>,
    pub magcol: String,
    pub params: CollectParams,
}

impl FeatureCollection {
    pub fn n_objects(&self) -> usize {
        self.object_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.object_ids.is_empty()
    }

    pub fn save(&self, path: &Path) -> Result<(), PersistError> {
        persist::save_json(path, self)
    }

    pub fn load(path: &Path) -> Result<Self, PersistError> {
        persist::load_json(path)
    }

    /// Realign the matrix to `names`, filling columns this collection lacks with NaN.
    pub fn select_features(&self, names: &[String]) -> FeatureCollection {
        let positions: HashMap<&str, usize> = self
            .feature_names
            .iter()
            .enumerate()
            .map(|(idx, name)| (name.as_str(), idx))
            .collect();
        let mut features = Array2::from_elem((self.n_objects(), names.len()), f64::NAN);
        for (col, name) in names.iter().enumerate() {
            if let Some(&source) = positions.get(name.as_str()) {
                features.column_mut(col).assign(&self.features.column(source));
            }
        }
        FeatureCollection {
            object_ids: self.object_ids.clone(),
            feature_names: names.to_vec(),
            features,
            labels: self.labels.clone(),
            magcol: self.magcol.clone(),
            params: self.params.clone(),
        }
    }
}

#[derive(Deserialize)]
struct FeatureRecord {
    objectid: String,
    #[serde(flatten)]
    columns: BTreeMap<String, serde_json::Value>,
}

/// Scan `request.features_dir` for feature records and build a collection.
///
/// Unreadable records, records without the magnitude column, and repeated
/// object ids are skipped with a warning.
pub fn collect_features(
    request: &CollectRequest,
    labels: Option<&LabelMap>,
) -> Result<FeatureCollection, CollectError> {
    let params = &request.params;
    let wanted: Vec<String> = if params.feature_names.is_empty() {
        NONPERIODIC_FEATURES.iter().map(|s| s.to_string()).collect()
    } else {
        params.feature_names.clone()
    };

    let mut files = list_matching(&request.features_dir, &params.glob)?;
    if let Some(max) = params.max_objects.filter(|max| *max > 0) {
        files.truncate(max);
    }
    tracing::info!(
        magcol = %request.magcol,
        files = files.len(),
        dir = %request.features_dir.display(),
        "Collecting features"
    );

    let mut object_ids: Vec<String> = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();
    let mut rows: Vec<Vec<(usize, f64)>> = Vec::new();
    let mut available: Vec<usize> = Vec::new();

    for path in &files {
        let record = match read_record(path) {
            Ok(record) => record,
            Err(err) => {
                tracing::warn!(path = %path.display(), "Skipping unreadable feature record: {err}");
                continue;
            }
        };
        let Some(serde_json::Value::Object(values)) = record.columns.get(&request.magcol) else {
            tracing::warn!(
                path = %path.display(),
                magcol = %request.magcol,
                "Skipping feature record without magnitude column"
            );
            continue;
        };
        if seen.contains(&record.objectid) {
            tracing::warn!(objectid = %record.objectid, "Skipping duplicate object");
            continue;
        }
        if labels.is_some_and(|map| {
            params.missing_labels == MissingLabelPolicy::Skip
                && !map.contains_key(&record.objectid)
        }) {
            tracing::debug!(objectid = %record.objectid, "Skipping unlabeled object");
            continue;
        }

        let mut row = Vec::new();
        for (idx, name) in wanted.iter().enumerate() {
            let Some(value) = values.get(name).and_then(feature_value) else {
                continue;
            };
            if !available.contains(&idx) {
                available.push(idx);
            }
            row.push((idx, value));
        }
        seen.insert(record.objectid.clone());
        object_ids.push(record.objectid);
        rows.push(row);
    }

    let mut features = Array2::from_elem((rows.len(), available.len()), f64::NAN);
    let column_of: HashMap<usize, usize> = available
        .iter()
        .enumerate()
        .map(|(col, idx)| (*idx, col))
        .collect();
    for (row_idx, row) in rows.iter().enumerate() {
        for (idx, value) in row {
            if let Some(&col) = column_of.get(idx) {
                features[(row_idx, col)] = *value;
            }
        }
    }

    let label_vec = labels.map(|map| {
        object_ids
            .iter()
            .map(|id| {
                map.get(id)
                    .map_or(0, |label| label.encode(params.label_type))
            })
            .collect::<Vec<i64>>()
    });
    if let Some(map) = labels {
        let unlabeled = object_ids.iter().filter(|id| !map.contains_key(*id)).count();
        if unlabeled > 0 {
            tracing::warn!(unlabeled, "Objects without a label were assigned label 0");
        }
    }

    let collection = FeatureCollection {
        object_ids,
        feature_names: available.iter().map(|idx| wanted[*idx].clone()).collect(),
        features,
        labels: label_vec,
        magcol: request.magcol.clone(),
        params: CollectParams {
            feature_names: wanted,
            ..params.clone()
        },
    };
    tracing::info!(
        objects = collection.n_objects(),
        features = collection.feature_names.len(),
        "Collected features"
    );

    if let Some(path) = &request.output_path {
        collection.save(path)?;
        tracing::info!(path = %path.display(), "Wrote collected features");
    }
    Ok(collection)
}

fn read_record(path: &Path) -> Result<FeatureRecord, String> {
    let bytes = std::fs::read(path).map_err(|err| err.to_string())?;
    serde_json::from_slice(&bytes).map_err(|err| err.to_string())
}

fn feature_value(value: &serde_json::Value) -> Option<f64> {
    match value {
        serde_json::Value::Number(number) => number.as_f64(),
        serde_json::Value::Null => Some(f64::NAN),
        _ => None,
    }
}

/// Files directly inside `dir` whose names match `pattern`, sorted by name.
fn list_matching(dir: &Path, pattern: &str) -> Result<Vec<PathBuf>, CollectError> {
    let regex = glob_regex(pattern)?;
    let entries = std::fs::read_dir(dir).map_err(|source| CollectError::ReadDir {
        path: dir.to_path_buf(),
        source,
    })?;
    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| CollectError::ReadDir {
            path: dir.to_path_buf(),
            source,
        })?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let matches = path
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| regex.is_match(name));
        if matches {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

fn glob_regex(pattern: &str) -> Result<Regex, CollectError> {
    let mut source = String::from("^");
    for ch in pattern.chars() {
        match ch {
            '*' => source.push_str(".*"),
            '?' => source.push('.'),
            other => source.push_str(&regex::escape(&other.to_string())),
        }
    }
    source.push('$');
    Regex::new(&source).map_err(|source| CollectError::Pattern {
        pattern: pattern.to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::varclass::labels::LabelValue;
    use serde_json::json;
    use tempfile::tempdir;

    fn write_record(dir: &Path, name: &str, value: serde_json::Value) {
        std::fs::write(dir.join(name), serde_json::to_vec(&value).unwrap()).unwrap();
    }

    fn request(dir: &Path, features: &[&str]) -> CollectRequest {
        let mut request = CollectRequest::new(dir, "aep_000");
        request.params.feature_names = features.iter().map(|s| s.to_string()).collect();
        request
    }

    #[test]
    fn glob_matches_whole_file_names() {
        let regex = glob_regex("varfeatures-*.json").unwrap();
        assert!(regex.is_match("varfeatures-obj1.json"));
        assert!(!regex.is_match("varfeatures-obj1.json.bak"));
        assert!(!regex.is_match("varfeaturesXobj1.json"));
        assert!(glob_regex("obj?.json").unwrap().is_match("obj7.json"));
    }

    #[test]
    fn missing_features_become_nan_columns() {
        let dir = tempdir().unwrap();
        write_record(
            dir.path(),
            "varfeatures-a.json",
            json!({"objectid": "a", "aep_000": {"stetsonj": 1.0, "skew": 0.5}}),
        );
        write_record(
            dir.path(),
            "varfeatures-b.json",
            json!({"objectid": "b", "aep_000": {"stetsonj": 2.0, "mad": null}}),
        );
        let collection =
            collect_features(&request(dir.path(), &["mad", "stetsonj", "skew"]), None).unwrap();
        assert_eq!(collection.object_ids, vec!["a", "b"]);
        // first-seen order: stetsonj and skew come from "a", mad from "b"
        assert_eq!(collection.feature_names, vec!["stetsonj", "skew", "mad"]);
        assert_eq!(collection.features.dim(), (2, 3));
        assert_eq!(collection.features[(0, 0)], 1.0);
        assert!(collection.features[(0, 2)].is_nan());
        assert!(collection.features[(1, 1)].is_nan());
        assert!(collection.features[(1, 2)].is_nan());
        assert!(collection.labels.is_none());
    }

    #[test]
    fn bad_records_and_duplicates_are_skipped() {
        let dir = tempdir().unwrap();
        write_record(
            dir.path(),
            "varfeatures-1.json",
            json!({"objectid": "x", "aep_000": {"mad": 1.0}}),
        );
        write_record(
            dir.path(),
            "varfeatures-2.json",
            json!({"objectid": "x", "aep_000": {"mad": 9.0}}),
        );
        write_record(
            dir.path(),
            "varfeatures-3.json",
            json!({"objectid": "y", "other": {"mad": 1.0}}),
        );
        std::fs::write(dir.path().join("varfeatures-4.json"), b"not json").unwrap();
        write_record(dir.path(), "ignored.json", json!({"objectid": "z"}));

        let collection = collect_features(&request(dir.path(), &["mad"]), None).unwrap();
        assert_eq!(collection.object_ids, vec!["x"]);
        assert_eq!(collection.features[(0, 0)], 1.0);
    }

    #[test]
    fn labels_follow_policy() {
        let dir = tempdir().unwrap();
        for id in ["a", "b", "c"] {
            write_record(
                dir.path(),
                &format!("varfeatures-{id}.json"),
                json!({"objectid": id, "aep_000": {"mad": 1.0}}),
            );
        }
        let mut labels = LabelMap::new();
        labels.insert("a".to_string(), LabelValue::Flag(true));
        labels.insert("c".to_string(), LabelValue::Class(0));

        let mut req = request(dir.path(), &["mad"]);
        let collection = collect_features(&req, Some(&labels)).unwrap();
        assert_eq!(collection.labels, Some(vec![1, 0, 0]));

        req.params.missing_labels = MissingLabelPolicy::Skip;
        let collection = collect_features(&req, Some(&labels)).unwrap();
        assert_eq!(collection.object_ids, vec!["a", "c"]);
        assert_eq!(collection.labels, Some(vec![1, 0]));
    }

    #[test]
    fn max_objects_limits_sorted_files() {
        let dir = tempdir().unwrap();
        for id in ["c", "a", "b"] {
            write_record(
                dir.path(),
                &format!("varfeatures-{id}.json"),
                json!({"objectid": id, "aep_000": {"mad": 1.0}}),
            );
        }
        let mut req = request(dir.path(), &["mad"]);
        req.params.max_objects = Some(2);
        let collection = collect_features(&req, None).unwrap();
        assert_eq!(collection.object_ids, vec!["a", "b"]);
    }

    #[test]
    fn empty_directory_gives_empty_collection() {
        let dir = tempdir().unwrap();
        let collection = collect_features(&request(dir.path(), &["mad"]), None).unwrap();
        assert!(collection.is_empty());
        assert_eq!(collection.features.dim(), (0, 0));
    }

    #[test]
    fn select_features_realigns_columns() {
        let collection = FeatureCollection {
            object_ids: vec!["a".into(), "b".into()],
            feature_names: vec!["x".into(), "y".into()],
            features: ndarray::array![[1.0, 2.0], [3.0, 4.0]],
            labels: None,
            magcol: "aep_000".into(),
            params: CollectParams::default(),
        };
        let selected = collection.select_features(&["y".to_string(), "z".to_string()]);
        assert_eq!(selected.feature_names, vec!["y", "z"]);
        assert_eq!(selected.features[(1, 0)], 4.0);
        assert!(selected.features[(0, 1)].is_nan());
    }

    #[test]
    fn missing_directory_is_an_error() {
        let dir = tempdir().unwrap();
        let req = request(&dir.path().join("absent"), &["mad"]);
        assert!(matches!(
            collect_features(&req, None),
            Err(CollectError::ReadDir { .. })
        ));
    }
}
