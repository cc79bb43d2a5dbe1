//! Object labels supplied alongside collected features.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::persist::{self, PersistError};

/// Kind of classification task the labels describe.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LabelType {
    /// Variable vs. non-variable; truthy labels become `1`, everything else `0`.
    #[default]
    Binary,
    /// Integer class codes copied as-is.
    Classes,
}

impl fmt::Display for LabelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Binary => f.write_str("binary"),
            Self::Classes => f.write_str("classes"),
        }
    }
}

impl FromStr for LabelType {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "binary" => Ok(Self::Binary),
            "classes" => Ok(Self::Classes),
            other => Err(format!(
                "Unknown label type '{other}' (expected binary or classes)"
            )),
        }
    }
}

/// What to do with objects that have no entry in the label map.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingLabelPolicy {
    /// Keep the object with label `0`.
    #[default]
    Negative,
    /// Drop the object from the collection.
    Skip,
}

impl FromStr for MissingLabelPolicy {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "negative" => Ok(Self::Negative),
            "skip" => Ok(Self::Skip),
            other => Err(format!(
                "Unknown missing-label policy '{other}' (expected negative or skip)"
            )),
        }
    }
}

/// A label as written in a label map: a flag or an integer class code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LabelValue {
    Flag(bool),
    Class(i64),
}

impl LabelValue {
    /// Encode the label for the given task.
    pub fn encode(self, label_type: LabelType) -> i64 {
        match (label_type, self) {
            (LabelType::Binary, LabelValue::Flag(flag)) => i64::from(flag),
            (LabelType::Binary, LabelValue::Class(code)) => i64::from(code != 0),
            (LabelType::Classes, LabelValue::Flag(flag)) => i64::from(flag),
            (LabelType::Classes, LabelValue::Class(code)) => code,
        }
    }
}

/// Object identifier to label.
pub type LabelMap = BTreeMap<String, LabelValue>;

/// Load a label map from a JSON object of `"<objectid>": <bool | int>` entries.
pub fn load_label_map(path: &Path) -> Result<LabelMap, PersistError> {
    persist::load_json(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binary_labels_follow_truthiness() {
        assert_eq!(LabelValue::Flag(true).encode(LabelType::Binary), 1);
        assert_eq!(LabelValue::Flag(false).encode(LabelType::Binary), 0);
        assert_eq!(LabelValue::Class(3).encode(LabelType::Binary), 1);
        assert_eq!(LabelValue::Class(0).encode(LabelType::Binary), 0);
        assert_eq!(LabelValue::Class(3).encode(LabelType::Classes), 3);
    }

    #[test]
    fn label_maps_accept_flags_and_codes() {
        let map: LabelMap =
            serde_json::from_str(r#"{"obj-1": true, "obj-2": 4, "obj-3": false}"#).unwrap();
        assert_eq!(map["obj-1"], LabelValue::Flag(true));
        assert_eq!(map["obj-2"], LabelValue::Class(4));
        assert_eq!("Classes".parse::<LabelType>().unwrap(), LabelType::Classes);
        assert_eq!("skip".parse::<MissingLabelPolicy>().unwrap(), MissingLabelPolicy::Skip);
    }
}
