use std::path::Path;

use astrobase::services::fits::{self, FitsHeader, HeaderValue};
use ndarray::Array2;
use serde_json::{Value, json};

/// A 3x4 image whose pixel value encodes its position: `10 * row + column`.
pub fn gradient_image() -> Array2<f64> {
    Array2::from_shape_fn((3, 4), |(row, col)| (10 * row + col) as f64)
}

/// FITS bytes for [`gradient_image`] with an `OBJECT` card.
pub fn gradient_fits() -> Vec<u8> {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("gradient.fits");
    let mut header = FitsHeader::default();
    header.push("OBJECT", HeaderValue::Text("TESTFIELD".into()));
    fits::write(&path, &gradient_image(), &header).unwrap();
    std::fs::read(&path).unwrap()
}

/// A primary header claiming a 2^32 x 2^32 image, with no pixel data.
pub fn huge_axes_fits() -> Vec<u8> {
    let mut bytes = Vec::new();
    for card in [
        "SIMPLE  =                    T",
        "BITPIX  =                  -32",
        "NAXIS   =                    2",
        "NAXIS1  =           4294967296",
        "NAXIS2  =           4294967296",
        "END",
    ] {
        bytes.extend_from_slice(format!("{card:<80}").as_bytes());
    }
    bytes.resize(2880, b' ');
    bytes
}

/// Write one per-object feature record the way the feature extractor does.
pub fn write_feature_record(dir: &Path, objectid: &str, magcol: &str, features: Value) {
    let record = json!({ "objectid": objectid, magcol: features });
    let path = dir.join(format!("varfeatures-{objectid}.json"));
    std::fs::write(path, serde_json::to_vec_pretty(&record).unwrap()).unwrap();
}

/// Two well separated populations: variables have large `stetsonj` and `mad`.
pub fn write_population(dir: &Path, magcol: &str, count: usize, prefix: &str) -> Vec<(String, bool)> {
    (0..count)
        .map(|i| {
            let variable = i % 2 == 1;
            let jitter = (i % 5) as f64 * 0.05;
            let (stetsonj, mad) = if variable {
                (3.0 + jitter, 0.4 + jitter)
            } else {
                (0.1 + jitter, 0.02 + jitter / 10.0)
            };
            let objectid = format!("{prefix}{i:03}");
            write_feature_record(
                dir,
                &objectid,
                magcol,
                json!({ "stetsonj": stetsonj, "mad": mad, "skew": jitter, "kurtosis": null }),
            );
            (objectid, variable)
        })
        .collect()
}
