//! Survey stamp images read and written through cfitsio.
//!
//! Only the primary HDU is used. cfitsio reads gzip-compressed files by path,
//! so cached `.fits.gz` stamps are opened in place.

use std::path::Path;

use fitsio::FitsFile;
use fitsio::hdu::{FitsHdu, HduInfo};
use fitsio::images::{ImageDescription, ImageType};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Largest image accepted, in pixels. SkyView stamps are 300x300.
pub const MAX_PIXELS: usize = 1 << 26;

/// Header keywords copied out of a stamp, with the type they are read as.
const STAMP_KEYWORDS: &[(&str, KeyKind)] = &[
    ("BITPIX", KeyKind::Integer),
    ("NAXIS1", KeyKind::Integer),
    ("NAXIS2", KeyKind::Integer),
    ("BUNIT", KeyKind::Text),
    ("OBJECT", KeyKind::Text),
    ("SURVEY", KeyKind::Text),
    ("TELESCOP", KeyKind::Text),
    ("INSTRUME", KeyKind::Text),
    ("DATE-OBS", KeyKind::Text),
    ("EQUINOX", KeyKind::Float),
    ("EPOCH", KeyKind::Float),
    ("RADESYS", KeyKind::Text),
    ("RADECSYS", KeyKind::Text),
    ("CTYPE1", KeyKind::Text),
    ("CTYPE2", KeyKind::Text),
    ("CRVAL1", KeyKind::Float),
    ("CRVAL2", KeyKind::Float),
    ("CRPIX1", KeyKind::Float),
    ("CRPIX2", KeyKind::Float),
    ("CDELT1", KeyKind::Float),
    ("CDELT2", KeyKind::Float),
    ("CROTA1", KeyKind::Float),
    ("CROTA2", KeyKind::Float),
    ("CD1_1", KeyKind::Float),
    ("CD1_2", KeyKind::Float),
    ("CD2_1", KeyKind::Float),
    ("CD2_2", KeyKind::Float),
    ("DATAMIN", KeyKind::Float),
    ("DATAMAX", KeyKind::Float),
];

/// Keywords cfitsio derives from the image itself; never copied on write.
const STRUCTURAL_KEYWORDS: &[&str] = &[
    "SIMPLE", "BITPIX", "NAXIS", "NAXIS1", "NAXIS2", "NAXIS3", "EXTEND", "BSCALE", "BZERO",
    "BLANK", "END",
];

#[derive(Debug, Error)]
pub enum FitsError {
    #[error("Failed to open FITS file: {0}")]
    Open(#[source] fitsio::errors::Error),
    #[error("Primary HDU is not an image")]
    NotAnImage,
    #[error("Unsupported image shape {0:?}; expected two axes")]
    UnsupportedShape(Vec<usize>),
    #[error("Image of {rows}x{cols} pixels exceeds the {MAX_PIXELS} pixel limit")]
    TooLarge { rows: usize, cols: usize },
    #[error("Failed to read FITS image data: {0}")]
    Read(#[source] fitsio::errors::Error),
    #[error("Pixel count {found} does not match shape {rows}x{cols}")]
    PixelCount {
        rows: usize,
        cols: usize,
        found: usize,
    },
    #[error("Failed to write FITS file: {0}")]
    Write(#[source] fitsio::errors::Error),
}

#[derive(Debug, Clone, Copy)]
enum KeyKind {
    Integer,
    Float,
    Text,
}

/// Typed value of a header keyword.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum HeaderValue {
    Integer(i64),
    Float(f64),
    Text(String),
}

impl HeaderValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Integer(v) => Some(*v as f64),
            Self::Float(v) => Some(*v),
            Self::Text(_) => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(v) => Some(*v),
            Self::Float(v) if v.fract() == 0.0 => Some(*v as i64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(v) => Some(v),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeaderCard {
    pub keyword: String,
    pub value: HeaderValue,
}

/// Header keywords present in the primary HDU, in lookup order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FitsHeader {
    pub cards: Vec<HeaderCard>,
}

impl FitsHeader {
    pub fn get(&self, keyword: &str) -> Option<&HeaderValue> {
        self.cards
            .iter()
            .find(|card| card.keyword == keyword)
            .map(|card| &card.value)
    }

    pub fn get_f64(&self, keyword: &str) -> Option<f64> {
        self.get(keyword).and_then(HeaderValue::as_f64)
    }

    pub fn get_i64(&self, keyword: &str) -> Option<i64> {
        self.get(keyword).and_then(HeaderValue::as_i64)
    }

    pub fn push(&mut self, keyword: &str, value: HeaderValue) {
        self.cards.push(HeaderCard {
            keyword: keyword.to_string(),
            value,
        });
    }
}

/// Primary image plus the header keywords that were found.
#[derive(Debug, Clone)]
pub struct FitsImage {
    pub header: FitsHeader,
    /// Shape `(NAXIS2, NAXIS1)`; row 0 is the first row stored in the file.
    pub data: Array2<f64>,
}

/// Read the primary image of a (possibly gzip-compressed) FITS file.
///
/// BSCALE/BZERO are applied by cfitsio. A third axis of length 1 is accepted.
pub fn decode(path: &Path) -> Result<FitsImage, FitsError> {
    let mut fptr = FitsFile::open(path).map_err(FitsError::Open)?;
    let hdu = fptr.primary_hdu().map_err(FitsError::Open)?;
    let shape = match &hdu.info {
        HduInfo::ImageInfo { shape, .. } => shape.clone(),
        _ => return Err(FitsError::NotAnImage),
    };
    let (rows, cols) = image_dims(&shape)?;

    let pixels: Vec<f64> = hdu.read_image(&mut fptr).map_err(FitsError::Read)?;
    let found = pixels.len();
    let data = Array2::from_shape_vec((rows, cols), pixels)
        .map_err(|_| FitsError::PixelCount { rows, cols, found })?;
    let header = read_header(&hdu, &mut fptr);
    Ok(FitsImage { header, data })
}

/// Write `data` as a double-precision primary image, replacing `path`.
///
/// Structural keywords in `header` are skipped; cfitsio writes its own.
pub fn write(path: &Path, data: &Array2<f64>, header: &FitsHeader) -> Result<(), FitsError> {
    let (rows, cols) = data.dim();
    let description = ImageDescription {
        data_type: ImageType::Double,
        dimensions: &[rows, cols],
    };
    let mut fptr = FitsFile::create(path)
        .with_custom_primary(&description)
        .overwrite()
        .open()
        .map_err(FitsError::Write)?;
    let hdu = fptr.primary_hdu().map_err(FitsError::Write)?;
    let pixels: Vec<f64> = data.iter().copied().collect();
    hdu.write_image(&mut fptr, &pixels).map_err(FitsError::Write)?;

    for card in &header.cards {
        if STRUCTURAL_KEYWORDS.contains(&card.keyword.as_str()) {
            continue;
        }
        let keyword = card.keyword.as_str();
        match &card.value {
            HeaderValue::Integer(v) => hdu.write_key(&mut fptr, keyword, *v),
            HeaderValue::Float(v) => hdu.write_key(&mut fptr, keyword, *v),
            HeaderValue::Text(v) => hdu.write_key(&mut fptr, keyword, v.as_str()),
        }
        .map_err(FitsError::Write)?;
    }
    Ok(())
}

/// Validate an image shape (slowest axis first) and return `(rows, cols)`.
fn image_dims(shape: &[usize]) -> Result<(usize, usize), FitsError> {
    let (rows, cols) = match shape {
        [rows, cols] | [1, rows, cols] => (*rows, *cols),
        _ => return Err(FitsError::UnsupportedShape(shape.to_vec())),
    };
    match rows.checked_mul(cols) {
        Some(count) if count <= MAX_PIXELS => Ok((rows, cols)),
        _ => Err(FitsError::TooLarge { rows, cols }),
    }
}

fn read_header(hdu: &FitsHdu, fptr: &mut FitsFile) -> FitsHeader {
    let mut header = FitsHeader::default();
    for &(keyword, kind) in STAMP_KEYWORDS {
        let value = match kind {
            KeyKind::Integer => hdu.read_key::<i64>(fptr, keyword).ok().map(HeaderValue::Integer),
            KeyKind::Float => hdu.read_key::<f64>(fptr, keyword).ok().map(HeaderValue::Float),
            KeyKind::Text => hdu
                .read_key::<String>(fptr, keyword)
                .ok()
                .map(|text| HeaderValue::Text(text.trim().to_string())),
        };
        if let Some(value) = value {
            header.push(keyword, value);
        }
    }
    header
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use tempfile::tempdir;

    #[test]
    fn written_stamp_reads_back_with_header() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("stamp.fits");
        let data = array![[1.0, 2.5, -3.0], [4.0, 5.0, 6.25]];
        let mut header = FitsHeader::default();
        header.push("SURVEY", HeaderValue::Text("DSS2 Red".into()));
        header.push("CRVAL1", HeaderValue::Float(10.5));
        header.push("NAXIS1", HeaderValue::Integer(99));
        write(&path, &data, &header).unwrap();

        let image = decode(&path).unwrap();
        assert_eq!(image.data, data);
        assert_eq!(image.header.get_i64("NAXIS1"), Some(3));
        assert_eq!(image.header.get_i64("NAXIS2"), Some(2));
        assert_eq!(
            image.header.get("SURVEY").and_then(HeaderValue::as_str),
            Some("DSS2 Red")
        );
        assert_eq!(image.header.get_f64("CRVAL1"), Some(10.5));
        assert!(image.header.get("CTYPE1").is_none());
    }

    #[test]
    fn shapes_are_checked_before_reading() {
        assert_eq!(image_dims(&[300, 300]).unwrap(), (300, 300));
        assert_eq!(image_dims(&[1, 2, 3]).unwrap(), (2, 3));
        assert!(matches!(
            image_dims(&[4_294_967_296, 4_294_967_296]),
            Err(FitsError::TooLarge { .. })
        ));
        assert!(matches!(
            image_dims(&[usize::MAX, 2]),
            Err(FitsError::TooLarge { .. })
        ));
        assert!(matches!(
            image_dims(&[3, 2, 2]),
            Err(FitsError::UnsupportedShape(_))
        ));
    }

    #[test]
    fn header_with_huge_axes_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("huge.fits");
        std::fs::write(&path, huge_axes_header()).unwrap();
        let err = decode(&path).unwrap_err();
        assert!(
            matches!(err, FitsError::TooLarge { .. } | FitsError::Open(_)),
            "unexpected error: {err}"
        );
    }

    #[test]
    fn garbage_is_not_a_fits_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("garbage.fits");
        std::fs::write(&path, b"<html>not a stamp</html>").unwrap();
        assert!(matches!(decode(&path), Err(FitsError::Open(_))));
    }

    /// A primary header claiming a 2^32 x 2^32 image with no data behind it.
    fn huge_axes_header() -> Vec<u8> {
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
}
