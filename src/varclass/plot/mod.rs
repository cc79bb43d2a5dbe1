//! Raster chart of a trained classifier: confusion matrix next to feature importances.

mod font;

use std::path::{Path, PathBuf};

use image::{Rgb, RgbImage};

use super::train::TrainedClassifier;
use crate::ml::metrics::ConfusionMatrix;

const SCALE: u32 = 2;
const MARGIN_TOP: u32 = 70;
const PLOT_SIZE: u32 = 320;
const MATRIX_LEFT: u32 = 110;
const PANEL_GAP: u32 = 120;
const BAR_SLOT: u32 = 28;
const MIN_Y_LIMIT: f64 = 0.9;

const WHITE: Rgb<u8> = Rgb([255, 255, 255]);
const BLACK: Rgb<u8> = Rgb([0, 0, 0]);
const GREY: Rgb<u8> = Rgb([128, 128, 128]);
const LIGHT_GREY: Rgb<u8> = Rgb([220, 220, 220]);

/// Sequential white-to-blue ramp, light to dark.
const BLUES: [[u8; 3]; 9] = [
    [247, 251, 255],
    [222, 235, 247],
    [198, 219, 239],
    [158, 202, 225],
    [107, 174, 214],
    [66, 146, 198],
    [33, 113, 181],
    [8, 81, 156],
    [8, 48, 107],
];

#[derive(Debug, thiserror::Error)]
pub enum PlotError {
    #[error("Got {found} class labels for a {expected}x{expected} confusion matrix")]
    LabelCount { expected: usize, found: usize },
    #[error("Failed to create directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to write image {path}: {source}")]
    Write {
        path: PathBuf,
        source: image::ImageError,
    },
}

/// Render the training results and save them to `output_path`.
///
/// The image format follows the file extension.
pub fn plot_training_results(
    classifier: &TrainedClassifier,
    class_labels: &[String],
    output_path: &Path,
) -> Result<PathBuf, PlotError> {
    let image = render_training_results(classifier, class_labels)?;
    if let Some(parent) = output_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|source| PlotError::CreateDir {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    image.save(output_path).map_err(|source| PlotError::Write {
        path: output_path.to_path_buf(),
        source,
    })?;
    tracing::info!(path = %output_path.display(), "Wrote training results plot");
    Ok(output_path.to_path_buf())
}

/// Render the training results without touching the disk.
pub fn render_training_results(
    classifier: &TrainedClassifier,
    class_labels: &[String],
) -> Result<RgbImage, PlotError> {
    let matrix = &classifier.metrics.confusion_matrix;
    if class_labels.len() != matrix.n_classes() {
        return Err(PlotError::LabelCount {
            expected: matrix.n_classes(),
            found: class_labels.len(),
        });
    }
    let importances = classifier.feature_importances();
    let mut bars: Vec<Bar<'_>> = classifier
        .feature_names()
        .iter()
        .zip(importances.mean.iter().zip(&importances.std))
        .map(|(name, (&mean, &std))| Bar { name, mean, std })
        .collect();
    bars.sort_by(|a, b| b.mean.total_cmp(&a.mean));

    let longest_name = bars
        .iter()
        .map(|bar| font::text_width(bar.name, SCALE))
        .max()
        .unwrap_or(0);
    let bars_left = MATRIX_LEFT + PLOT_SIZE + PANEL_GAP;
    let bars_width = (bars.len() as u32 * BAR_SLOT).max(PLOT_SIZE);
    let width = bars_left + bars_width + 40;
    let height = MARGIN_TOP + PLOT_SIZE + (longest_name + 30).max(80) + 20;

    let mut canvas = Canvas::new(width, height);
    canvas.confusion_matrix(matrix, class_labels);
    canvas.importance_bars(&bars, bars_left, bars_width);
    Ok(canvas.image)
}

struct Bar<'a> {
    name: &'a str,
    mean: f64,
    std: f64,
}

struct Canvas {
    image: RgbImage,
}

impl Canvas {
    fn new(width: u32, height: u32) -> Self {
        Self {
            image: RgbImage::from_pixel(width, height, WHITE),
        }
    }

    fn confusion_matrix(&mut self, matrix: &ConfusionMatrix, class_labels: &[String]) {
        let k = matrix.n_classes().max(1) as u32;
        let cell = PLOT_SIZE / k;
        let side = cell * k;
        let top = MARGIN_TOP;
        let left = MATRIX_LEFT;
        let max = matrix.max_count();
        let threshold = max as f64 / 2.0;

        self.text_centered(
            left + side / 2,
            top - 30,
            "evaluation set confusion matrix",
            BLACK,
        );
        for row in 0..matrix.n_classes() {
            for col in 0..matrix.n_classes() {
                let value = matrix.get(row, col);
                let fraction = if max == 0 { 0.0 } else { value as f64 / max as f64 };
                let x = left + col as u32 * cell;
                let y = top + row as u32 * cell;
                self.fill_rect(x, y, cell, cell, blues(fraction));
                let color = if value as f64 > threshold { WHITE } else { BLACK };
                let text = value.to_string();
                self.text_centered(
                    x + cell / 2,
                    y + cell / 2 - font::GLYPH_HEIGHT * SCALE / 2,
                    &text,
                    color,
                );
            }
        }
        self.outline(left, top, side, side, BLACK);

        for (idx, label) in class_labels.iter().enumerate() {
            let center = idx as u32 * cell + cell / 2;
            // column ticks below, row ticks to the left
            self.text_centered(left + center, top + side + 8, label, BLACK);
            let label_width = font::text_width(label, SCALE);
            self.text(
                left.saturating_sub(label_width + 8),
                top + center - font::GLYPH_HEIGHT * SCALE / 2,
                label,
                BLACK,
            );
        }
        self.text_centered(left + side / 2, top + side + 34, "predicted class", BLACK);
        let axis_label = "actual class";
        let axis_width = font::text_width(axis_label, SCALE);
        self.text_vertical(
            8,
            top + side / 2 + axis_width / 2,
            axis_label,
            BLACK,
        );
    }

    fn importance_bars(&mut self, bars: &[Bar<'_>], left: u32, width: u32) {
        let top = MARGIN_TOP;
        let bottom = top + PLOT_SIZE;
        let y_limit = bars
            .iter()
            .map(|bar| bar.mean + bar.std)
            .fold(MIN_Y_LIMIT, f64::max);
        let to_y = |value: f64| -> u32 {
            let fraction = (value / y_limit).clamp(0.0, 1.0);
            bottom - (fraction * PLOT_SIZE as f64).round() as u32
        };

        self.text_centered(
            left + width / 2,
            top - 30,
            "relative importance of features",
            BLACK,
        );
        let mut tick = 0.0;
        while tick <= y_limit + 1e-9 {
            let y = to_y(tick);
            self.fill_rect(left, y, width, 1, LIGHT_GREY);
            let label = format!("{tick:.1}");
            let label_width = font::text_width(&label, SCALE);
            self.text(
                left.saturating_sub(label_width + 6),
                y.saturating_sub(font::GLYPH_HEIGHT * SCALE / 2),
                &label,
                BLACK,
            );
            tick += 0.2;
        }
        let axis_label = "relative importance";
        let axis_width = font::text_width(axis_label, SCALE);
        self.text_vertical(
            left.saturating_sub(80),
            top + PLOT_SIZE / 2 + axis_width / 2,
            axis_label,
            BLACK,
        );

        let slot = if bars.is_empty() {
            BAR_SLOT
        } else {
            width / bars.len() as u32
        };
        let bar_width = (slot * 8 / 10).max(1);
        for (idx, bar) in bars.iter().enumerate() {
            let center = left + idx as u32 * slot + slot / 2;
            let bar_top = to_y(bar.mean);
            self.fill_rect(center - bar_width / 2, bar_top, bar_width, bottom - bar_top, GREY);

            let err_top = to_y(bar.mean + bar.std);
            let err_bottom = to_y((bar.mean - bar.std).max(0.0));
            self.fill_rect(center, err_top, 1, err_bottom - err_top + 1, BLACK);
            self.fill_rect(center.saturating_sub(3), err_top, 7, 1, BLACK);
            self.fill_rect(center.saturating_sub(3), err_bottom, 7, 1, BLACK);

            let name_width = font::text_width(bar.name, SCALE);
            self.text_vertical(
                center.saturating_sub(font::GLYPH_HEIGHT * SCALE / 2),
                bottom + 8 + name_width,
                bar.name,
                BLACK,
            );
        }
        self.outline(left, top, width, PLOT_SIZE, BLACK);
    }

    fn fill_rect(&mut self, x: u32, y: u32, w: u32, h: u32, color: Rgb<u8>) {
        let x_end = x.saturating_add(w).min(self.image.width());
        let y_end = y.saturating_add(h).min(self.image.height());
        for py in y..y_end {
            for px in x..x_end {
                self.image.put_pixel(px, py, color);
            }
        }
    }

    fn outline(&mut self, x: u32, y: u32, w: u32, h: u32, color: Rgb<u8>) {
        self.fill_rect(x, y, w, 1, color);
        self.fill_rect(x, y + h, w + 1, 1, color);
        self.fill_rect(x, y, 1, h, color);
        self.fill_rect(x + w, y, 1, h, color);
    }

    fn text(&mut self, x: u32, y: u32, text: &str, color: Rgb<u8>) {
        for (idx, ch) in text.chars().enumerate() {
            let origin = x + idx as u32 * font::ADVANCE * SCALE;
            for (row, bits) in font::glyph(ch).iter().enumerate() {
                for col in 0..font::GLYPH_WIDTH {
                    if bits & (1 << (font::GLYPH_WIDTH - 1 - col)) != 0 {
                        self.fill_rect(
                            origin + col * SCALE,
                            y + row as u32 * SCALE,
                            SCALE,
                            SCALE,
                            color,
                        );
                    }
                }
            }
        }
    }

    fn text_centered(&mut self, center_x: u32, y: u32, text: &str, color: Rgb<u8>) {
        let width = font::text_width(text, SCALE);
        self.text(center_x.saturating_sub(width / 2), y, text, color);
    }

    /// Text rotated 90 degrees counter-clockwise, reading bottom to top from `(x, bottom)`.
    fn text_vertical(&mut self, x: u32, bottom: u32, text: &str, color: Rgb<u8>) {
        for (idx, ch) in text.chars().enumerate() {
            let origin = bottom.saturating_sub((idx as u32 + 1) * font::ADVANCE * SCALE);
            for (row, bits) in font::glyph(ch).iter().enumerate() {
                for col in 0..font::GLYPH_WIDTH {
                    if bits & (1 << (font::GLYPH_WIDTH - 1 - col)) != 0 {
                        let px = x + row as u32 * SCALE;
                        let py = origin + (font::GLYPH_WIDTH - 1 - col) * SCALE;
                        self.fill_rect(px, py, SCALE, SCALE, color);
                    }
                }
            }
        }
    }
}

/// Interpolate the blue ramp at `fraction` in `[0, 1]`.
fn blues(fraction: f64) -> Rgb<u8> {
    let fraction = if fraction.is_finite() { fraction.clamp(0.0, 1.0) } else { 0.0 };
    let scaled = fraction * (BLUES.len() - 1) as f64;
    let low = scaled.floor() as usize;
    let high = (low + 1).min(BLUES.len() - 1);
    let t = scaled - low as f64;
    let mix = |a: u8, b: u8| (a as f64 + (b as f64 - a as f64) * t).round() as u8;
    Rgb([
        mix(BLUES[low][0], BLUES[high][0]),
        mix(BLUES[low][1], BLUES[high][1]),
        mix(BLUES[low][2], BLUES[high][2]),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blues_ramp_runs_light_to_dark() {
        assert_eq!(blues(0.0), Rgb([247, 251, 255]));
        assert_eq!(blues(1.0), Rgb([8, 48, 107]));
        assert_eq!(blues(f64::NAN), Rgb([247, 251, 255]));
        let mid = blues(0.5);
        assert_eq!(mid, Rgb([107, 174, 214]));
    }

    #[test]
    fn fill_rect_clips_to_canvas() {
        let mut canvas = Canvas::new(10, 10);
        canvas.fill_rect(8, 8, 5, 5, BLACK);
        assert_eq!(*canvas.image.get_pixel(9, 9), BLACK);
        assert_eq!(*canvas.image.get_pixel(7, 7), WHITE);
    }

    #[test]
    fn text_draws_glyph_pixels() {
        let mut canvas = Canvas::new(40, 40);
        canvas.text(0, 0, "1", BLACK);
        // top row of '1' has its single pixel in the middle column
        assert_eq!(*canvas.image.get_pixel(2 * SCALE, 0), BLACK);
        assert_eq!(*canvas.image.get_pixel(0, 0), WHITE);
    }
}
