//! 2D convolution of stamps with small smoothing kernels.
//!
//! Used to mimic the coarser plate scale of wide-field instruments on top of
//! survey images. Pixels outside the image count as zero, NaN pixels are
//! ignored and the remaining weights renormalized.

use ndarray::Array2;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum KernelError {
    #[error("Kernel dimensions must be odd, got {rows}x{cols}")]
    EvenShape { rows: usize, cols: usize },
    #[error("Kernel must not be empty")]
    Empty,
    #[error("Kernel parameter must be positive and finite, got {0}")]
    InvalidParameter(f64),
}

/// Convolution kernel with odd dimensions, normalized to unit sum when possible.
#[derive(Debug, Clone, PartialEq)]
pub struct Kernel {
    weights: Array2<f64>,
}

impl Kernel {
    /// Wrap explicit weights.
    pub fn from_array(weights: Array2<f64>) -> Result<Self, KernelError> {
        let (rows, cols) = weights.dim();
        if rows == 0 || cols == 0 {
            return Err(KernelError::Empty);
        }
        if rows % 2 == 0 || cols % 2 == 0 {
            return Err(KernelError::EvenShape { rows, cols });
        }
        let sum = weights.sum();
        let weights = if sum != 0.0 && sum.is_finite() {
            weights / sum
        } else {
            weights
        };
        Ok(Self { weights })
    }

    /// Circular Gaussian truncated at four standard deviations.
    pub fn gaussian(stddev: f64) -> Result<Self, KernelError> {
        if !(stddev > 0.0 && stddev.is_finite()) {
            return Err(KernelError::InvalidParameter(stddev));
        }
        let radius = (4.0 * stddev).round().max(1.0) as usize;
        let size = 2 * radius + 1;
        let two_var = 2.0 * stddev * stddev;
        let weights = Array2::from_shape_fn((size, size), |(r, c)| {
            let dy = r as f64 - radius as f64;
            let dx = c as f64 - radius as f64;
            (-(dx * dx + dy * dy) / two_var).exp()
        });
        Self::from_array(weights)
    }

    /// Uniform square kernel of the given (odd) width.
    pub fn boxcar(width: usize) -> Result<Self, KernelError> {
        Self::from_array(Array2::ones((width, width)))
    }

    pub fn weights(&self) -> &Array2<f64> {
        &self.weights
    }
}

/// Convolve `image` with `kernel`, returning an array of the same shape.
pub fn convolve(image: &Array2<f64>, kernel: &Kernel) -> Array2<f64> {
    let (rows, cols) = image.dim();
    let (k_rows, k_cols) = kernel.weights.dim();
    let r_half = (k_rows / 2) as isize;
    let c_half = (k_cols / 2) as isize;
    let kernel_sum: f64 = kernel.weights.sum();

    Array2::from_shape_fn((rows, cols), |(r, c)| {
        let mut acc = 0.0;
        let mut skipped_weight = 0.0;
        for kr in 0..k_rows {
            let src_r = r as isize + r_half - kr as isize;
            for kc in 0..k_cols {
                let src_c = c as isize + c_half - kc as isize;
                let weight = kernel.weights[(kr, kc)];
                if src_r < 0 || src_c < 0 || src_r >= rows as isize || src_c >= cols as isize {
                    continue;
                }
                let value = image[(src_r as usize, src_c as usize)];
                if value.is_nan() {
                    skipped_weight += weight;
                    continue;
                }
                acc += weight * value;
            }
        }
        let used = kernel_sum - skipped_weight;
        if skipped_weight == 0.0 {
            acc
        } else if used.abs() > f64::EPSILON {
            acc * kernel_sum / used
        } else {
            f64::NAN
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn even_kernels_are_rejected() {
        let err = Kernel::from_array(Array2::ones((2, 3))).unwrap_err();
        assert_eq!(err, KernelError::EvenShape { rows: 2, cols: 3 });
    }

    #[test]
    fn gaussian_kernel_is_normalized_and_symmetric() {
        let kernel = Kernel::gaussian(1.0).unwrap();
        let weights = kernel.weights();
        assert_eq!(weights.dim(), (9, 9));
        assert!((weights.sum() - 1.0).abs() < 1e-12);
        assert_eq!(weights[(0, 4)], weights[(8, 4)]);
        assert!(weights[(4, 4)] > weights[(4, 5)]);
    }

    #[test]
    fn identity_kernel_returns_the_image() {
        let image = array![[1.0, 2.0], [3.0, 4.0]];
        let kernel = Kernel::from_array(array![[1.0]]).unwrap();
        assert_eq!(convolve(&image, &kernel), image);
    }

    #[test]
    fn boxcar_smooths_with_zero_fill_edges() {
        let mut image = Array2::zeros((3, 3));
        image[(1, 1)] = 9.0;
        let out = convolve(&image, &Kernel::boxcar(3).unwrap());
        for value in out.iter() {
            assert!((value - 1.0).abs() < 1e-12);
        }
        let flat = Array2::from_elem((3, 3), 9.0);
        let out = convolve(&flat, &Kernel::boxcar(3).unwrap());
        assert!((out[(1, 1)] - 9.0).abs() < 1e-12);
        assert!((out[(0, 0)] - 4.0).abs() < 1e-12);
    }

    #[test]
    fn nan_pixels_are_interpolated_over() {
        let image = array![[1.0, 1.0, 1.0], [1.0, f64::NAN, 1.0], [1.0, 1.0, 1.0]];
        let out = convolve(&image, &Kernel::boxcar(3).unwrap());
        assert!((out[(1, 1)] - 1.0).abs() < 1e-12);
    }
}
