use crate::algorithms::PairwiseEstimator;
use crate::error::AlignError;
use crate::utils::{hann, is_degenerate};
use crate::Result;
use ndarray::{Array2, ArrayView2};
use num_complex::Complex;
use rustfft::FftPlanner;
use serde::{Deserialize, Serialize};

/// Configuration for phase correlation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PhaseCorrelationConfig {
    /// Apply a Hann window to both frames before the FFT.
    pub use_windowing: bool,
    /// Refine the integer peak with a parabolic fit.
    pub subpixel: bool,
}

impl Default for PhaseCorrelationConfig {
    fn default() -> Self {
        Self {
            use_windowing: false,
            subpixel: true,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PhaseCorrelation {
    config: PhaseCorrelationConfig,
}

impl PhaseCorrelation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: PhaseCorrelationConfig) -> Self {
        Self { config }
    }

    /// Translation of `target` relative to `reference` plus the correlation
    /// peak height (1.0 for an exact circular shift).
    pub fn correlate(&self, reference: ArrayView2<f32>, target: ArrayView2<f32>) -> Result<((f64, f64), f64)> {
        if reference.dim() != target.dim() {
            return Err(AlignError::mismatch("frame shape", reference.dim(), target.dim()));
        }
        if is_degenerate(reference) || is_degenerate(target) {
            return Err(AlignError::estimation("phase correlation on a zero-variance frame"));
        }
        let (height, width) = reference.dim();

        let mut planner = FftPlanner::new();
        let reference_fft = compute_2d_fft(&mut planner, &self.to_complex(reference))?;
        let target_fft = compute_2d_fft(&mut planner, &self.to_complex(target))?;

        let cross_power = compute_cross_power_spectrum(&target_fft, &reference_fft);
        let correlation = compute_2d_ifft(&mut planner, &cross_power)?;

        let (peak_x, peak_y, peak_val) = find_correlation_peak(&correlation);
        if !peak_val.is_finite() || peak_val <= 0.0 {
            return Err(AlignError::estimation("phase correlation produced no usable peak"));
        }

        // Convert to translation (handle wraparound)
        let tx = if peak_x > width / 2 {
            peak_x as f64 - width as f64
        } else {
            peak_x as f64
        };
        let ty = if peak_y > height / 2 {
            peak_y as f64 - height as f64
        } else {
            peak_y as f64
        };

        let (tx, ty) = if self.config.subpixel {
            subpixel_parabolic(&correlation, peak_x, peak_y, tx, ty)
        } else {
            (tx, ty)
        };
        Ok(((tx, ty), peak_val))
    }

    fn to_complex(&self, image: ArrayView2<f32>) -> Array2<Complex<f64>> {
        let (height, width) = image.dim();
        if self.config.use_windowing {
            let wy = hann(height);
            let wx = hann(width);
            Array2::from_shape_fn((height, width), |(y, x)| {
                Complex::new(image[[y, x]] as f64 * wy[y] * wx[x], 0.0)
            })
        } else {
            image.mapv(|v| Complex::new(v as f64, 0.0))
        }
    }
}

impl PairwiseEstimator for PhaseCorrelation {
    fn name(&self) -> &str {
        "PhaseCorrelation"
    }

    fn estimate_pair(&self, reference: ArrayView2<f32>, target: ArrayView2<f32>) -> Result<(f64, f64)> {
        let (shift, peak) = self.correlate(reference, target)?;
        tracing::trace!(dx = shift.0, dy = shift.1, peak = peak, "phase correlation peak");
        Ok(shift)
    }
}

pub(crate) fn compute_2d_fft(
    planner: &mut FftPlanner<f64>,
    input: &Array2<Complex<f64>>,
) -> Result<Array2<Complex<f64>>> {
    transform_2d(planner, input, false)
}

pub(crate) fn compute_2d_ifft(
    planner: &mut FftPlanner<f64>,
    input: &Array2<Complex<f64>>,
) -> Result<Array2<Complex<f64>>> {
    let mut result = transform_2d(planner, input, true)?;
    let scale = result.len() as f64;
    result.mapv_inplace(|v| v / scale);
    Ok(result)
}

fn transform_2d(
    planner: &mut FftPlanner<f64>,
    input: &Array2<Complex<f64>>,
    inverse: bool,
) -> Result<Array2<Complex<f64>>> {
    let (height, width) = input.dim();
    let mut result = input.clone();

    let fft_row = if inverse {
        planner.plan_fft_inverse(width)
    } else {
        planner.plan_fft_forward(width)
    };
    let mut row_data = vec![Complex::new(0.0, 0.0); width];
    for mut row in result.rows_mut() {
        for (dst, src) in row_data.iter_mut().zip(row.iter()) {
            *dst = *src;
        }
        fft_row.process(&mut row_data);
        row.iter_mut().zip(row_data.iter()).for_each(|(dst, src)| *dst = *src);
    }

    let fft_col = if inverse {
        planner.plan_fft_inverse(height)
    } else {
        planner.plan_fft_forward(height)
    };
    let mut col_data = vec![Complex::new(0.0, 0.0); height];
    for mut col in result.columns_mut() {
        for (dst, src) in col_data.iter_mut().zip(col.iter()) {
            *dst = *src;
        }
        fft_col.process(&mut col_data);
        col.iter_mut().zip(col_data.iter()).for_each(|(dst, src)| *dst = *src);
    }

    if result.iter().any(|v| !v.re.is_finite() || !v.im.is_finite()) {
        return Err(AlignError::estimation("non-finite values in FFT"));
    }
    Ok(result)
}

/// `F1 * conj(F2) / |F1 * conj(F2)|`, zero where the product vanishes.
fn compute_cross_power_spectrum(fft1: &Array2<Complex<f64>>, fft2: &Array2<Complex<f64>>) -> Array2<Complex<f64>> {
    let mut result = fft1.clone();
    result.zip_mut_with(fft2, |a, b| {
        let product = *a * b.conj();
        let magnitude = product.norm();
        *a = if magnitude > 1e-10 {
            product / magnitude
        } else {
            Complex::new(0.0, 0.0)
        };
    });
    result
}

fn find_correlation_peak(correlation: &Array2<Complex<f64>>) -> (usize, usize, f64) {
    let mut max_val = f64::NEG_INFINITY;
    let mut peak_x = 0;
    let mut peak_y = 0;

    for ((y, x), value) in correlation.indexed_iter() {
        if value.re > max_val {
            max_val = value.re;
            peak_x = x;
            peak_y = y;
        }
    }

    (peak_x, peak_y, max_val)
}

/// Parabolic sub-pixel refinement: `offset = (l - r) / (2 (l + r - 2c))`.
fn subpixel_parabolic(correlation: &Array2<Complex<f64>>, peak_x: usize, peak_y: usize, dx: f64, dy: f64) -> (f64, f64) {
    let (height, width) = correlation.dim();
    let get_val = |x: isize, y: isize| -> f64 {
        let xx = x.rem_euclid(width as isize) as usize;
        let yy = y.rem_euclid(height as isize) as usize;
        correlation[[yy, xx]].re
    };

    let px = peak_x as isize;
    let py = peak_y as isize;
    let c = get_val(px, py);
    let l = get_val(px - 1, py);
    let r = get_val(px + 1, py);
    let t = get_val(px, py - 1);
    let b = get_val(px, py + 1);

    let denom_x = 2.0 * (l + r - 2.0 * c);
    let denom_y = 2.0 * (t + b - 2.0 * c);

    let sub_x = if width > 2 && denom_x.abs() > 1e-10 {
        dx + ((l - r) / denom_x).clamp(-0.5, 0.5)
    } else {
        dx
    };
    let sub_y = if height > 2 && denom_y.abs() > 1e-10 {
        dy + ((t - b) / denom_y).clamp(-0.5, 0.5)
    } else {
        dy
    };
    (sub_x, sub_y)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::transformer::ImageTransformer;

    fn blob_image(size: usize) -> Array2<f32> {
        Array2::from_shape_fn((size, size), |(y, x)| {
            let (fx, fy) = (x as f32, y as f32);
            let g = |cx: f32, cy: f32, s: f32| (-((fx - cx).powi(2) + (fy - cy).powi(2)) / (2.0 * s * s)).exp();
            g(24.0, 28.0, 3.0) + 0.6 * g(38.0, 22.0, 2.0) + 0.8 * g(30.0, 40.0, 4.0)
        })
    }

    #[test]
    fn test_identical_frames_have_zero_shift() {
        let image = blob_image(64);
        let ((dx, dy), peak) = PhaseCorrelation::new().correlate(image.view(), image.view()).unwrap();
        assert!(dx.abs() < 1e-6 && dy.abs() < 1e-6);
        assert!(peak > 0.99);
    }

    #[test]
    fn test_integer_translation_recovered() {
        let image = blob_image(64);
        let moved = ImageTransformer::translate_nearest(image.view(), 5.0, -3.0);
        let (dx, dy) = PhaseCorrelation::new().estimate_pair(image.view(), moved.view()).unwrap();
        assert!((dx - 5.0).abs() < 0.25, "dx = {}", dx);
        assert!((dy + 3.0).abs() < 0.25, "dy = {}", dy);
    }

    #[test]
    fn test_windowed_translation_recovered() {
        let image = blob_image(64);
        let moved = ImageTransformer::translate_nearest(image.view(), -4.0, 2.0);
        let pc = PhaseCorrelation::with_config(PhaseCorrelationConfig {
            use_windowing: true,
            subpixel: false,
        });
        let (dx, dy) = pc.estimate_pair(image.view(), moved.view()).unwrap();
        assert_eq!((dx, dy), (-4.0, 2.0));
    }

    #[test]
    fn test_zero_variance_frame_fails() {
        let image = blob_image(32);
        let flat = Array2::<f32>::zeros((32, 32));
        assert!(matches!(
            PhaseCorrelation::new().estimate_pair(image.view(), flat.view()),
            Err(AlignError::EstimationFailure(_))
        ));
    }

    #[test]
    fn test_shape_mismatch() {
        let a = blob_image(32);
        let b = Array2::<f32>::ones((32, 16));
        assert!(matches!(
            PhaseCorrelation::new().estimate_pair(a.view(), b.view()),
            Err(AlignError::DimensionMismatch { .. })
        ));
    }
}
