use ndarray::{Array2, ArrayView2};
use std::f64::consts::PI;

/// Reflect-101 border index (`gfedcb|abcdefgh|gfedcba`).
#[inline]
fn reflect_101(index: isize, len: usize) -> usize {
    if len == 1 {
        return 0;
    }
    let period = 2 * (len as isize - 1);
    let mut i = index.rem_euclid(period);
    if i >= len as isize {
        i = period - i;
    }
    i as usize
}

fn convolve_rows(image: ArrayView2<f32>, kernel: &[f32]) -> Array2<f32> {
    let (height, width) = image.dim();
    let half = (kernel.len() / 2) as isize;
    Array2::from_shape_fn((height, width), |(y, x)| {
        kernel
            .iter()
            .enumerate()
            .map(|(k, w)| w * image[[y, reflect_101(x as isize + k as isize - half, width)]])
            .sum()
    })
}

fn convolve_cols(image: ArrayView2<f32>, kernel: &[f32]) -> Array2<f32> {
    let (height, width) = image.dim();
    let half = (kernel.len() / 2) as isize;
    Array2::from_shape_fn((height, width), |(y, x)| {
        kernel
            .iter()
            .enumerate()
            .map(|(k, w)| w * image[[reflect_101(y as isize + k as isize - half, height), x]])
            .sum()
    })
}

/// Central-difference gradients `(d/dx, d/dy)`.
pub fn central_gradients(image: ArrayView2<f32>) -> (Array2<f32>, Array2<f32>) {
    let kernel = [-0.5f32, 0.0, 0.5];
    (convolve_rows(image, &kernel), convolve_cols(image, &kernel))
}

/// Symmetric Hamming window of length `len`.
pub fn hamming(len: usize) -> Vec<f64> {
    if len == 1 {
        return vec![1.0];
    }
    (0..len)
        .map(|n| 0.54 - 0.46 * (2.0 * PI * n as f64 / (len - 1) as f64).cos())
        .collect()
}

/// Symmetric Hann window of length `len`.
pub fn hann(len: usize) -> Vec<f64> {
    if len == 1 {
        return vec![1.0];
    }
    (0..len)
        .map(|n| 0.5 - 0.5 * (2.0 * PI * n as f64 / (len - 1) as f64).cos())
        .collect()
}

/// 2x box downsampling; odd trailing rows/columns are dropped.
pub fn downsample_2x(image: ArrayView2<f32>) -> Array2<f32> {
    let (height, width) = image.dim();
    let (h, w) = ((height / 2).max(1), (width / 2).max(1));
    Array2::from_shape_fn((h, w), |(y, x)| {
        let y0 = (2 * y).min(height - 1);
        let x0 = (2 * x).min(width - 1);
        let y1 = (y0 + 1).min(height - 1);
        let x1 = (x0 + 1).min(width - 1);
        0.25 * (image[[y0, x0]] + image[[y0, x1]] + image[[y1, x0]] + image[[y1, x1]])
    })
}
