use ndarray::ArrayView2;

/// Median of a slice, averaging the two middle values for even lengths.
pub fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    Some(if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    })
}

/// Mean and population variance of a frame, accumulated in f64.
pub fn mean_variance(image: ArrayView2<f32>) -> (f64, f64) {
    let n = image.len() as f64;
    if n == 0.0 {
        return (0.0, 0.0);
    }
    let mean = image.iter().map(|&v| v as f64).sum::<f64>() / n;
    let variance = image.iter().map(|&v| (v as f64 - mean).powi(2)).sum::<f64>() / n;
    (mean, variance)
}

/// Frames with (near) zero variance carry no registration signal.
pub fn is_degenerate(image: ArrayView2<f32>) -> bool {
    let (mean, variance) = mean_variance(image);
    !variance.is_finite() || variance <= 1e-12 * mean.abs().max(1.0)
}
