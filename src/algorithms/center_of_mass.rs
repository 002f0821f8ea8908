use crate::alignment::record::ShiftTable;
use crate::data::stack::ImageStack;
use crate::error::AlignError;
use crate::utils::median;
use crate::Result;
use nalgebra::DMatrix;
use ndarray::ArrayView1;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Center-of-mass tracking on a band of columns.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CenterOfMassConfig {
    /// First column of the band; the middle column when unset.
    pub slice: Option<usize>,
    pub band_width: usize,
    /// Fraction of the band's columns used in the fit.
    pub ratio: f64,
}

impl Default for CenterOfMassConfig {
    fn default() -> Self {
        Self {
            slice: None,
            band_width: 1,
            ratio: 0.1,
        }
    }
}

impl CenterOfMassConfig {
    pub fn validate(&self) -> Result<()> {
        if self.band_width == 0 {
            return Err(AlignError::invalid("center-of-mass band width must be at least 1"));
        }
        if !(self.ratio > 0.0 && self.ratio <= 1.0) {
            return Err(AlignError::invalid(format!(
                "center-of-mass ratio must be in (0, 1], got {}",
                self.ratio
            )));
        }
        Ok(())
    }
}

/// Intensity-weighted centroid of a profile, in coordinates centered on the
/// profile midpoint. `None` for a profile with zero total intensity.
pub fn centered_centroid(profile: ArrayView1<f32>) -> Option<(f64, f64)> {
    let len = profile.len();
    let total: f64 = profile.iter().map(|&v| v as f64).sum();
    if total == 0.0 || !total.is_finite() {
        return None;
    }
    let weighted: f64 = profile
        .iter()
        .enumerate()
        .map(|(i, &v)| (i + 1) as f64 * v as f64)
        .sum();
    Some((weighted / total - (len as f64 + 1.0) / 2.0, total))
}

/// Absolute vertical shifts `(0, dy)` that put the tracked centroids on the
/// nearest ideal sinusoidal trajectory `a cos θ + b sin θ`.
///
/// Columns whose per-tilt total intensity deviates least from the median are
/// used; each contributes one block of the residual system
/// `(C C⁺ - I) s = -(C C⁺ - I) t`, solved by pseudo-inverse.
pub fn estimate_com_shifts(stack: &ImageStack, config: &CenterOfMassConfig) -> Result<ShiftTable> {
    config.validate()?;
    let angles = stack.require_angles("center-of-mass shift estimation")?;
    let n = stack.frame_count();
    let (_, cols) = stack.frame_shape();
    let start = config.slice.unwrap_or(cols / 2);
    if start + config.band_width > cols {
        return Err(AlignError::invalid(format!(
            "column band {}..{} exceeds frame width {}",
            start,
            start + config.band_width,
            cols
        )));
    }

    let band = config.band_width;
    // centroids[c][k], totals[c][k] for band column c and tilt k
    let mut centroids = vec![vec![0.0; n]; band];
    let mut totals = vec![vec![0.0; n]; band];
    for c in 0..band {
        for k in 0..n {
            let (centroid, total) = centered_centroid(stack.column(k, start + c)).ok_or_else(|| {
                AlignError::estimation(format!(
                    "column {} of frame {} has zero total intensity",
                    start + c,
                    k
                ))
            })?;
            centroids[c][k] = centroid;
            totals[c][k] = total;
        }
    }

    let all_totals: Vec<f64> = totals.iter().flatten().copied().collect();
    let reference = median(&all_totals).unwrap_or(0.0);
    if reference == 0.0 {
        return Err(AlignError::estimation("median column intensity is zero"));
    }
    let deviation: Vec<f64> = totals
        .iter()
        .map(|per_tilt| per_tilt.iter().map(|s| ((s - reference) / reference).abs()).sum::<f64>() / n as f64)
        .collect();

    let num = ((config.ratio * band as f64).round() as usize).clamp(1, band);
    let mut order: Vec<usize> = (0..band).collect();
    order.sort_by(|&a, &b| deviation[a].total_cmp(&deviation[b]));
    let usable = &order[..num];
    debug!(columns = ?usable.iter().map(|c| start + c).collect::<Vec<_>>(), "center-of-mass columns selected");

    let c_mat = DMatrix::from_fn(n, 2, |k, j| {
        let theta = angles[k].to_radians();
        if j == 0 {
            theta.cos()
        } else {
            theta.sin()
        }
    });
    let c_pinv = c_mat
        .clone()
        .pseudo_inverse(1e-12)
        .map_err(|e| AlignError::estimation(format!("trajectory basis pseudo-inverse failed: {}", e)))?;
    let gamma = &c_mat * c_pinv - DMatrix::<f64>::identity(n, n);

    let mut a = DMatrix::<f64>::zeros(n * num, n);
    let mut b = DMatrix::<f64>::zeros(n * num, 1);
    for (j, &column) in usable.iter().enumerate() {
        let t = DMatrix::from_column_slice(n, 1, &centroids[column]);
        let rhs = -(&gamma * t);
        a.view_mut((j * n, 0), (n, n)).copy_from(&gamma);
        b.view_mut((j * n, 0), (n, 1)).copy_from(&rhs);
    }
    let a_pinv = a
        .pseudo_inverse(1e-12)
        .map_err(|e| AlignError::estimation(format!("center-of-mass system pseudo-inverse failed: {}", e)))?;
    let shifts = a_pinv * b;

    if shifts.iter().any(|s| !s.is_finite()) {
        return Err(AlignError::estimation("center-of-mass solve produced non-finite shifts"));
    }
    let table = ShiftTable::new(shifts.iter().map(|&dy| (0.0, dy)).collect());
    info!(
        target: "tomo_align::estimator",
        frames = n,
        columns = num,
        max_shift = table.max_magnitude(),
        "Center-of-mass shifts computed"
    );
    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array1, Array3};

    /// Stack whose column profiles are Gaussians centered at `centers[k]`
    /// (row coordinate) in every column.
    fn stack_with_centers(centers: &[f64], angles: Vec<f64>) -> ImageStack {
        let rows = 64;
        let data = Array3::from_shape_fn((centers.len(), rows, 16), |(k, y, _)| {
            let d = y as f64 - centers[k];
            (-d * d / 18.0).exp() as f32
        });
        ImageStack::new(data, Some(angles)).unwrap()
    }

    #[test]
    fn test_centroid_of_symmetric_profile() {
        let profile = Array1::from(vec![0.0f32, 1.0, 2.0, 1.0, 0.0]);
        let (c, total) = centered_centroid(profile.view()).unwrap();
        assert!(c.abs() < 1e-12);
        assert_eq!(total, 4.0);
        assert!(centered_centroid(Array1::<f32>::zeros(4).view()).is_none());
    }

    #[test]
    fn test_jitter_is_removed() {
        let angles = vec![-40.0, -20.0, 0.0, 20.0, 40.0];
        // ideal trajectory 31.5 + 4 cos θ + 6 sin θ plus per-frame jitter
        let jitter = [2.0, -1.0, 0.0, 3.0, -2.0];
        let centers: Vec<f64> = angles
            .iter()
            .zip(jitter.iter())
            .map(|(a, j)| {
                let t = f64::to_radians(*a);
                31.5 + 4.0 * t.cos() + 6.0 * t.sin() + j
            })
            .collect();
        let stack = stack_with_centers(&centers, angles.clone());
        let shifts = estimate_com_shifts(&stack, &CenterOfMassConfig::default()).unwrap();
        assert_eq!(shifts.len(), 5);

        // corrected centroids lie on a sinusoid: their residual against the
        // trajectory basis vanishes
        let corrected: Vec<f64> = centers.iter().zip(shifts.iter()).map(|(c, s)| c + s.1).collect();
        let c_mat = DMatrix::from_fn(5, 2, |k, j| {
            let t = f64::to_radians(angles[k]);
            if j == 0 {
                t.cos()
            } else {
                t.sin()
            }
        });
        let projection = &c_mat * c_mat.clone().pseudo_inverse(1e-12).unwrap();
        let v = DMatrix::from_column_slice(5, 1, &corrected) - DMatrix::from_element(5, 1, 31.5);
        let residual = &v - &projection * &v;
        assert!(residual.norm() < 0.05, "residual {}", residual.norm());
        assert!(shifts.iter().all(|s| s.0 == 0.0));
    }

    #[test]
    fn test_requires_angles() {
        let stack = ImageStack::new(Array3::from_elem((3, 8, 8), 1.0f32), None).unwrap();
        assert!(matches!(
            estimate_com_shifts(&stack, &CenterOfMassConfig::default()),
            Err(AlignError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_zero_column_fails() {
        let stack = ImageStack::new(Array3::zeros((3, 8, 8)), Some(vec![-10.0, 0.0, 10.0])).unwrap();
        assert!(matches!(
            estimate_com_shifts(&stack, &CenterOfMassConfig::default()),
            Err(AlignError::EstimationFailure(_))
        ));
    }
}
