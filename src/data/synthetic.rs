//! Synthetic tilt series with known geometry for tests, benches and the
//! `demo` command.

use crate::data::stack::ImageStack;
use crate::data::transformer::{frame_center, AffineTransform, ImageTransformer};
use crate::error::AlignError;
use crate::Result;
use ndarray::{Array2, Array3};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};

/// Frame of Gaussian blobs scattered over the central half of the field.
pub fn blob_image(rows: usize, cols: usize, blobs: usize, seed: u64) -> Array2<f32> {
    let mut rng = StdRng::seed_from_u64(seed);
    let spots: Vec<(f64, f64, f64, f64)> = (0..blobs)
        .map(|_| {
            let cx = rng.gen_range(0.25..0.75) * cols as f64;
            let cy = rng.gen_range(0.25..0.75) * rows as f64;
            let sigma = rng.gen_range(1.5..4.0);
            let amplitude = rng.gen_range(0.5..1.0);
            (cx, cy, sigma, amplitude)
        })
        .collect();
    Array2::from_shape_fn((rows, cols), |(y, x)| {
        spots
            .iter()
            .map(|&(cx, cy, sigma, amplitude)| {
                let d2 = (x as f64 - cx).powi(2) + (y as f64 - cy).powi(2);
                amplitude * (-d2 / (2.0 * sigma * sigma)).exp()
            })
            .sum::<f64>() as f32
    })
}

/// One copy of `base` per shift, each translated by its `(dx, dy)` with
/// nearest-neighbour sampling.
pub fn translated_series(base: &Array2<f32>, shifts: &[(f64, f64)], angles: Option<Vec<f64>>) -> Result<ImageStack> {
    let frames = shifts
        .iter()
        .map(|&(dx, dy)| ImageTransformer::translate_nearest(base.view(), dx, dy))
        .collect();
    ImageStack::from_frames(frames, angles)
}

/// Add zero-mean Gaussian noise to every frame.
pub fn add_gaussian_noise(stack: &ImageStack, sigma: f64, seed: u64) -> Result<ImageStack> {
    let normal = Normal::new(0.0, sigma)
        .map_err(|e| AlignError::invalid(format!("invalid noise sigma {}: {}", sigma, e)))?;
    let mut rng = StdRng::seed_from_u64(seed);
    let mut data = stack.data().clone();
    data.mapv_inplace(|v| v + normal.sample(&mut rng) as f32);
    let mut noisy = ImageStack::new(data, stack.angles().map(|a| a.to_vec()))?;
    if let Some(record) = stack.alignment() {
        noisy.set_alignment(record.clone());
    }
    Ok(noisy)
}

/// A rod parallel to the tilt axis, at `(y, z)` in the specimen frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rod {
    pub y: f64,
    pub z: f64,
    pub amplitude: f64,
    pub width: f64,
}

/// Specimen of rods spanning the field, projected about a tilt axis that
/// runs along the image rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RodPhantom {
    pub rods: Vec<Rod>,
}

impl Default for RodPhantom {
    fn default() -> Self {
        Self {
            rods: vec![
                Rod { y: -6.0, z: 4.0, amplitude: 1.0, width: 1.5 },
                Rod { y: 5.0, z: -3.0, amplitude: 0.7, width: 2.0 },
                Rod { y: 1.0, z: 8.0, amplitude: 0.5, width: 1.2 },
            ],
        }
    }
}

impl RodPhantom {
    /// Random rods within `radius` of the axis.
    pub fn random(count: usize, radius: f64, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let rods = (0..count)
            .map(|_| Rod {
                y: rng.gen_range(-radius..radius),
                z: rng.gen_range(-radius..radius),
                amplitude: rng.gen_range(0.4..1.0),
                width: rng.gen_range(1.0..2.5),
            })
            .collect();
        Self { rods }
    }

    /// Projected row offset of each rod at tilt `angle_degrees`.
    pub fn projected_offsets(&self, angle_degrees: f64) -> Vec<f64> {
        let (sin_t, cos_t) = angle_degrees.to_radians().sin_cos();
        self.rods.iter().map(|rod| rod.y * cos_t - rod.z * sin_t).collect()
    }

    /// Tilt series of `(rows, cols)` frames. The axis is drawn rotated by
    /// `axis_rotation` degrees about the frame center and displaced
    /// `axis_offset` pixels along the rows.
    pub fn project(
        &self,
        shape: (usize, usize),
        angles: &[f64],
        axis_rotation: f64,
        axis_offset: f64,
    ) -> Result<ImageStack> {
        let (rows, cols) = shape;
        if angles.is_empty() {
            return Err(AlignError::invalid("phantom needs at least one tilt angle"));
        }
        let center = frame_center(shape);
        // image -> axis-aligned specimen coordinates
        let to_axis = AffineTransform::rotation_about(center, axis_rotation)
            .inverse()
            .ok_or_else(|| AlignError::invalid("rotation is not invertible"))?;

        let mut data = Array3::<f32>::zeros((angles.len(), rows, cols));
        for (k, &angle) in angles.iter().enumerate() {
            let offsets = self.projected_offsets(angle);
            for y in 0..rows {
                for x in 0..cols {
                    let (_, ay) = to_axis.apply(x as f64, y as f64);
                    let v = ay - center.1 - axis_offset;
                    let value: f64 = self
                        .rods
                        .iter()
                        .zip(&offsets)
                        .map(|(rod, off)| rod.amplitude * (-(v - off).powi(2) / (2.0 * rod.width * rod.width)).exp())
                        .sum();
                    data[[k, y, x]] = value as f32;
                }
            }
        }
        ImageStack::new(data, Some(angles.to_vec()))
    }
}

/// Evenly spaced tilt angles from `start` to `end` inclusive.
pub fn tilt_range(start: f64, end: f64, count: usize) -> Vec<f64> {
    if count < 2 {
        return vec![start; count];
    }
    let step = (end - start) / (count - 1) as f64;
    (0..count).map(|i| start + i as f64 * step).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blob_image_is_deterministic() {
        let a = blob_image(32, 32, 5, 11);
        let b = blob_image(32, 32, 5, 11);
        assert_eq!(a, b);
        assert!(a.iter().any(|v| *v > 0.1));
    }

    #[test]
    fn test_translated_series() {
        let base = blob_image(24, 24, 3, 1);
        let stack = translated_series(&base, &[(0.0, 0.0), (2.0, -1.0)], None).unwrap();
        assert_eq!(stack.frame_count(), 2);
        assert_eq!(stack.frame(1)[[10, 12]], base[[11, 10]]);
    }

    #[test]
    fn test_level_axis_profile_is_centered() {
        let phantom = RodPhantom {
            rods: vec![Rod { y: 0.0, z: 0.0, amplitude: 1.0, width: 1.5 }],
        };
        let stack = phantom.project((33, 20), &[-30.0, 0.0, 30.0], 0.0, 0.0).unwrap();
        for k in 0..3 {
            let column = stack.column(k, 7);
            let peak = column
                .iter()
                .enumerate()
                .fold((0, f32::MIN), |best, (i, v)| if *v > best.1 { (i, *v) } else { best });
            assert_eq!(peak.0, 16);
        }
    }

    #[test]
    fn test_tilt_range() {
        assert_eq!(tilt_range(-20.0, 20.0, 5), vec![-20.0, -10.0, 0.0, 10.0, 20.0]);
    }

    #[test]
    fn test_noise_changes_values() {
        let base = blob_image(16, 16, 2, 3);
        let stack = translated_series(&base, &[(0.0, 0.0)], None).unwrap();
        let noisy = add_gaussian_noise(&stack, 0.05, 9).unwrap();
        assert_ne!(noisy.data(), stack.data());
        assert!(add_gaussian_noise(&stack, -1.0, 9).is_err());
    }
}
