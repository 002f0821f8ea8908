use crate::error::AlignError;
use crate::utils::image_conversion::{affine_to_mat, array_to_mat, mat_to_array, CvContext};
use crate::Result;
use ndarray::{Array2, ArrayView2};
use opencv::core::{self, Mat, Scalar, Size};
use opencv::imgproc;
use serde::{Deserialize, Serialize};

/// 2x3 forward affine map in pixel coordinates (x = column, y = row).
///
/// Warping with this transform produces `output(M * p) = input(p)`, so a
/// translation of `(dx, dy)` moves image content by `(dx, dy)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AffineTransform {
    pub matrix: [[f64; 3]; 2],
}

impl Default for AffineTransform {
    fn default() -> Self {
        Self::identity()
    }
}

impl AffineTransform {
    pub fn identity() -> Self {
        Self {
            matrix: [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0]],
        }
    }

    pub fn translation(dx: f64, dy: f64) -> Self {
        Self {
            matrix: [[1.0, 0.0, dx], [0.0, 1.0, dy]],
        }
    }

    /// Rotation by `angle_degrees` about `center` (x, y).
    pub fn rotation_about(center: (f64, f64), angle_degrees: f64) -> Self {
        let theta = angle_degrees.to_radians();
        let (sin_t, cos_t) = theta.sin_cos();
        let (cx, cy) = center;
        Self {
            matrix: [
                [cos_t, -sin_t, cx - cos_t * cx + sin_t * cy],
                [sin_t, cos_t, cy - sin_t * cx - cos_t * cy],
            ],
        }
    }

    /// Rotation about `center` followed by a translation of `(x_shift, y_shift)`.
    pub fn rotate_translate(center: (f64, f64), angle_degrees: f64, x_shift: f64, y_shift: f64) -> Self {
        Self::translation(x_shift, y_shift).then_after(&Self::rotation_about(center, angle_degrees))
    }

    /// `self ∘ other`: apply `other` first, then `self`.
    pub fn then_after(&self, other: &AffineTransform) -> Self {
        let a = &self.matrix;
        let b = &other.matrix;
        let mut out = [[0.0; 3]; 2];
        for r in 0..2 {
            out[r][0] = a[r][0] * b[0][0] + a[r][1] * b[1][0];
            out[r][1] = a[r][0] * b[0][1] + a[r][1] * b[1][1];
            out[r][2] = a[r][0] * b[0][2] + a[r][1] * b[1][2] + a[r][2];
        }
        Self { matrix: out }
    }

    pub fn inverse(&self) -> Option<Self> {
        let m = &self.matrix;
        let det = m[0][0] * m[1][1] - m[0][1] * m[1][0];
        if !det.is_finite() || det.abs() < 1e-12 || m.iter().flatten().any(|v| !v.is_finite()) {
            return None;
        }
        let inv_a = m[1][1] / det;
        let inv_b = -m[0][1] / det;
        let inv_c = -m[1][0] / det;
        let inv_d = m[0][0] / det;
        Some(Self {
            matrix: [
                [inv_a, inv_b, -(inv_a * m[0][2] + inv_b * m[1][2])],
                [inv_c, inv_d, -(inv_c * m[0][2] + inv_d * m[1][2])],
            ],
        })
    }

    pub fn apply(&self, x: f64, y: f64) -> (f64, f64) {
        let m = &self.matrix;
        (
            m[0][0] * x + m[0][1] * y + m[0][2],
            m[1][0] * x + m[1][1] * y + m[1][2],
        )
    }

    pub fn translation_part(&self) -> (f64, f64) {
        (self.matrix[0][2], self.matrix[1][2])
    }

    /// Rotation angle of the linear part, in degrees.
    pub fn rotation_degrees(&self) -> f64 {
        self.matrix[1][0].atan2(self.matrix[0][0]).to_degrees()
    }

    /// `(angle_degrees, x_shift, y_shift)` such that
    /// `rotate_translate(center, angle, x_shift, y_shift)` reproduces a
    /// rigid transform.
    pub fn as_rotate_translate(&self, center: (f64, f64)) -> (f64, f64, f64) {
        let angle = self.rotation_degrees();
        let rotation = Self::rotation_about(center, angle);
        let (tx, ty) = self.translation_part();
        let (rx, ry) = rotation.translation_part();
        (angle, tx - rx, ty - ry)
    }
}

/// Geometric center of a `(rows, cols)` frame in (x, y) pixel coordinates.
pub fn frame_center(shape: (usize, usize)) -> (f64, f64) {
    let (rows, cols) = shape;
    ((cols as f64 - 1.0) / 2.0, (rows as f64 - 1.0) / 2.0)
}

pub struct ImageTransformer;

impl ImageTransformer {
    /// Translate a frame by (dx, dy) with nearest-neighbour sampling and zero fill.
    pub fn translate_nearest(image: ArrayView2<f32>, dx: f64, dy: f64) -> Array2<f32> {
        let (height, width) = image.dim();
        Array2::from_shape_fn((height, width), |(y, x)| {
            let src_x = (x as f64 - dx).round();
            let src_y = (y as f64 - dy).round();
            if src_x >= 0.0 && src_y >= 0.0 && src_x < width as f64 && src_y < height as f64 {
                image[[src_y as usize, src_x as usize]]
            } else {
                0.0 // Black for out-of-bounds
            }
        })
    }

    /// Warp a frame with `imgproc::warp_affine` (bilinear, zero border).
    ///
    /// Singular or non-finite transforms are rejected.
    pub fn warp_affine(image: ArrayView2<f32>, transform: &AffineTransform) -> Result<Array2<f32>> {
        if transform.inverse().is_none() {
            return Err(AlignError::invalid(format!(
                "affine transform {:?} is not invertible",
                transform.matrix
            )));
        }
        let (height, width) = image.dim();
        let source = array_to_mat(image)?;
        let matrix = affine_to_mat(transform)?;
        let mut warped = Mat::default();
        imgproc::warp_affine(
            &source,
            &mut warped,
            &matrix,
            Size::new(width as i32, height as i32),
            imgproc::INTER_LINEAR,
            core::BORDER_CONSTANT,
            Scalar::all(0.0),
        )
        .cv_context("warp_affine")?;
        mat_to_array(&warped)
    }

    /// Rotate a frame by `angle_degrees` about its center (bilinear, zero border).
    pub fn rotate(image: ArrayView2<f32>, angle_degrees: f64) -> Result<Array2<f32>> {
        let transform = AffineTransform::rotation_about(frame_center(image.dim()), angle_degrees);
        Self::warp_affine(image, &transform)
    }

    /// Bilinear sample at a single point (x, y); `None` outside the frame.
    pub fn bilinear_interpolate(image: ArrayView2<f32>, x: f64, y: f64) -> Option<f32> {
        let (height, width) = image.dim();
        if x < 0.0 || y < 0.0 || x > (width - 1) as f64 || y > (height - 1) as f64 {
            return None;
        }

        let x1 = x.floor() as usize;
        let y1 = y.floor() as usize;
        let x2 = (x1 + 1).min(width - 1);
        let y2 = (y1 + 1).min(height - 1);

        let fx = (x - x1 as f64) as f32;
        let fy = (y - y1 as f64) as f32;

        let p11 = image[[y1, x1]];
        let p12 = image[[y2, x1]];
        let p21 = image[[y1, x2]];
        let p22 = image[[y2, x2]];

        let top = p11 + fx * (p21 - p11);
        let bottom = p12 + fx * (p22 - p12);
        Some(top + fy * (bottom - top))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(height: usize, width: usize) -> Array2<f32> {
        Array2::from_shape_fn((height, width), |(y, x)| (y * width + x) as f32)
    }

    #[test]
    fn test_translate_nearest_integer_shift() {
        let image = ramp(8, 10);
        let shifted = ImageTransformer::translate_nearest(image.view(), 2.0, 1.0);
        assert_eq!(shifted[[1, 2]], image[[0, 0]]);
        assert_eq!(shifted[[5, 7]], image[[4, 5]]);
        assert_eq!(shifted[[0, 0]], 0.0);
        assert_eq!(shifted[[3, 1]], 0.0);
    }

    #[test]
    fn test_warp_translation_matches_nearest_for_integers() {
        let image = ramp(12, 12);
        let by_nearest = ImageTransformer::translate_nearest(image.view(), -3.0, 2.0);
        let by_affine =
            ImageTransformer::warp_affine(image.view(), &AffineTransform::translation(-3.0, 2.0)).unwrap();
        for ((y, x), value) in by_nearest.indexed_iter() {
            assert!((value - by_affine[[y, x]]).abs() < 1e-4, "mismatch at ({}, {})", y, x);
        }
    }

    #[test]
    fn test_inverse_round_trip() {
        let t = AffineTransform::rotate_translate((15.5, 9.5), 13.0, 4.0, -2.5);
        let inv = t.inverse().unwrap();
        let (x, y) = t.apply(3.0, 7.0);
        let (bx, by) = inv.apply(x, y);
        assert!((bx - 3.0).abs() < 1e-10);
        assert!((by - 7.0).abs() < 1e-10);
    }

    #[test]
    fn test_rigid_decomposition_round_trip() {
        let center = (31.5, 31.5);
        let first = AffineTransform::rotate_translate(center, 2.0, 0.0, -3.0);
        let second = AffineTransform::rotate_translate(center, -0.5, 0.0, 0.75);
        let total = second.then_after(&first);
        let (angle, xs, ys) = total.as_rotate_translate(center);
        assert!((angle - 1.5).abs() < 1e-12);
        let rebuilt = AffineTransform::rotate_translate(center, angle, xs, ys);
        for r in 0..2 {
            for c in 0..3 {
                assert!((rebuilt.matrix[r][c] - total.matrix[r][c]).abs() < 1e-9);
            }
        }
    }

    #[test]
    fn test_rotation_keeps_center_fixed() {
        let center = (10.0, 6.0);
        let t = AffineTransform::rotation_about(center, 37.0);
        let (x, y) = t.apply(center.0, center.1);
        assert!((x - center.0).abs() < 1e-12);
        assert!((y - center.1).abs() < 1e-12);
    }

    #[test]
    fn test_rotate_zero_is_identity() {
        let image = ramp(9, 7);
        let rotated = ImageTransformer::rotate(image.view(), 0.0).unwrap();
        for ((y, x), value) in rotated.indexed_iter() {
            assert!((value - image[[y, x]]).abs() < 1e-4);
        }
    }

    #[test]
    fn test_singular_transform_is_rejected() {
        let image = ramp(4, 4);
        let singular = AffineTransform {
            matrix: [[0.0, 0.0, 1.0], [0.0, 0.0, 1.0]],
        };
        assert!(matches!(
            ImageTransformer::warp_affine(image.view(), &singular),
            Err(AlignError::InvalidParameter(_))
        ));
        let broken = AffineTransform {
            matrix: [[1.0, 0.0, f64::NAN], [0.0, 1.0, 0.0]],
        };
        assert!(broken.inverse().is_none());
        assert!(ImageTransformer::warp_affine(image.view(), &broken).is_err());
    }

    #[test]
    fn test_quarter_turn_moves_corner() {
        let mut image = Array2::<f32>::zeros((9, 9));
        image[[0, 8]] = 1.0;
        // positive angles turn +x towards +y about the center (4, 4)
        let rotated = ImageTransformer::rotate(image.view(), 90.0).unwrap();
        assert!((rotated[[8, 8]] - 1.0).abs() < 1e-4);
        assert!(rotated[[0, 8]].abs() < 1e-4);
    }
}
