use crate::data::transformer::AffineTransform;
use crate::error::AlignError;
use crate::Result;
use ndarray::{Array2, ArrayView2};
use opencv::core::{self, Mat, Scalar};
use opencv::prelude::*;

/// Maps OpenCV errors onto the alignment error model.
pub trait CvContext<T> {
    fn cv_context(self, operation: &str) -> Result<T>;
}

impl<T> CvContext<T> for opencv::Result<T> {
    fn cv_context(self, operation: &str) -> Result<T> {
        self.map_err(|e| AlignError::estimation(format!("{} failed in OpenCV: {}", operation, e)))
    }
}

/// Copy a frame into a single-channel `CV_32F` Mat.
pub fn array_to_mat(image: ArrayView2<f32>) -> Result<Mat> {
    let (rows, cols) = image.dim();
    let mut mat = Mat::new_rows_cols_with_default(rows as i32, cols as i32, core::CV_32FC1, Scalar::all(0.0))
        .cv_context("allocating frame")?;
    let pixels = mat.data_typed_mut::<f32>().cv_context("filling frame")?;
    for (dst, src) in pixels.iter_mut().zip(image.iter()) {
        *dst = *src;
    }
    Ok(mat)
}

/// Copy a continuous single-channel `CV_32F` Mat back into an array.
pub fn mat_to_array(mat: &Mat) -> Result<Array2<f32>> {
    let (rows, cols) = (mat.rows() as usize, mat.cols() as usize);
    let pixels = mat.data_typed::<f32>().cv_context("reading frame")?;
    Array2::from_shape_vec((rows, cols), pixels.to_vec())
        .map_err(|e| AlignError::estimation(format!("OpenCV frame has an unexpected layout: {}", e)))
}

/// 2x3 `CV_64F` matrix of a forward affine transform, as `warp_affine` expects it.
pub fn affine_to_mat(transform: &AffineTransform) -> Result<Mat> {
    let mut mat = Mat::zeros(2, 3, core::CV_64F)
        .and_then(|m| m.to_mat())
        .cv_context("allocating warp matrix")?;
    for (row, values) in transform.matrix.iter().enumerate() {
        for (col, value) in values.iter().enumerate() {
            *mat.at_2d_mut::<f64>(row as i32, col as i32).cv_context("filling warp matrix")? = *value;
        }
    }
    Ok(mat)
}
