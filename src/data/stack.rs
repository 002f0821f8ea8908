use crate::alignment::AlignmentRecord;
use crate::data::transformer::{frame_center, AffineTransform, ImageTransformer};
use crate::error::AlignError;
use crate::Result;
use ndarray::{Array2, Array3, ArrayView1, ArrayView2, Axis};
use rayon::prelude::*;

/// Tilt series: one 2-D frame per tilt angle plus the alignment record of
/// the last correction applied to it.
///
/// Data is laid out as `(frames, rows, cols)`.
#[derive(Debug, Clone)]
pub struct ImageStack {
    data: Array3<f32>,
    angles: Option<Vec<f64>>,
    alignment: Option<AlignmentRecord>,
}

impl ImageStack {
    pub fn new(data: Array3<f32>, angles: Option<Vec<f64>>) -> Result<Self> {
        let (frames, rows, cols) = data.dim();
        if frames == 0 || rows == 0 || cols == 0 {
            return Err(AlignError::invalid(format!(
                "stack must have non-empty frames, got shape {:?}",
                data.dim()
            )));
        }
        if let Some(angles) = &angles {
            if angles.len() != frames {
                return Err(AlignError::mismatch("tilt angle count", frames, angles.len()));
            }
        }
        Ok(Self {
            data,
            angles,
            alignment: None,
        })
    }

    /// Build a stack from individual frames of identical shape.
    pub fn from_frames(frames: Vec<Array2<f32>>, angles: Option<Vec<f64>>) -> Result<Self> {
        let Some(first) = frames.first() else {
            return Err(AlignError::invalid("stack needs at least one frame"));
        };
        let shape = first.dim();
        if let Some(bad) = frames.iter().position(|f| f.dim() != shape) {
            return Err(AlignError::mismatch("frame shape", shape, frames[bad].dim()));
        }
        let views: Vec<ArrayView2<f32>> = frames.iter().map(|f| f.view()).collect();
        let data = ndarray::stack(Axis(0), &views)
            .map_err(|e| AlignError::invalid(format!("cannot stack frames: {}", e)))?;
        Self::new(data, angles)
    }

    pub fn frame_count(&self) -> usize {
        self.data.len_of(Axis(0))
    }

    /// `(rows, cols)` of every frame.
    pub fn frame_shape(&self) -> (usize, usize) {
        let (_, rows, cols) = self.data.dim();
        (rows, cols)
    }

    pub fn frame(&self, index: usize) -> ArrayView2<'_, f32> {
        self.data.index_axis(Axis(0), index)
    }

    pub fn set_frame(&mut self, index: usize, frame: ArrayView2<f32>) -> Result<()> {
        if index >= self.frame_count() {
            return Err(AlignError::invalid(format!(
                "frame index {} out of range for {} frames",
                index,
                self.frame_count()
            )));
        }
        if frame.dim() != self.frame_shape() {
            return Err(AlignError::mismatch("frame shape", self.frame_shape(), frame.dim()));
        }
        self.data.index_axis_mut(Axis(0), index).assign(&frame);
        Ok(())
    }

    pub fn data(&self) -> &Array3<f32> {
        &self.data
    }

    pub fn angles(&self) -> Option<&[f64]> {
        self.angles.as_deref()
    }

    /// Tilt angles, or `InvalidParameter` naming the operation that needs them.
    pub fn require_angles(&self, operation: &str) -> Result<&[f64]> {
        self.angles()
            .ok_or_else(|| AlignError::invalid(format!("{} requires tilt angle metadata", operation)))
    }

    pub fn alignment(&self) -> Option<&AlignmentRecord> {
        self.alignment.as_ref()
    }

    pub fn set_alignment(&mut self, record: AlignmentRecord) {
        self.alignment = Some(record);
    }

    pub fn take_alignment(&mut self) -> Option<AlignmentRecord> {
        self.alignment.take()
    }

    /// Frame whose tilt is nearest zero, or the midpoint without angles.
    pub fn default_pivot(&self) -> usize {
        match &self.angles {
            Some(angles) => angles
                .iter()
                .enumerate()
                .fold((0, f64::INFINITY), |(best, best_abs), (i, a)| {
                    if a.abs() < best_abs {
                        (i, a.abs())
                    } else {
                        (best, best_abs)
                    }
                })
                .0,
            None => self.frame_count() / 2,
        }
    }

    /// Column `col` of every frame: a `(frames, rows)` sinogram for a
    /// horizontal tilt axis.
    pub fn sinogram(&self, col: usize) -> Result<Array2<f32>> {
        let (_, cols) = self.frame_shape();
        if col >= cols {
            return Err(AlignError::invalid(format!(
                "sinogram column {} out of range for width {}",
                col, cols
            )));
        }
        Ok(self.data.index_axis(Axis(2), col).to_owned())
    }

    /// Profile of frame `index` along column `col`.
    pub fn column(&self, index: usize, col: usize) -> ArrayView1<'_, f32> {
        self.data.index_axis(Axis(0), index).index_axis_move(Axis(1), col)
    }

    /// Per-pixel maximum across all frames.
    pub fn max_image(&self) -> Array2<f32> {
        self.data
            .fold_axis(Axis(0), f32::NEG_INFINITY, |acc, value| acc.max(*value))
    }

    /// Same angles and record, each frame replaced by `f(index, frame)`.
    pub fn map_frames<F>(&self, f: F) -> Result<Self>
    where
        F: Fn(usize, ArrayView2<f32>) -> Array2<f32> + Sync,
    {
        self.try_map_frames(|i, frame| Ok(f(i, frame)))
    }

    /// Fallible [`map_frames`](Self::map_frames); the first error aborts the map.
    pub fn try_map_frames<F>(&self, f: F) -> Result<Self>
    where
        F: Fn(usize, ArrayView2<f32>) -> Result<Array2<f32>> + Sync,
    {
        let frames = (0..self.frame_count())
            .into_par_iter()
            .map(|i| f(i, self.frame(i)))
            .collect::<Result<Vec<_>>>()?;
        let mut out = Self::from_frames(frames, self.angles.clone())?;
        out.alignment = self.alignment.clone();
        Ok(out)
    }

    /// Rotate every frame about its center and then translate it.
    pub fn rotate_translate(&self, x_shift: f64, y_shift: f64, angle_degrees: f64) -> Result<Self> {
        let transform =
            AffineTransform::rotate_translate(frame_center(self.frame_shape()), angle_degrees, x_shift, y_shift);
        self.try_map_frames(|_, frame| ImageTransformer::warp_affine(frame, &transform))
    }

    /// Swap rows and columns of every frame in place.
    pub fn transpose_frame_axes(&mut self) {
        let transposed = self.data.view().permuted_axes([0, 2, 1]);
        self.data = transposed.as_standard_layout().into_owned();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn numbered_stack(frames: usize, rows: usize, cols: usize) -> ImageStack {
        let data = Array3::from_shape_fn((frames, rows, cols), |(f, y, x)| (f * 1000 + y * cols + x) as f32);
        ImageStack::new(data, None).unwrap()
    }

    #[test]
    fn test_angle_count_must_match() {
        let data = Array3::<f32>::zeros((3, 4, 4));
        let err = ImageStack::new(data, Some(vec![0.0, 1.0])).unwrap_err();
        assert!(matches!(err, AlignError::DimensionMismatch { .. }));
    }

    #[test]
    fn test_from_frames_rejects_mixed_shapes() {
        let frames = vec![Array2::<f32>::zeros((4, 4)), Array2::<f32>::zeros((4, 5))];
        assert!(matches!(
            ImageStack::from_frames(frames, None),
            Err(AlignError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn test_default_pivot() {
        let data = Array3::<f32>::zeros((5, 2, 2));
        let stack = ImageStack::new(data.clone(), Some(vec![-40.0, -18.0, 3.0, 21.0, 45.0])).unwrap();
        assert_eq!(stack.default_pivot(), 2);

        let stack = ImageStack::new(data, None).unwrap();
        assert_eq!(stack.default_pivot(), 2);
    }

    #[test]
    fn test_transpose_frame_axes() {
        let mut stack = numbered_stack(2, 3, 5);
        let before = stack.frame(1).to_owned();
        stack.transpose_frame_axes();
        assert_eq!(stack.frame_shape(), (5, 3));
        assert_eq!(stack.frame(1)[[4, 2]], before[[2, 4]]);
    }

    #[test]
    fn test_sinogram_extracts_columns() {
        let stack = numbered_stack(3, 4, 6);
        let sino = stack.sinogram(2).unwrap();
        assert_eq!(sino.dim(), (3, 4));
        assert_eq!(sino[[1, 3]], stack.frame(1)[[3, 2]]);
        assert!(stack.sinogram(6).is_err());
    }

    #[test]
    fn test_rotate_translate_does_not_mutate_input() {
        let stack = numbered_stack(2, 8, 8);
        let original = stack.data().clone();
        let moved = stack.rotate_translate(1.0, 0.0, 0.0).unwrap();
        assert_eq!(stack.data(), &original);
        assert_eq!(moved.frame(0)[[3, 4]], original[[0, 3, 3]]);
    }

    #[test]
    fn test_max_image() {
        let stack = numbered_stack(3, 2, 2);
        let max = stack.max_image();
        assert_eq!(max[[1, 1]], stack.frame(2)[[1, 1]]);
    }
}
