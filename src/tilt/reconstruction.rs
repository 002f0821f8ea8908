use ndarray::{Array2, ArrayView2};
use serde::{Deserialize, Serialize};

/// Reconstruction algorithm requested from a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReconAlgorithm {
    Fbp,
    Sirt,
}

/// Tomographic reconstruction and re-projection of single slices.
///
/// Sinograms are `(tilts, detector pixels)`; angles are in degrees. The
/// `use_accelerator` flag is forwarded untouched from the caller.
pub trait ReconstructionBackend: Send + Sync {
    fn reconstruct(
        &self,
        sinogram: ArrayView2<f32>,
        angles: &[f64],
        algorithm: ReconAlgorithm,
        iterations: usize,
        use_accelerator: bool,
    ) -> anyhow::Result<Array2<f32>>;

    fn project(&self, slice: ArrayView2<f32>, angles: &[f64], use_accelerator: bool) -> anyhow::Result<Array2<f32>>;
}
