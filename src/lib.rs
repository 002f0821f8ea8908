//! Tilt-series alignment for electron tomography.
//!
//! Frame-to-frame shift estimation (phase correlation, ECC, center of mass,
//! rigid intensity registration), bidirectional composition around a pivot,
//! and tilt-axis estimation (center-of-mass trajectories, MaxImage search,
//! reconstruction-residual minimization). Every correction is recorded on the
//! output stack and can be replayed on a matching stack.

pub mod algorithms;
pub mod alignment;
pub mod config;
pub mod data;
pub mod error;
pub mod logging;
pub mod optimize;
pub mod tilt;
pub mod utils;

pub use algorithms::{PairwiseEstimator, ShiftMethod};
pub use alignment::{
    align_stack, apply_shifts, apply_to_other, apply_transforms, compose_shifts, AlignmentOrchestrator,
    AlignmentRecord, AlignmentReport, ShiftTable,
};
pub use data::{AffineTransform, ImageStack};
pub use error::AlignError;
pub use tilt::{ReconstructionBackend, TiltAxisEstimate, TiltMethod};

pub type Result<T> = std::result::Result<T, AlignError>;
