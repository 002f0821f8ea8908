pub mod center_of_mass;
pub mod ecc;
pub mod phase_correlation;
pub mod stackreg;

pub use center_of_mass::*;
pub use ecc::*;
pub use phase_correlation::*;
pub use stackreg::*;

use crate::alignment::progress::ProgressReporter;
use crate::alignment::record::ShiftTable;
use crate::data::stack::ImageStack;
use crate::error::AlignError;
use crate::logging::AlgorithmSpan;
use crate::Result;
use ndarray::ArrayView2;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Translation estimator for one pair of frames.
pub trait PairwiseEstimator: Send + Sync {
    /// Returns the name of the algorithm
    fn name(&self) -> &str;

    /// Displacement `(dx, dy)` of `target` relative to `reference`:
    /// `target(x, y) ≈ reference(x - dx, y - dy)`.
    fn estimate_pair(&self, reference: ArrayView2<f32>, target: ArrayView2<f32>) -> Result<(f64, f64)>;
}

/// Shift estimation strategies selectable by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShiftMethod {
    #[serde(rename = "PC")]
    PhaseCorrelation,
    #[serde(rename = "ECC")]
    Ecc,
    #[serde(rename = "COM")]
    CenterOfMass,
    #[serde(rename = "StackReg")]
    StackReg,
}

impl ShiftMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ShiftMethod::PhaseCorrelation => "PC",
            ShiftMethod::Ecc => "ECC",
            ShiftMethod::CenterOfMass => "COM",
            ShiftMethod::StackReg => "StackReg",
        }
    }

    /// Methods whose result is a table of adjacent-pair shifts.
    pub fn is_pairwise(&self) -> bool {
        !matches!(self, ShiftMethod::CenterOfMass)
    }

    /// Methods whose corrections are applied as sub-pixel affine warps.
    pub fn uses_affine_application(&self) -> bool {
        matches!(self, ShiftMethod::Ecc | ShiftMethod::StackReg)
    }
}

impl fmt::Display for ShiftMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ShiftMethod {
    type Err = AlignError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "pc" | "phase" | "phase_correlation" => Ok(ShiftMethod::PhaseCorrelation),
            "ecc" => Ok(ShiftMethod::Ecc),
            "com" | "center_of_mass" => Ok(ShiftMethod::CenterOfMass),
            "stackreg" | "rigid" => Ok(ShiftMethod::StackReg),
            other => Err(AlignError::invalid(format!("unknown shift method '{}'", other))),
        }
    }
}

/// Relative shifts for every adjacent pair, gathered in two independent
/// walks outward from `pivot` (pivot → end, then pivot → start).
///
/// Any pair failure aborts the whole estimate.
pub fn estimate_relative_shifts(
    stack: &ImageStack,
    estimator: &dyn PairwiseEstimator,
    pivot: usize,
    progress: &mut ProgressReporter<'_>,
) -> Result<ShiftTable> {
    let n = stack.frame_count();
    if n < 2 {
        return Err(AlignError::invalid(format!(
            "shift estimation needs at least 2 frames, got {}",
            n
        )));
    }
    if pivot >= n {
        return Err(AlignError::invalid(format!("pivot {} outside [0, {})", pivot, n)));
    }

    let span = AlgorithmSpan::new(estimator.name(), n, pivot);
    let _guard = span.enter();

    let total = n - 1;
    let mut relative = ShiftTable::zeros(total);
    let forward = pivot..n - 1;
    let backward = (0..pivot).rev();
    for (done, i) in forward.chain(backward).enumerate() {
        let shift = estimator
            .estimate_pair(stack.frame(i), stack.frame(i + 1))
            .map_err(|e| match e {
                AlignError::EstimationFailure(msg) => {
                    AlignError::estimation(format!("frames {}->{}: {}", i, i + 1, msg))
                }
                other => other,
            })?;
        span.record_pair(i, shift);
        relative.set(i, shift);
        progress.report("pairwise_shifts", done + 1, total);
    }

    span.record_result(relative.max_magnitude());
    Ok(relative)
}
