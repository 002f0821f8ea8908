//! Tilt-axis estimation.
//!
//! Raw stacks carry the tilt axis roughly along the image rows. Each
//! estimator measures the rotation that levels the axis and the offset that
//! centers it; applying the estimate rotates, translates and finally
//! transposes the frames so the axis ends up vertical.

pub mod com;
pub mod maximage;
pub mod minimize;
pub mod reconstruction;

pub use com::{default_sample_positions, estimate_tilt_com, tilt_com, ComTiltConfig, ComTiltEstimate};
pub use maximage::{estimate_tilt_maximage, tilt_maximage, MaxImageConfig, MaxImageEstimate};
pub use minimize::{estimate_tilt_minimize, tilt_minimize, MinimizeConfig, MinimizeProgress};
pub use reconstruction::{ReconAlgorithm, ReconstructionBackend};

use crate::alignment::apply::apply_tilt_correction;
use crate::data::stack::ImageStack;
use crate::error::AlignError;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TiltMethod {
    CenterOfMass,
    MaxImage,
    Minimize,
}

impl TiltMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            TiltMethod::CenterOfMass => "com",
            TiltMethod::MaxImage => "maximage",
            TiltMethod::Minimize => "minimize",
        }
    }
}

impl fmt::Display for TiltMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TiltMethod {
    type Err = AlignError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "com" | "center_of_mass" => Ok(TiltMethod::CenterOfMass),
            "maximage" | "max_image" => Ok(TiltMethod::MaxImage),
            "minimize" | "min" => Ok(TiltMethod::Minimize),
            other => Err(AlignError::invalid(format!("unknown tilt method '{}'", other))),
        }
    }
}

/// Rotation (degrees) and translation that level and center the tilt axis.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TiltAxisEstimate {
    pub rotation: f64,
    pub x_shift: f64,
    pub y_shift: f64,
}

/// Rotate + translate the stack by `estimate` and transpose the frame axes.
pub fn apply_tilt_estimate(stack: &ImageStack, estimate: &TiltAxisEstimate) -> Result<ImageStack> {
    apply_tilt_correction(stack, estimate.rotation, estimate.x_shift, estimate.y_shift, true)
}
