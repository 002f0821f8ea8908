use crate::alignment::progress::ProgressReporter;
use crate::data::stack::ImageStack;
use crate::data::transformer::ImageTransformer;
use crate::error::AlignError;
use crate::logging::StageSpan;
use crate::tilt::{apply_tilt_estimate, TiltAxisEstimate};
use crate::utils::hamming;
use crate::Result;
use ndarray::{s, Array2, ArrayView2, Axis};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MaxImageConfig {
    /// Half-width of the searched angle range, in degrees.
    pub limit: f64,
    /// Angle step, in degrees.
    pub delta: f64,
}

impl Default for MaxImageConfig {
    fn default() -> Self {
        Self { limit: 10.0, delta: 0.3 }
    }
}

impl MaxImageConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.limit.is_finite() && self.limit > 0.0) {
            return Err(AlignError::invalid(format!("maximage limit must be positive, got {}", self.limit)));
        }
        if !(self.delta.is_finite() && self.delta > 0.0) {
            return Err(AlignError::invalid(format!("maximage delta must be positive, got {}", self.delta)));
        }
        Ok(())
    }

    /// `-limit, -limit + delta, ...` up to and including `+limit` when it
    /// falls on the grid, possibly one step past it.
    pub fn candidate_angles(&self) -> Vec<f64> {
        let count = ((2.0 * self.limit + self.delta) / self.delta).ceil() as usize;
        (0..count).map(|k| -self.limit + k as f64 * self.delta).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MaxImageEstimate {
    /// Leveling rotation found from the `-limit/2` starting point.
    pub from_negative_start: f64,
    /// Leveling rotation found from the `+limit/2` starting point.
    pub from_positive_start: f64,
    pub rotation: f64,
}

/// Central square of `image` tapered with a separable Hamming window.
fn tapered_square(image: ArrayView2<f32>) -> Array2<f32> {
    let (rows, cols) = image.dim();
    let side = rows.min(cols);
    let top = (rows - side) / 2;
    let left = (cols - side) / 2;
    let window = hamming(side);
    let square = image.slice(s![top..top + side, left..left + side]);
    Array2::from_shape_fn((side, side), |(y, x)| {
        ((window[y] * window[x]).sqrt() * square[[y, x]] as f64) as f32
    })
}

/// Sum of squared differences between consecutive row sums. Peaks when
/// the features are aligned with the rows.
fn row_profile_score(image: ArrayView2<f32>) -> f64 {
    let profile: Vec<f64> = image
        .sum_axis(Axis(1))
        .iter()
        .map(|v| *v as f64)
        .collect();
    profile.windows(2).map(|w| (w[1] - w[0]).powi(2)).sum()
}

/// Index of the best-scoring candidate; the first maximum wins.
fn best_candidate(image: ArrayView2<f32>, angles: &[f64]) -> Result<usize> {
    let scores = angles
        .par_iter()
        .map(|&angle| ImageTransformer::rotate(image, angle).map(|rotated| row_profile_score(rotated.view())))
        .collect::<Result<Vec<f64>>>()?;
    Ok(scores
        .iter()
        .enumerate()
        .fold(0, |best, (i, score)| if *score > scores[best] { i } else { best }))
}

/// Search the rotation that levels the projected features of the
/// maximum-intensity image.
pub fn estimate_tilt_maximage(
    stack: &ImageStack,
    config: &MaxImageConfig,
    progress: &mut ProgressReporter,
) -> Result<MaxImageEstimate> {
    config.validate()?;
    let tapered = tapered_square(stack.max_image().view());
    let angles = config.candidate_angles();
    let half = config.limit / 2.0;

    let mut found = [0.0; 2];
    for (i, start) in [-half, half].into_iter().enumerate() {
        let started = ImageTransformer::rotate(tapered.view(), start)?;
        let best = best_candidate(started.view(), &angles)?;
        found[i] = start + angles[best];
        debug!(
            target: "tomo_align::tilt",
            start = start,
            candidate = angles[best],
            rotation = found[i],
            "MaxImage search finished"
        );
        progress.report("maximage", i + 1, 2);
    }

    Ok(MaxImageEstimate {
        from_negative_start: found[0],
        from_positive_start: found[1],
        rotation: (found[0] + found[1]) / 2.0,
    })
}

/// MaxImage tilt alignment: rotate to level the axis, then transpose. No
/// translation is estimated.
pub fn tilt_maximage(
    stack: &ImageStack,
    config: &MaxImageConfig,
    progress: &mut ProgressReporter,
) -> Result<ImageStack> {
    let span = StageSpan::new("tilt_maximage");
    let _guard = span.enter();

    let estimate = estimate_tilt_maximage(stack, config, progress)?;
    info!(
        target: "tomo_align::tilt",
        rotation = format!("{:.2}", estimate.rotation),
        "Calculated tilt-axis rotation"
    );
    let out = apply_tilt_estimate(
        stack,
        &TiltAxisEstimate {
            rotation: estimate.rotation,
            ..Default::default()
        },
    )?;
    span.record_completion(true);
    Ok(out)
}
