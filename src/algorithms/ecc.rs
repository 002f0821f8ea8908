use crate::algorithms::PairwiseEstimator;
use crate::error::AlignError;
use crate::utils::image_conversion::{array_to_mat, CvContext};
use crate::utils::is_degenerate;
use crate::Result;
use ndarray::ArrayView2;
use opencv::core::{no_array, Mat, TermCriteria, TermCriteria_Type, CV_32F};
use opencv::prelude::*;
use opencv::video;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Enhanced Correlation Coefficient (ECC) registration, translation only,
/// through `video::find_transform_ecc`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Ecc {
    pub max_iterations: usize,
    pub termination_eps: f64,
    /// Side of the Gaussian OpenCV applies to both frames; 1 disables it.
    pub gaussian_filter_size: i32,
}

impl Default for Ecc {
    fn default() -> Self {
        Self::new()
    }
}

/// Outcome of one ECC run.
#[derive(Debug, Clone, PartialEq)]
pub struct EccResult {
    pub shift: (f64, f64),
    pub correlation: f64,
}

impl Ecc {
    pub fn new() -> Self {
        Self {
            max_iterations: 1000,
            termination_eps: 1e-3,
            gaussian_filter_size: 5,
        }
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_termination_eps(mut self, eps: f64) -> Self {
        self.termination_eps = eps;
        self
    }

    pub fn with_gaussian_filter_size(mut self, size: i32) -> Self {
        self.gaussian_filter_size = size;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_iterations == 0 || self.max_iterations > i32::MAX as usize {
            return Err(AlignError::invalid(format!(
                "ECC max_iterations must be in 1..={}, got {}",
                i32::MAX,
                self.max_iterations
            )));
        }
        if !(self.termination_eps > 0.0) {
            return Err(AlignError::invalid("ECC termination_eps must be positive"));
        }
        if self.gaussian_filter_size < 1 || self.gaussian_filter_size % 2 == 0 {
            return Err(AlignError::invalid(format!(
                "ECC gaussian_filter_size must be odd and positive, got {}",
                self.gaussian_filter_size
            )));
        }
        Ok(())
    }

    fn translation_warp(dx: f32, dy: f32) -> Result<Mat> {
        let mut warp = Mat::eye(2, 3, CV_32F)
            .and_then(|m| m.to_mat())
            .cv_context("allocating ECC warp")?;
        *warp.at_2d_mut::<f32>(0, 2).cv_context("ECC warp")? = dx;
        *warp.at_2d_mut::<f32>(1, 2).cv_context("ECC warp")? = dy;
        Ok(warp)
    }

    fn run(&self, template: &Mat, input: &Mat, warp: &mut Mat, iterations: i32) -> Result<f64> {
        let criteria = TermCriteria::new(
            TermCriteria_Type::COUNT as i32 + TermCriteria_Type::EPS as i32,
            iterations,
            self.termination_eps,
        )
        .cv_context("ECC criteria")?;
        let correlation = video::find_transform_ecc(
            template,
            input,
            warp,
            video::MOTION_TRANSLATION,
            criteria,
            &no_array(),
            self.gaussian_filter_size,
        )
        .cv_context("ECC")?;
        if correlation.is_nan() {
            return Err(AlignError::estimation("ECC correlation is NaN"));
        }
        Ok(correlation)
    }

    /// Register `target` onto `reference` from a zero warp.
    ///
    /// OpenCV stops silently at the iteration cap, so one further iteration
    /// is run from the result: if the correlation still moves by at least
    /// `termination_eps` the run had not converged.
    pub fn register(&self, reference: ArrayView2<f32>, target: ArrayView2<f32>) -> Result<EccResult> {
        if reference.dim() != target.dim() {
            return Err(AlignError::mismatch("frame shape", reference.dim(), target.dim()));
        }
        self.validate()?;
        if is_degenerate(reference) || is_degenerate(target) {
            return Err(AlignError::estimation("ECC on a zero-variance frame"));
        }

        let template = array_to_mat(reference)?;
        let input = array_to_mat(target)?;
        let mut warp = Self::translation_warp(0.0, 0.0)?;
        let correlation = self.run(&template, &input, &mut warp, self.max_iterations as i32)?;
        let dx = *warp.at_2d::<f32>(0, 2).cv_context("ECC warp")?;
        let dy = *warp.at_2d::<f32>(1, 2).cv_context("ECC warp")?;

        let mut settle = Self::translation_warp(dx, dy)?;
        let settled = self.run(&template, &input, &mut settle, 1)?;
        let change = (settled - correlation).abs();
        if change >= self.termination_eps {
            warn!(
                max_iterations = self.max_iterations,
                last_change = change,
                "ECC hit the iteration cap without converging"
            );
            return Err(AlignError::estimation(format!(
                "ECC did not converge within {} iterations",
                self.max_iterations
            )));
        }

        debug!(correlation = correlation, dx = dx, dy = dy, "ECC converged");
        Ok(EccResult {
            shift: (dx as f64, dy as f64),
            correlation,
        })
    }
}

impl PairwiseEstimator for Ecc {
    fn name(&self) -> &str {
        "ECC"
    }

    fn estimate_pair(&self, reference: ArrayView2<f32>, target: ArrayView2<f32>) -> Result<(f64, f64)> {
        Ok(self.register(reference, target)?.shift)
    }
}
