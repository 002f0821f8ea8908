use crate::algorithms::PairwiseEstimator;
use crate::data::transformer::ImageTransformer;
use crate::error::AlignError;
use crate::utils::{central_gradients, downsample_2x, is_degenerate};
use crate::Result;
use ndarray::{Array2, ArrayView2};
use serde::{Deserialize, Serialize};
use tracing::trace;

/// Pyramidal least-squares intensity registration (translation only).
///
/// Each pyramid level refines the translation minimizing the mean squared
/// intensity difference with Levenberg-Marquardt damped Gauss-Newton steps,
/// starting from the doubled estimate of the coarser level.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RigidRegistration {
    /// Coarsest level side length; the pyramid stops before going below it.
    pub min_level_size: usize,
    pub max_levels: usize,
    pub max_iterations: usize,
    /// Step length (pixels) below which a level is converged.
    pub step_tolerance: f64,
}

impl Default for RigidRegistration {
    fn default() -> Self {
        Self {
            min_level_size: 16,
            max_levels: 4,
            max_iterations: 100,
            step_tolerance: 1e-4,
        }
    }
}

impl RigidRegistration {
    pub fn new() -> Self {
        Self::default()
    }

    /// Translation that brings `target` onto `reference`.
    pub fn correction(&self, reference: ArrayView2<f32>, target: ArrayView2<f32>) -> Result<(f64, f64)> {
        if reference.dim() != target.dim() {
            return Err(AlignError::mismatch("frame shape", reference.dim(), target.dim()));
        }
        if is_degenerate(reference) || is_degenerate(target) {
            return Err(AlignError::estimation("rigid registration on a zero-variance frame"));
        }

        let pyramid = self.build_pyramid(reference, target);
        let mut u = (0.0f64, 0.0f64);
        for (level, (reference, target)) in pyramid.iter().enumerate().rev() {
            u = self.refine_level(reference.view(), target.view(), u)?;
            trace!(level = level, ux = u.0, uy = u.1, "pyramid level refined");
            if level > 0 {
                u = (2.0 * u.0, 2.0 * u.1);
            }
        }
        if !u.0.is_finite() || !u.1.is_finite() {
            return Err(AlignError::estimation("rigid registration diverged"));
        }
        // target sampled at x + u matches the reference, so moving the
        // target content by -u aligns it
        Ok((-u.0, -u.1))
    }

    fn build_pyramid(&self, reference: ArrayView2<f32>, target: ArrayView2<f32>) -> Vec<(Array2<f32>, Array2<f32>)> {
        let mut levels = vec![(reference.to_owned(), target.to_owned())];
        while levels.len() < self.max_levels.max(1) {
            let Some((r, t)) = levels.last() else { break };
            let (h, w) = r.dim();
            if h / 2 < self.min_level_size || w / 2 < self.min_level_size {
                break;
            }
            let next = (downsample_2x(r.view()), downsample_2x(t.view()));
            levels.push(next);
        }
        levels
    }

    /// Mean squared difference between the reference and the target sampled
    /// at `x + u`, with the normalized Gauss-Newton system at `u`.
    fn evaluate(
        reference: ArrayView2<f32>,
        target: ArrayView2<f32>,
        gradients: (&Array2<f32>, &Array2<f32>),
        u: (f64, f64),
    ) -> Option<(f64, [[f64; 2]; 2], [f64; 2])> {
        let (height, width) = reference.dim();
        let mut count = 0usize;
        let mut sse = 0.0;
        let mut hessian = [[0.0; 2]; 2];
        let mut gradient = [0.0; 2];
        for y in 0..height {
            for x in 0..width {
                let (sx, sy) = (x as f64 + u.0, y as f64 + u.1);
                let Some(value) = ImageTransformer::bilinear_interpolate(target, sx, sy) else {
                    continue;
                };
                let gx = ImageTransformer::bilinear_interpolate(gradients.0.view(), sx, sy).unwrap_or(0.0) as f64;
                let gy = ImageTransformer::bilinear_interpolate(gradients.1.view(), sx, sy).unwrap_or(0.0) as f64;
                let residual = value as f64 - reference[[y, x]] as f64;
                sse += residual * residual;
                hessian[0][0] += gx * gx;
                hessian[0][1] += gx * gy;
                hessian[1][1] += gy * gy;
                gradient[0] += gx * residual;
                gradient[1] += gy * residual;
                count += 1;
            }
        }
        if count == 0 {
            return None;
        }
        hessian[1][0] = hessian[0][1];
        let scale = count as f64;
        Some((
            sse / scale,
            [
                [hessian[0][0] / scale, hessian[0][1] / scale],
                [hessian[1][0] / scale, hessian[1][1] / scale],
            ],
            [gradient[0] / scale, gradient[1] / scale],
        ))
    }

    fn refine_level(&self, reference: ArrayView2<f32>, target: ArrayView2<f32>, start: (f64, f64)) -> Result<(f64, f64)> {
        let (grad_x, grad_y) = central_gradients(target);
        let gradients = (&grad_x, &grad_y);
        let mut u = start;
        let mut mu = 1e-3;
        let (mut cost, mut hessian, mut gradient) = Self::evaluate(reference, target, gradients, u)
            .ok_or_else(|| AlignError::estimation("frames do not overlap"))?;

        for _ in 0..self.max_iterations {
            let damped = [
                [hessian[0][0] * (1.0 + mu), hessian[0][1]],
                [hessian[1][0], hessian[1][1] * (1.0 + mu)],
            ];
            let det = damped[0][0] * damped[1][1] - damped[0][1] * damped[1][0];
            if det.abs() < 1e-18 {
                break;
            }
            let step = (
                -(damped[1][1] * gradient[0] - damped[0][1] * gradient[1]) / det,
                -(-damped[1][0] * gradient[0] + damped[0][0] * gradient[1]) / det,
            );
            let candidate = (u.0 + step.0, u.1 + step.1);
            match Self::evaluate(reference, target, gradients, candidate) {
                Some((new_cost, new_hessian, new_gradient)) if new_cost < cost => {
                    u = candidate;
                    cost = new_cost;
                    hessian = new_hessian;
                    gradient = new_gradient;
                    mu = (mu / 10.0).max(1e-9);
                    if step.0.hypot(step.1) < self.step_tolerance {
                        break;
                    }
                }
                _ => {
                    mu *= 10.0;
                    if mu > 1e9 {
                        break;
                    }
                }
            }
        }
        Ok(u)
    }
}

impl PairwiseEstimator for RigidRegistration {
    fn name(&self) -> &str {
        "StackReg"
    }

    fn estimate_pair(&self, reference: ArrayView2<f32>, target: ArrayView2<f32>) -> Result<(f64, f64)> {
        let (cx, cy) = self.correction(reference, target)?;
        Ok((-cx, -cy))
    }
}
