use crate::algorithms::center_of_mass::centered_centroid;
use crate::alignment::apply::apply_trajectory_shifts;
use crate::alignment::record::ShiftTable;
use crate::data::stack::ImageStack;
use crate::data::transformer::{frame_center, AffineTransform, ImageTransformer};
use crate::error::AlignError;
use crate::logging::StageSpan;
use crate::optimize::{curve_fit, fit_line, CurveModel, FitOptions, TiltTrajectory};
use crate::tilt::{apply_tilt_estimate, TiltAxisEstimate};
use crate::Result;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ComTiltConfig {
    /// Columns where the centroid trajectory is fitted; three positions
    /// over the middle half of the width when unset.
    pub positions: Option<Vec<usize>>,
    /// Re-measure on the corrected stack until the residual is small.
    pub iterative: bool,
    pub max_iterations: usize,
    /// Degrees
    pub rotation_tolerance: f64,
    /// Pixels
    pub shift_tolerance: f64,
}

impl Default for ComTiltConfig {
    fn default() -> Self {
        Self {
            positions: None,
            iterative: false,
            max_iterations: 10,
            rotation_tolerance: 1.0,
            shift_tolerance: 1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ComTiltEstimate {
    pub estimate: TiltAxisEstimate,
    /// Vertical per-frame shifts onto the fitted trajectory of the middle
    /// sample position.
    pub trajectory_shifts: ShiftTable,
    /// Fitted axis offset `r` at each sample position, relative to the frame
    /// center row.
    pub axis_offsets: Vec<f64>,
    pub positions: Vec<usize>,
    /// Number of measurements taken.
    pub iterations: usize,
}

/// Three columns at a quarter, half and three quarters of the width.
pub fn default_sample_positions(width: usize) -> Vec<usize> {
    let last = width.saturating_sub(1);
    vec![(width / 4).min(last), (width / 2).min(last), (3 * width / 4).min(last)]
}

/// Centroid (relative to the center row) of column `col` in every frame.
fn column_centroids(stack: &ImageStack, col: usize) -> Result<Vec<f64>> {
    (0..stack.frame_count())
        .map(|k| {
            centered_centroid(stack.column(k, col))
                .map(|(centroid, _)| centroid)
                .ok_or_else(|| {
                    AlignError::estimation(format!("column {} of frame {} has zero total intensity", col, k))
                })
        })
        .collect()
}

fn fit_trajectory(thetas: &[f64], centroids: &[f64]) -> Result<[f64; 3]> {
    let fit = curve_fit(&TiltTrajectory, thetas, centroids, &[0.0, 0.0, 0.0], &FitOptions::default())?;
    Ok([fit.params[0], fit.params[1], fit.params[2]])
}

/// Rotation and offset of the axis measured at `positions`.
fn measure_axis(stack: &ImageStack, positions: &[usize], thetas: &[f64]) -> Result<(TiltAxisEstimate, Vec<f64>)> {
    let (_, cols) = stack.frame_shape();
    let center_col = (cols as f64 - 1.0) / 2.0;

    let mut offsets = Vec::with_capacity(positions.len());
    for &col in positions {
        let centroids = column_centroids(stack, col)?;
        let params = fit_trajectory(thetas, &centroids)?;
        debug!(
            target: "tomo_align::tilt",
            column = col,
            r = params[0],
            a = params[1],
            b = params[2],
            "Centroid trajectory fitted"
        );
        offsets.push(params[0]);
    }

    let xs: Vec<f64> = positions.iter().map(|&p| p as f64 - center_col).collect();
    let (slope, intercept) = fit_line(&xs, &offsets)?;
    let axis_angle = slope.atan();
    let estimate = TiltAxisEstimate {
        rotation: -axis_angle.to_degrees(),
        x_shift: 0.0,
        y_shift: -intercept * axis_angle.cos(),
    };
    Ok((estimate, offsets))
}

fn validate_positions(positions: &[usize], width: usize) -> Result<Vec<usize>> {
    let mut sorted = positions.to_vec();
    sorted.sort_unstable();
    sorted.dedup();
    if sorted.len() < 2 {
        return Err(AlignError::invalid(
            "center-of-mass tilt alignment needs at least 2 distinct sample positions",
        ));
    }
    if let Some(bad) = sorted.iter().find(|&&p| p >= width) {
        return Err(AlignError::invalid(format!(
            "sample position {} outside frame width {}",
            bad, width
        )));
    }
    Ok(sorted)
}

/// Fit centroid trajectories at the sample positions and derive the axis
/// rotation and offset.
pub fn estimate_tilt_com(stack: &ImageStack, config: &ComTiltConfig) -> Result<ComTiltEstimate> {
    let (_, cols) = stack.frame_shape();
    let positions = match &config.positions {
        Some(positions) => validate_positions(positions, cols)?,
        None => validate_positions(&default_sample_positions(cols), cols)?,
    };
    if config.iterative && config.max_iterations == 0 {
        return Err(AlignError::invalid("iterative tilt alignment needs max_iterations >= 1"));
    }
    let thetas: Vec<f64> = stack
        .require_angles("center-of-mass tilt alignment")?
        .iter()
        .map(|a| a.to_radians())
        .collect();

    // trajectory of the middle position
    let middle = positions[positions.len() / 2];
    let centroids = column_centroids(stack, middle)?;
    let params = fit_trajectory(&thetas, &centroids)?;
    let trajectory_shifts = ShiftTable::new(
        thetas
            .iter()
            .zip(&centroids)
            .map(|(&theta, &com)| (0.0, TiltTrajectory.value(theta, &params) - com))
            .collect(),
    );

    let (first, axis_offsets) = measure_axis(stack, &positions, &thetas)?;
    let center = frame_center(stack.frame_shape());
    let mut total = AffineTransform::rotate_translate(center, first.rotation, first.x_shift, first.y_shift);
    let mut iterations = 1;

    if config.iterative {
        let shifted = stack.map_frames(|i, frame| {
            let (dx, dy) = trajectory_shifts[i];
            ImageTransformer::translate_nearest(frame, dx, dy)
        })?;
        loop {
            if iterations >= config.max_iterations {
                warn!(
                    target: "tomo_align::tilt",
                    iterations = iterations,
                    "Tilt-axis refinement did not settle"
                );
                return Err(AlignError::estimation(format!(
                    "tilt-axis refinement did not converge within {} iterations",
                    config.max_iterations
                )));
            }
            let current = shifted.try_map_frames(|_, frame| ImageTransformer::warp_affine(frame, &total))?;
            let (step, _) = measure_axis(&current, &positions, &thetas)?;
            iterations += 1;
            total = AffineTransform::rotate_translate(center, step.rotation, step.x_shift, step.y_shift)
                .then_after(&total);
            debug!(
                target: "tomo_align::tilt",
                iteration = iterations,
                residual_rotation = step.rotation,
                residual_shift = step.y_shift,
                "Tilt-axis residual measured"
            );
            if step.rotation.abs() < config.rotation_tolerance && step.y_shift.abs() < config.shift_tolerance {
                break;
            }
        }
    }

    let (rotation, x_shift, y_shift) = total.as_rotate_translate(center);
    Ok(ComTiltEstimate {
        estimate: TiltAxisEstimate {
            rotation,
            x_shift,
            y_shift,
        },
        trajectory_shifts,
        axis_offsets,
        positions,
        iterations,
    })
}

/// Center-of-mass tilt alignment: shift frames onto the middle position's
/// trajectory, then level, center and transpose.
pub fn tilt_com(stack: &ImageStack, config: &ComTiltConfig) -> Result<ImageStack> {
    let span = StageSpan::new("tilt_com");
    let _guard = span.enter();

    let result = estimate_tilt_com(stack, config)?;
    info!(
        target: "tomo_align::tilt",
        rotation = format!("{:.2}", result.estimate.rotation),
        shift = format!("{:.2}", result.estimate.y_shift),
        iterations = result.iterations,
        "Calculated tilt-axis correction"
    );
    let shifted = apply_trajectory_shifts(stack, &result.trajectory_shifts)?;
    let out = apply_tilt_estimate(&shifted, &result.estimate)?;
    span.record_completion(true);
    Ok(out)
}
