use crate::algorithms::{
    estimate_com_shifts, estimate_relative_shifts, CenterOfMassConfig, Ecc, PairwiseEstimator, PhaseCorrelation,
    PhaseCorrelationConfig, RigidRegistration, ShiftMethod,
};
use crate::alignment::apply::{apply_shifts, apply_transforms, check_uncorrected};
use crate::alignment::compose::compose_shifts;
use crate::alignment::progress::ProgressReporter;
use crate::alignment::record::ShiftTable;
use crate::data::stack::ImageStack;
use crate::error::AlignError;
use crate::logging::{get_correlation_id, new_correlation_id, StageSpan};
use crate::Result;
use ndarray::Axis;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

/// Per-method settings used by [`AlignmentOrchestrator`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AlignOptions {
    /// Anchor frame of the composition; nearest-zero tilt when unset.
    pub pivot: Option<usize>,
    pub phase_correlation: PhaseCorrelationConfig,
    pub ecc: Ecc,
    pub center_of_mass: CenterOfMassConfig,
    pub rigid: RigidRegistration,
}

/// Summary of one orchestrated alignment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlignmentReport {
    pub method: ShiftMethod,
    /// `None` for methods that estimate absolute shifts directly.
    pub pivot: Option<usize>,
    pub frames: usize,
    pub max_shift: f64,
    pub elapsed_ms: f64,
    pub correlation_id: Uuid,
}

/// Dispatches a shift method, composes and applies its result and records
/// the correction on the output stack.
#[derive(Debug, Clone, Default)]
pub struct AlignmentOrchestrator {
    options: AlignOptions,
}

impl AlignmentOrchestrator {
    pub fn new(options: AlignOptions) -> Self {
        Self { options }
    }

    pub fn with_pivot(mut self, pivot: usize) -> Self {
        self.options.pivot = Some(pivot);
        self
    }

    pub fn options(&self) -> &AlignOptions {
        &self.options
    }

    fn pairwise_estimator(&self, method: ShiftMethod) -> Option<Box<dyn PairwiseEstimator>> {
        match method {
            ShiftMethod::PhaseCorrelation => Some(Box::new(PhaseCorrelation::with_config(
                self.options.phase_correlation.clone(),
            ))),
            ShiftMethod::Ecc => Some(Box::new(self.options.ecc.clone())),
            ShiftMethod::StackReg => Some(Box::new(self.options.rigid.clone())),
            ShiftMethod::CenterOfMass => None,
        }
    }

    /// Absolute shifts for `stack` and the pivot they are anchored at.
    pub fn estimate(
        &self,
        stack: &ImageStack,
        method: ShiftMethod,
        progress: &mut ProgressReporter,
    ) -> Result<(ShiftTable, Option<usize>)> {
        match self.pairwise_estimator(method) {
            Some(estimator) => {
                let pivot = self.options.pivot.unwrap_or_else(|| stack.default_pivot());
                let relative = estimate_relative_shifts(stack, estimator.as_ref(), pivot, progress)?;
                Ok((compose_shifts(&relative, pivot)?, Some(pivot)))
            }
            None => {
                let absolute = estimate_com_shifts(stack, &self.options.center_of_mass)?;
                progress.report("center_of_mass", 1, 1);
                Ok((absolute, None))
            }
        }
    }

    /// Estimate, compose and apply `method`; the returned stack carries the
    /// record of the correction. `stack` must not be corrected already.
    pub fn align(
        &self,
        stack: &ImageStack,
        method: ShiftMethod,
        progress: &mut ProgressReporter,
    ) -> Result<(ImageStack, AlignmentReport)> {
        check_uncorrected(stack)?;
        let correlation_id = get_correlation_id().unwrap_or_else(new_correlation_id);
        let span = StageSpan::new("shift_alignment");
        let _guard = span.enter();

        info!(
            target: "tomo_align::orchestrator",
            method = %method,
            frames = stack.frame_count(),
            correlation_id = %correlation_id,
            "Starting shift alignment"
        );

        let outcome = self.estimate(stack, method, progress).and_then(|(absolute, pivot)| {
            let mut aligned = if method.uses_affine_application() {
                apply_transforms(stack, &absolute.to_transforms())?
            } else {
                apply_shifts(stack, &absolute)?
            };
            let mut record = aligned.take_alignment().unwrap_or_default();
            record.method = Some(method.as_str().to_string());
            record.pivot = pivot;
            aligned.set_alignment(record);
            Ok((aligned, absolute, pivot))
        });

        let (aligned, absolute, pivot) = match outcome {
            Ok(result) => result,
            Err(e) => {
                span.record_completion(false);
                return Err(e);
            }
        };
        let elapsed_ms = span.record_completion(true);

        let report = AlignmentReport {
            method,
            pivot,
            frames: stack.frame_count(),
            max_shift: absolute.max_magnitude(),
            elapsed_ms,
            correlation_id,
        };
        info!(
            target: "tomo_align::orchestrator",
            method = %method,
            max_shift = format!("{:.2}", report.max_shift),
            elapsed_ms = format!("{:.1}", elapsed_ms),
            "Shift alignment finished"
        );
        Ok((aligned, report))
    }
}

/// Align a stack with default options for `method`.
pub fn align_stack(stack: &ImageStack, method: ShiftMethod) -> Result<ImageStack> {
    AlignmentOrchestrator::default()
        .align(stack, method, &mut ProgressReporter::silent())
        .map(|(aligned, _)| aligned)
}

/// Collapse a multi-frame acquisition to one frame per tilt.
///
/// `series[k]` holds the sub-frames recorded at tilt `k`; they are aligned
/// with `method` and averaged.
pub fn register_frame_series(
    series: &[ImageStack],
    angles: Option<Vec<f64>>,
    method: ShiftMethod,
    orchestrator: &AlignmentOrchestrator,
) -> Result<ImageStack> {
    if series.is_empty() {
        return Err(AlignError::invalid("frame series is empty"));
    }
    let shape = series[0].frame_shape();
    if let Some(sub) = series.iter().find(|sub| sub.frame_shape() != shape) {
        return Err(AlignError::mismatch("sub-frame shape", shape, sub.frame_shape()));
    }
    let mut frames = Vec::with_capacity(series.len());
    for (k, sub) in series.iter().enumerate() {
        let averaged = if sub.frame_count() == 1 {
            sub.frame(0).to_owned()
        } else {
            let (aligned, report) = orchestrator.align(sub, method, &mut ProgressReporter::silent())?;
            debug!(
                target: "tomo_align::orchestrator",
                tilt = k,
                sub_frames = sub.frame_count(),
                max_shift = report.max_shift,
                "Sub-frames registered"
            );
            aligned
                .data()
                .mean_axis(Axis(0))
                .ok_or_else(|| AlignError::invalid(format!("tilt {} has no sub-frames", k)))?
        };
        frames.push(averaged);
    }
    ImageStack::from_frames(frames, angles)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::synthetic::{blob_image, translated_series};
    use ndarray::Array3;

    fn shifted_series() -> (ImageStack, Vec<(f64, f64)>) {
        let base = blob_image(64, 64, 6, 21);
        let shifts = vec![(3.0, -2.0), (1.0, 1.0), (0.0, 0.0), (-2.0, 2.0), (4.0, -1.0)];
        let stack = translated_series(&base, &shifts, Some(vec![-20.0, -10.0, 0.0, 10.0, 20.0])).unwrap();
        (stack, shifts)
    }

    #[test]
    fn test_phase_correlation_records_shift_table() {
        let (stack, shifts) = shifted_series();
        let (aligned, report) = AlignmentOrchestrator::default()
            .align(&stack, ShiftMethod::PhaseCorrelation, &mut ProgressReporter::silent())
            .unwrap();
        let record = aligned.alignment().unwrap();
        assert_eq!(record.method.as_deref(), Some("PC"));
        assert_eq!(record.pivot, Some(2));
        let table = record.shifts().unwrap();
        assert_eq!(table[2], (0.0, 0.0));
        for (i, &(dx, dy)) in shifts.iter().enumerate() {
            assert!((table[i].0 + dx).abs() < 0.5, "frame {}: {:?}", i, table[i]);
            assert!((table[i].1 + dy).abs() < 0.5, "frame {}: {:?}", i, table[i]);
        }
        assert_eq!(report.pivot, Some(2));
        assert_eq!(report.frames, 5);
    }

    #[test]
    fn test_ecc_uses_affine_application() {
        let (stack, _) = shifted_series();
        let aligned = align_stack(&stack, ShiftMethod::Ecc).unwrap();
        let record = aligned.alignment().unwrap();
        assert!(record.transforms().is_some());
        assert!(record.shifts().is_none());
    }

    #[test]
    fn test_explicit_pivot_out_of_range() {
        let (stack, _) = shifted_series();
        let result = AlignmentOrchestrator::default()
            .with_pivot(9)
            .align(&stack, ShiftMethod::PhaseCorrelation, &mut ProgressReporter::silent());
        assert!(matches!(result, Err(AlignError::InvalidParameter(_))));
    }

    #[test]
    fn test_progress_counts_pairs() {
        let (stack, _) = shifted_series();
        let mut seen = Vec::new();
        let mut progress = ProgressReporter::new(|u| seen.push(u.completed));
        AlignmentOrchestrator::default()
            .align(&stack, ShiftMethod::PhaseCorrelation, &mut progress)
            .unwrap();
        drop(progress);
        assert_eq!(seen, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_corrected_stack_is_not_realigned() {
        let (stack, _) = shifted_series();
        let orchestrator = AlignmentOrchestrator::default();
        let (aligned, _) = orchestrator
            .align(&stack, ShiftMethod::PhaseCorrelation, &mut ProgressReporter::silent())
            .unwrap();
        assert!(matches!(
            orchestrator.align(&aligned, ShiftMethod::PhaseCorrelation, &mut ProgressReporter::silent()),
            Err(AlignError::InvalidParameter(_))
        ));

        let tilted = crate::alignment::apply_tilt_correction(&stack, 2.0, 0.0, 3.0, true).unwrap();
        assert!(matches!(
            orchestrator.align(&tilted, ShiftMethod::PhaseCorrelation, &mut ProgressReporter::silent()),
            Err(AlignError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_register_frame_series_averages_aligned_subframes() {
        let base = blob_image(48, 48, 4, 8);
        let tilt_a = translated_series(&base, &[(0.0, 0.0), (2.0, 1.0), (-1.0, 0.0)], None).unwrap();
        let tilt_b = translated_series(&base, &[(1.0, -1.0)], None).unwrap();
        let out = register_frame_series(
            &[tilt_a, tilt_b],
            Some(vec![-5.0, 5.0]),
            ShiftMethod::PhaseCorrelation,
            &AlignmentOrchestrator::default().with_pivot(0),
        )
        .unwrap();
        assert_eq!(out.frame_count(), 2);
        assert_eq!(out.angles(), Some(&[-5.0, 5.0][..]));
        // interior pixels of the averaged tilt match the unshifted base
        for y in 8..40 {
            for x in 8..40 {
                assert!((out.frame(0)[[y, x]] - base[[y, x]]).abs() < 1e-3);
            }
        }
    }

    #[test]
    fn test_register_frame_series_rejects_mixed_shapes() {
        let a = ImageStack::new(Array3::zeros((2, 8, 8)), None).unwrap();
        let b = ImageStack::new(Array3::zeros((2, 8, 6)), None).unwrap();
        let result = register_frame_series(&[a, b], None, ShiftMethod::PhaseCorrelation, &AlignmentOrchestrator::default());
        assert!(matches!(result, Err(AlignError::DimensionMismatch { .. })));
    }
}
