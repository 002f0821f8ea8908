use crate::data::stack::ImageStack;
use crate::data::transformer::{frame_center, AffineTransform, ImageTransformer};
use crate::error::AlignError;
use crate::logging::StageSpan;
use crate::optimize::{DifferentialEvolution, DifferentialEvolutionConfig};
use crate::tilt::reconstruction::{ReconAlgorithm, ReconstructionBackend};
use crate::tilt::{apply_tilt_estimate, TiltAxisEstimate};
use crate::Result;
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MinimizeConfig {
    /// Search range of the axis offset, in pixels.
    pub shift_bounds: (f64, f64),
    /// Search range of the axis rotation, in degrees.
    pub rotation_bounds: (f64, f64),
    /// Relative tolerance on the spread of population residuals.
    pub tolerance: f64,
    /// Columns whose sinograms enter the residual; the middle column ±10
    /// when unset.
    pub columns: Option<Vec<usize>>,
    pub use_accelerator: bool,
    /// SIRT iterations per evaluation; 5 on the CPU, 50 with an accelerator
    /// when unset.
    pub sirt_iterations: Option<usize>,
    pub max_generations: usize,
    pub seed: Option<u64>,
}

impl Default for MinimizeConfig {
    fn default() -> Self {
        Self {
            shift_bounds: (-30.0, 30.0),
            rotation_bounds: (-5.0, 5.0),
            tolerance: 0.5,
            columns: None,
            use_accelerator: false,
            sirt_iterations: None,
            max_generations: 1000,
            seed: None,
        }
    }
}

impl MinimizeConfig {
    pub fn iterations(&self) -> usize {
        self.sirt_iterations
            .unwrap_or(if self.use_accelerator { 50 } else { 5 })
    }

    fn resolve_columns(&self, width: usize) -> Result<Vec<usize>> {
        let columns = match &self.columns {
            Some(columns) => columns.clone(),
            None => {
                let middle = width / 2;
                if middle < 10 || middle + 10 >= width {
                    return Err(AlignError::invalid(format!(
                        "frames {} pixels wide are too narrow for the default columns; set them explicitly",
                        width
                    )));
                }
                vec![middle - 10, middle + 10]
            }
        };
        if columns.is_empty() {
            return Err(AlignError::invalid("residual minimization needs at least one column"));
        }
        if let Some(bad) = columns.iter().find(|&&c| c >= width) {
            return Err(AlignError::invalid(format!("column {} outside frame width {}", bad, width)));
        }
        Ok(columns)
    }
}

/// Best candidate of one generation, as seen by the observer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MinimizeProgress {
    pub generation: usize,
    pub shift: f64,
    pub rotation: f64,
    pub residual: f64,
}

/// Sinograms of `columns` after leveling the stack with `transform`,
/// sampled directly through the inverse transform.
fn leveled_sinograms(stack: &ImageStack, inverse: &AffineTransform, columns: &[usize]) -> Vec<Array2<f32>> {
    let (rows, _) = stack.frame_shape();
    columns
        .iter()
        .map(|&col| {
            Array2::from_shape_fn((stack.frame_count(), rows), |(k, y)| {
                let (src_x, src_y) = inverse.apply(col as f64, y as f64);
                ImageTransformer::bilinear_interpolate(stack.frame(k), src_x, src_y).unwrap_or(0.0)
            })
        })
        .collect()
}

/// Summed absolute difference between each sinogram and the re-projection
/// of its reconstruction.
fn reprojection_residual(
    backend: &dyn ReconstructionBackend,
    sinograms: &[Array2<f32>],
    angles: &[f64],
    iterations: usize,
    use_accelerator: bool,
) -> Result<f64> {
    let mut residual = 0.0;
    for sinogram in sinograms {
        let slice = backend
            .reconstruct(sinogram.view(), angles, ReconAlgorithm::Sirt, iterations, use_accelerator)
            .map_err(|e| AlignError::estimation(format!("reconstruction failed: {:#}", e)))?;
        let projected = backend
            .project(slice.view(), angles, use_accelerator)
            .map_err(|e| AlignError::estimation(format!("re-projection failed: {:#}", e)))?;
        if projected.dim() != sinogram.dim() {
            return Err(AlignError::estimation(format!(
                "backend returned a {:?} projection for a {:?} sinogram",
                projected.dim(),
                sinogram.dim()
            )));
        }
        residual += projected
            .iter()
            .zip(sinogram.iter())
            .map(|(p, s)| (*p as f64 - *s as f64).abs())
            .sum::<f64>();
    }
    Ok(residual)
}

/// Search the axis offset and rotation that minimize the reconstruction
/// residual of the sampled sinograms.
pub fn estimate_tilt_minimize<O>(
    stack: &ImageStack,
    backend: &dyn ReconstructionBackend,
    config: &MinimizeConfig,
    mut observer: O,
) -> Result<TiltAxisEstimate>
where
    O: FnMut(&MinimizeProgress),
{
    let angles = stack.require_angles("residual minimization")?;
    let (_, cols) = stack.frame_shape();
    let columns = config.resolve_columns(cols)?;
    let iterations = config.iterations();
    let center = frame_center(stack.frame_shape());

    let search = DifferentialEvolution::new(
        vec![config.shift_bounds, config.rotation_bounds],
        DifferentialEvolutionConfig {
            tolerance: config.tolerance,
            max_generations: config.max_generations,
            seed: config.seed,
            ..Default::default()
        },
    )?;

    let result = search.minimize(
        |x| {
            let inverse = AffineTransform::rotate_translate(center, x[1], 0.0, x[0])
                .inverse()
                .ok_or_else(|| AlignError::estimation("candidate transform is not invertible"))?;
            let sinograms = leveled_sinograms(stack, &inverse, &columns);
            reprojection_residual(backend, &sinograms, angles, iterations, config.use_accelerator)
        },
        |generation| {
            let progress = MinimizeProgress {
                generation: generation.index,
                shift: generation.best[0],
                rotation: generation.best[1],
                residual: generation.best_energy,
            };
            debug!(
                target: "tomo_align::tilt",
                generation = progress.generation,
                shift = progress.shift,
                rotation = progress.rotation,
                residual = progress.residual,
                "Minimization generation"
            );
            observer(&progress);
        },
    )?;

    info!(
        target: "tomo_align::tilt",
        shift = format!("{:.2}", result.x[0]),
        rotation = format!("{:.2}", result.x[1]),
        residual = result.energy,
        generations = result.generations,
        converged = result.converged,
        "Residual minimization finished"
    );
    Ok(TiltAxisEstimate {
        rotation: result.x[1],
        x_shift: 0.0,
        y_shift: result.x[0],
    })
}

/// Residual-minimization tilt alignment: level, center and transpose with
/// the best (shift, rotation) found.
pub fn tilt_minimize<O>(
    stack: &ImageStack,
    backend: &dyn ReconstructionBackend,
    config: &MinimizeConfig,
    observer: O,
) -> Result<ImageStack>
where
    O: FnMut(&MinimizeProgress),
{
    let span = StageSpan::new("tilt_minimize");
    let _guard = span.enter();

    let estimate = estimate_tilt_minimize(stack, backend, config, observer)?;
    let out = apply_tilt_estimate(stack, &estimate)?;
    span.record_completion(true);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::synthetic::{tilt_range, RodPhantom};
    use ndarray::ArrayView2;
    use std::sync::Mutex;

    /// Reconstruction is the identity; re-projection returns the sinograms
    /// of a perfectly aligned series, cycling in column order.
    struct ReferenceBackend {
        references: Vec<Array2<f32>>,
        calls: Mutex<usize>,
    }

    impl ReferenceBackend {
        fn new(stack: &ImageStack, columns: &[usize]) -> Self {
            Self {
                references: columns.iter().map(|&c| stack.sinogram(c).unwrap()).collect(),
                calls: Mutex::new(0),
            }
        }
    }

    impl ReconstructionBackend for ReferenceBackend {
        fn reconstruct(
            &self,
            sinogram: ArrayView2<f32>,
            _angles: &[f64],
            algorithm: ReconAlgorithm,
            _iterations: usize,
            _use_accelerator: bool,
        ) -> anyhow::Result<Array2<f32>> {
            assert_eq!(algorithm, ReconAlgorithm::Sirt);
            Ok(sinogram.to_owned())
        }

        fn project(&self, _slice: ArrayView2<f32>, _angles: &[f64], _use_accelerator: bool) -> anyhow::Result<Array2<f32>> {
            let mut calls = self.calls.lock().unwrap();
            let reference = self.references[*calls % self.references.len()].clone();
            *calls += 1;
            Ok(reference)
        }
    }

    struct FailingBackend;

    impl ReconstructionBackend for FailingBackend {
        fn reconstruct(
            &self,
            _sinogram: ArrayView2<f32>,
            _angles: &[f64],
            _algorithm: ReconAlgorithm,
            _iterations: usize,
            _use_accelerator: bool,
        ) -> anyhow::Result<Array2<f32>> {
            anyhow::bail!("no device")
        }

        fn project(&self, _slice: ArrayView2<f32>, _angles: &[f64], _use_accelerator: bool) -> anyhow::Result<Array2<f32>> {
            anyhow::bail!("no device")
        }
    }

    fn series(rotation: f64, offset: f64) -> ImageStack {
        RodPhantom::default()
            .project((64, 64), &tilt_range(-45.0, 45.0, 7), rotation, offset)
            .unwrap()
    }

    fn test_config(columns: Vec<usize>) -> MinimizeConfig {
        MinimizeConfig {
            shift_bounds: (-10.0, 10.0),
            tolerance: 0.01,
            columns: Some(columns),
            max_generations: 300,
            seed: Some(3),
            ..Default::default()
        }
    }

    #[test]
    fn test_iteration_defaults() {
        let mut config = MinimizeConfig::default();
        assert_eq!(config.iterations(), 5);
        config.use_accelerator = true;
        assert_eq!(config.iterations(), 50);
        config.sirt_iterations = Some(12);
        assert_eq!(config.iterations(), 12);
    }

    #[test]
    fn test_default_columns() {
        let config = MinimizeConfig::default();
        assert_eq!(config.resolve_columns(64).unwrap(), vec![22, 42]);
        assert!(config.resolve_columns(16).is_err());
    }

    #[test]
    fn test_recovers_rotation_and_offset() {
        let columns = vec![12, 52];
        let backend = ReferenceBackend::new(&series(0.0, 0.0), &columns);
        let mut observed = Vec::new();
        let estimate = estimate_tilt_minimize(&series(2.0, 3.0), &backend, &test_config(columns), |p| {
            observed.push(*p)
        })
        .unwrap();
        assert!((estimate.rotation + 2.0).abs() < 0.5, "{:?}", estimate);
        assert!((estimate.y_shift + 3.0).abs() < 1.0, "{:?}", estimate);
        assert!(!observed.is_empty());
        assert!(observed.windows(2).all(|w| w[1].residual <= w[0].residual));
    }

    #[test]
    fn test_backend_failure_is_estimation_failure() {
        let result = estimate_tilt_minimize(&series(0.0, 0.0), &FailingBackend, &test_config(vec![20, 40]), |_| {});
        assert!(matches!(result, Err(AlignError::EstimationFailure(_))));
    }

    #[test]
    fn test_requires_angles() {
        let stack = ImageStack::new(series(0.0, 0.0).data().clone(), None).unwrap();
        let result = estimate_tilt_minimize(&stack, &FailingBackend, &test_config(vec![20, 40]), |_| {});
        assert!(matches!(result, Err(AlignError::InvalidParameter(_))));
    }
}
