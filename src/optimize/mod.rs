//! Numerical optimizers used by the tilt-axis estimators.

pub mod differential_evolution;
pub mod least_squares;

pub use differential_evolution::{
    DifferentialEvolution, DifferentialEvolutionConfig, Generation, OptimizationResult,
};
pub use least_squares::{curve_fit, fit_line, CurveModel, FitOptions, FitResult, TiltTrajectory};
