use crate::error::AlignError;
use crate::Result;
use nalgebra::{DMatrix, DVector};

/// Parametric model `y = f(x; p)` with an analytic Jacobian.
pub trait CurveModel {
    fn parameter_count(&self) -> usize;

    fn value(&self, x: f64, params: &[f64]) -> f64;

    /// Partial derivatives of `value` with respect to each parameter.
    fn gradient(&self, x: f64, params: &[f64], out: &mut [f64]);
}

/// Center-of-mass trajectory across tilts: `r - A cos θ - B sin θ`
/// with `θ` in radians and parameters `[r, A, B]`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TiltTrajectory;

impl CurveModel for TiltTrajectory {
    fn parameter_count(&self) -> usize {
        3
    }

    fn value(&self, theta: f64, p: &[f64]) -> f64 {
        p[0] - p[1] * theta.cos() - p[2] * theta.sin()
    }

    fn gradient(&self, theta: f64, _p: &[f64], out: &mut [f64]) {
        out[0] = 1.0;
        out[1] = -theta.cos();
        out[2] = -theta.sin();
    }
}

#[derive(Debug, Clone)]
pub struct FitOptions {
    pub max_iterations: usize,
    /// Relative cost decrease below which the fit stops.
    pub cost_tolerance: f64,
    pub initial_damping: f64,
}

impl Default for FitOptions {
    fn default() -> Self {
        Self {
            max_iterations: 200,
            cost_tolerance: 1e-15,
            initial_damping: 1e-3,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FitResult {
    pub params: Vec<f64>,
    /// Sum of squared residuals at `params`.
    pub cost: f64,
    pub iterations: usize,
}

fn sum_squares<M: CurveModel>(model: &M, xs: &[f64], ys: &[f64], params: &[f64]) -> f64 {
    xs.iter()
        .zip(ys)
        .map(|(&x, &y)| {
            let r = y - model.value(x, params);
            r * r
        })
        .sum()
}

/// Levenberg-Marquardt least-squares fit of `model` to `(xs, ys)` from `p0`.
pub fn curve_fit<M: CurveModel>(
    model: &M,
    xs: &[f64],
    ys: &[f64],
    p0: &[f64],
    options: &FitOptions,
) -> Result<FitResult> {
    let n = model.parameter_count();
    if xs.len() != ys.len() {
        return Err(AlignError::mismatch("curve fit sample count", xs.len(), ys.len()));
    }
    if p0.len() != n {
        return Err(AlignError::mismatch("initial parameter count", n, p0.len()));
    }
    if xs.len() < n {
        return Err(AlignError::invalid(format!(
            "curve fit needs at least {} samples, got {}",
            n,
            xs.len()
        )));
    }
    if ys.iter().any(|y| !y.is_finite()) {
        return Err(AlignError::estimation("curve fit data contains non-finite values"));
    }

    let mut params = p0.to_vec();
    let mut cost = sum_squares(model, xs, ys, &params);
    let mut lambda = options.initial_damping;
    let mut row = vec![0.0; n];
    let mut iterations = 0;

    while iterations < options.max_iterations {
        iterations += 1;
        let mut jtj = DMatrix::<f64>::zeros(n, n);
        let mut jtr = DVector::<f64>::zeros(n);
        for (&x, &y) in xs.iter().zip(ys) {
            model.gradient(x, &params, &mut row);
            let r = y - model.value(x, &params);
            for a in 0..n {
                jtr[a] += row[a] * r;
                for b in 0..n {
                    jtj[(a, b)] += row[a] * row[b];
                }
            }
        }

        let mut improved = false;
        while lambda < 1e12 {
            let mut damped = jtj.clone();
            for a in 0..n {
                damped[(a, a)] += lambda * jtj[(a, a)].max(1e-12);
            }
            let Some(step) = damped.lu().solve(&jtr) else {
                lambda *= 10.0;
                continue;
            };
            let candidate: Vec<f64> = params.iter().zip(step.iter()).map(|(p, s)| p + s).collect();
            let candidate_cost = sum_squares(model, xs, ys, &candidate);
            if candidate_cost.is_finite() && candidate_cost <= cost {
                let decrease = cost - candidate_cost;
                params = candidate;
                cost = candidate_cost;
                lambda = (lambda / 10.0).max(1e-12);
                improved = decrease > options.cost_tolerance * cost.max(1e-300);
                break;
            }
            lambda *= 10.0;
        }
        if !improved {
            break;
        }
    }

    if params.iter().any(|p| !p.is_finite()) {
        return Err(AlignError::estimation("curve fit diverged"));
    }
    Ok(FitResult {
        params,
        cost,
        iterations,
    })
}

/// Ordinary least-squares line `y = slope * x + intercept`.
pub fn fit_line(xs: &[f64], ys: &[f64]) -> Result<(f64, f64)> {
    if xs.len() != ys.len() {
        return Err(AlignError::mismatch("line fit sample count", xs.len(), ys.len()));
    }
    if xs.len() < 2 {
        return Err(AlignError::invalid("line fit needs at least 2 samples"));
    }
    let n = xs.len() as f64;
    let mean_x = xs.iter().sum::<f64>() / n;
    let mean_y = ys.iter().sum::<f64>() / n;
    let sxx: f64 = xs.iter().map(|x| (x - mean_x).powi(2)).sum();
    if sxx <= f64::EPSILON * mean_x.abs().max(1.0) {
        return Err(AlignError::invalid("line fit needs at least 2 distinct positions"));
    }
    let sxy: f64 = xs.iter().zip(ys).map(|(x, y)| (x - mean_x) * (y - mean_y)).sum();
    let slope = sxy / sxx;
    Ok((slope, mean_y - slope * mean_x))
}
