use crate::error::AlignError;
use crate::Result;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Settings for [`DifferentialEvolution`] (best1bin strategy).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DifferentialEvolutionConfig {
    /// Population members per dimension.
    pub population_per_dim: usize,
    /// Mutation factor is redrawn from this range every generation.
    pub mutation: (f64, f64),
    pub recombination: f64,
    pub max_generations: usize,
    /// Relative tolerance on the spread of population energies.
    pub tolerance: f64,
    pub absolute_tolerance: f64,
    /// Fixed seed for reproducible runs; `None` draws one from the OS.
    pub seed: Option<u64>,
}

impl Default for DifferentialEvolutionConfig {
    fn default() -> Self {
        Self {
            population_per_dim: 15,
            mutation: (0.5, 1.0),
            recombination: 0.7,
            max_generations: 1000,
            tolerance: 0.01,
            absolute_tolerance: 0.0,
            seed: None,
        }
    }
}

/// Best candidate after one generation, passed to the observer.
#[derive(Debug, Clone, PartialEq)]
pub struct Generation<'a> {
    pub index: usize,
    pub best: &'a [f64],
    pub best_energy: f64,
    /// `tolerance * |mean| / std` of the population energies; the run has
    /// converged once this reaches 1.
    pub convergence: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OptimizationResult {
    pub x: Vec<f64>,
    pub energy: f64,
    pub generations: usize,
    pub evaluations: usize,
    pub converged: bool,
}

/// Bounded global minimizer over a box.
#[derive(Debug, Clone)]
pub struct DifferentialEvolution {
    bounds: Vec<(f64, f64)>,
    config: DifferentialEvolutionConfig,
}

impl DifferentialEvolution {
    pub fn new(bounds: Vec<(f64, f64)>, config: DifferentialEvolutionConfig) -> Result<Self> {
        if bounds.is_empty() {
            return Err(AlignError::invalid("differential evolution needs at least one dimension"));
        }
        if let Some((lo, hi)) = bounds.iter().find(|(lo, hi)| !(lo.is_finite() && hi.is_finite() && lo < hi)) {
            return Err(AlignError::invalid(format!("invalid search bounds ({}, {})", lo, hi)));
        }
        if !(0.0..=1.0).contains(&config.recombination) {
            return Err(AlignError::invalid("recombination must be in [0, 1]"));
        }
        let (m_lo, m_hi) = config.mutation;
        if !(0.0..=2.0).contains(&m_lo) || !(0.0..=2.0).contains(&m_hi) || m_lo > m_hi {
            return Err(AlignError::invalid("mutation range must lie in [0, 2]"));
        }
        if config.tolerance < 0.0 || config.absolute_tolerance < 0.0 {
            return Err(AlignError::invalid("tolerances must be non-negative"));
        }
        Ok(Self { bounds, config })
    }

    pub fn bounds(&self) -> &[(f64, f64)] {
        &self.bounds
    }

    /// Minimize `objective`. Objective errors abort the search; the observer
    /// only sees each generation's best candidate.
    pub fn minimize<F, O>(&self, mut objective: F, mut observer: O) -> Result<OptimizationResult>
    where
        F: FnMut(&[f64]) -> Result<f64>,
        O: FnMut(&Generation<'_>),
    {
        let dims = self.bounds.len();
        let pop_size = (self.config.population_per_dim * dims).max(5);
        let mut rng = match self.config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let mut population: Vec<Vec<f64>> = (0..pop_size)
            .map(|_| self.bounds.iter().map(|&(lo, hi)| rng.gen_range(lo..hi)).collect())
            .collect();
        let mut energies = Vec::with_capacity(pop_size);
        for member in &population {
            energies.push(checked(objective(member)?)?);
        }
        let mut evaluations = pop_size;
        let mut best = argmin(&energies);

        let mut converged = false;
        let mut generation = 0;
        while generation < self.config.max_generations {
            generation += 1;
            let (m_lo, m_hi) = self.config.mutation;
            let scale = if m_hi > m_lo { rng.gen_range(m_lo..m_hi) } else { m_lo };

            for i in 0..pop_size {
                let (r1, r2) = pick_two(&mut rng, pop_size, i, best);
                let forced = rng.gen_range(0..dims);
                let trial: Vec<f64> = (0..dims)
                    .map(|d| {
                        if d == forced || rng.gen::<f64>() < self.config.recombination {
                            let v = population[best][d] + scale * (population[r1][d] - population[r2][d]);
                            let (lo, hi) = self.bounds[d];
                            v.clamp(lo, hi)
                        } else {
                            population[i][d]
                        }
                    })
                    .collect();
                let energy = checked(objective(&trial)?)?;
                evaluations += 1;
                if energy <= energies[i] {
                    population[i] = trial;
                    energies[i] = energy;
                    if energy < energies[best] {
                        best = i;
                    }
                }
            }

            let (mean, std) = mean_std(&energies);
            let convergence = if std > 0.0 {
                self.config.tolerance * mean.abs() / std
            } else {
                f64::INFINITY
            };
            observer(&Generation {
                index: generation,
                best: &population[best],
                best_energy: energies[best],
                convergence,
            });
            debug!(
                generation = generation,
                best_energy = energies[best],
                convergence = convergence,
                "differential evolution generation"
            );

            if std <= self.config.absolute_tolerance + self.config.tolerance * mean.abs() {
                converged = true;
                break;
            }
        }

        Ok(OptimizationResult {
            x: population[best].clone(),
            energy: energies[best],
            generations: generation,
            evaluations,
            converged,
        })
    }
}

fn checked(energy: f64) -> Result<f64> {
    if energy.is_nan() {
        return Err(AlignError::estimation("objective returned NaN"));
    }
    Ok(energy)
}

fn argmin(values: &[f64]) -> usize {
    values
        .iter()
        .enumerate()
        .fold(0, |best, (i, v)| if *v < values[best] { i } else { best })
}

fn mean_std(values: &[f64]) -> (f64, f64) {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, var.sqrt())
}

/// Two distinct member indices, both different from `exclude_a` and `exclude_b`.
fn pick_two(rng: &mut StdRng, size: usize, exclude_a: usize, exclude_b: usize) -> (usize, usize) {
    let mut draw = |taken: &[usize]| loop {
        let candidate = rng.gen_range(0..size);
        if !taken.contains(&candidate) {
            return candidate;
        }
    };
    let r1 = draw(&[exclude_a, exclude_b]);
    let r2 = draw(&[exclude_a, exclude_b, r1]);
    (r1, r2)
}
