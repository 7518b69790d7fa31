//! Levenberg–Marquardt least squares for smooth curve models.
//!
//! The solver minimises `Σ (yᵢ − f(tᵢ; p))²` using an analytic Jacobian
//! supplied by the model and Marquardt's diagonal scaling of the damping term.
//! Every trial step costs one model evaluation; the run fails once the
//! evaluation budget is spent.

use log::debug;
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

use crate::math::matrix::MatrixHelper;
use crate::prelude::{StageError, StageResult};

const DIAGONAL_FLOOR: f64 = 1e-12;
const MIN_DAMPING: f64 = 1e-15;
const MAX_DAMPING: f64 = 1e20;

/// A parametric curve `f(t; p)` with an analytic gradient.
pub trait CurveModel {
    fn parameter_count(&self) -> usize;

    fn value(&self, t: f64, params: &[f64]) -> f64;

    /// Writes `∂f/∂pₖ` at `t` into `out[k]`.
    fn gradient(&self, t: f64, params: &[f64], out: &mut [f64]);
}

/// Solver settings.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LevenbergMarquardt {
    pub max_evaluations: usize,
    /// Relative cost reduction below which an accepted step ends the run.
    pub ftol: f64,
    /// Relative step length below which an accepted step ends the run.
    pub xtol: f64,
    /// Gradient magnitude, relative to the residual norm, treated as stationary.
    pub gtol: f64,
    pub initial_damping: f64,
}

impl Default for LevenbergMarquardt {
    fn default() -> Self {
        Self {
            max_evaluations: 500_000,
            ftol: 1e-15,
            xtol: 1e-15,
            gtol: 1e-15,
            initial_damping: 1e-3,
        }
    }
}

/// Parameters where the solver stopped.
#[derive(Debug, Clone, PartialEq)]
pub struct Solution {
    pub params: Vec<f64>,
    /// Sum of squared residuals at `params`.
    pub cost: f64,
    pub evaluations: usize,
    pub iterations: usize,
}

impl LevenbergMarquardt {
    pub fn minimize<M: CurveModel>(
        &self,
        model: &M,
        t: &[f64],
        y: &[f64],
        initial: &[f64],
    ) -> StageResult<Solution> {
        let n = t.len();
        let p = model.parameter_count();
        if initial.len() != p {
            return Err(StageError::InvalidInput(format!(
                "model takes {} parameters, {} given",
                p,
                initial.len()
            )));
        }
        if y.len() != n {
            return Err(StageError::InvalidInput(format!(
                "{} observations for {} abscissae",
                y.len(),
                n
            )));
        }
        if n < p {
            return Err(StageError::InputTooShort {
                needed: p,
                available: n,
            });
        }

        let mut params = Array1::from(initial.to_vec());
        let mut residual = residuals(model, t, y, &params).ok_or_else(|| {
            StageError::InvalidInput("initial guess evaluates to non-finite values".into())
        })?;
        let mut cost = residual.dot(&residual);
        let mut evaluations = 1;
        let mut iterations = 0;
        let mut damping = self.initial_damping;
        let mut jacobian = Array2::<f64>::zeros((n, p));
        let mut row = vec![0.0; p];

        loop {
            iterations += 1;
            for (i, &ti) in t.iter().enumerate() {
                model.gradient(ti, params.as_slice().unwrap_or(&[]), &mut row);
                for (k, &value) in row.iter().enumerate() {
                    jacobian[[i, k]] = value;
                }
            }
            let gram = MatrixHelper::gram(jacobian.view());
            let gradient = MatrixHelper::project(jacobian.view(), residual.view());
            let steepest = gradient.iter().fold(0.0_f64, |acc, g| acc.max(g.abs()));

            if cost == 0.0 || steepest <= self.gtol * cost.sqrt() {
                debug!("LM stationary after {} evaluations, cost {:e}", evaluations, cost);
                return Ok(self.solution(params, cost, evaluations, iterations));
            }

            loop {
                let mut damped = gram.clone();
                for k in 0..p {
                    damped[[k, k]] += damping * gram[[k, k]].max(DIAGONAL_FLOOR);
                }

                let trial = MatrixHelper::solve(damped.view(), gradient.view()).map(|step| {
                    let candidate = &params + &step;
                    (step, candidate)
                });

                if let Some((step, candidate)) = trial {
                    evaluations += 1;
                    if evaluations > self.max_evaluations {
                        return Err(StageError::FitNonConvergence {
                            evaluations: self.max_evaluations,
                        });
                    }

                    let accepted = if candidate.iter().all(|v| v.is_finite()) {
                        residuals(model, t, y, &candidate)
                            .map(|r| {
                                let trial_cost = r.dot(&r);
                                (r, trial_cost)
                            })
                            .filter(|(_, trial_cost)| trial_cost.is_finite() && *trial_cost < cost)
                    } else {
                        None
                    };

                    if let Some((trial_residual, trial_cost)) = accepted {
                        damping = (damping / 10.0).max(MIN_DAMPING);
                        let step_norm = step.dot(&step).sqrt();
                        let param_norm = params.dot(&params).sqrt();
                        let small_step = step_norm <= self.xtol * (param_norm + self.xtol);
                        let small_gain = cost - trial_cost <= self.ftol * cost;

                        params = candidate;
                        residual = trial_residual;
                        cost = trial_cost;

                        if small_step || small_gain {
                            debug!("LM converged after {} evaluations, cost {:e}", evaluations, cost);
                            return Ok(self.solution(params, cost, evaluations, iterations));
                        }
                        break;
                    }
                }

                damping *= 10.0;
                if damping > MAX_DAMPING {
                    debug!("LM stalled after {} evaluations, cost {:e}", evaluations, cost);
                    return Ok(self.solution(params, cost, evaluations, iterations));
                }
            }
        }
    }

    fn solution(
        &self,
        params: Array1<f64>,
        cost: f64,
        evaluations: usize,
        iterations: usize,
    ) -> Solution {
        Solution {
            params: params.to_vec(),
            cost,
            evaluations,
            iterations,
        }
    }
}

/// `y − f(t; params)`, or `None` when the model overflows.
fn residuals<M: CurveModel>(model: &M, t: &[f64], y: &[f64], params: &Array1<f64>) -> Option<Array1<f64>> {
    let params = params.as_slice()?;
    let residual: Array1<f64> = t
        .iter()
        .zip(y)
        .map(|(&ti, &yi)| yi - model.value(ti, params))
        .collect();
    if residual.iter().all(|v| v.is_finite()) {
        Some(residual)
    } else {
        None
    }
}
