//! Projected Gauss-Seidel reference solver.
//!
//! This is the engine's default [`NcpSolver`] strategy: a projected
//! Gauss-Seidel sweep with successive over-relaxation, per-row box
//! projection and friction-bound coupling through the problem's dependency
//! index. Any other strategy satisfying the trait can be swapped in at
//! composition time.

use nalgebra::{DVector, Vector3};
use tracing::debug;

use rbd_types::{RbdError, Result, SolverSettings};

use crate::assembly::NcpProblem;

/// Outcome of one solver call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SolveReport {
    /// Iterations actually performed.
    pub iterations: usize,
    /// Largest impulse change in the final sweep.
    pub largest_change: f64,
}

/// Strategy interface for NCP solvers.
///
/// The contract is deliberately loose: given the assembled problem and an
/// initial guess, mutate `x` in place to an approximate solution, best
/// effort within the solver's own iteration cap. Callers must not assume
/// convergence.
pub trait NcpSolver: std::fmt::Debug {
    /// Solve the problem, refining `x` in place.
    fn solve(&mut self, problem: &NcpProblem, x: &mut DVector<f64>) -> Result<SolveReport>;
}

/// Projected Gauss-Seidel with SOR and warm starting.
#[derive(Debug, Clone, Default)]
pub struct ProjectedGaussSeidel {
    settings: SolverSettings,
}

impl ProjectedGaussSeidel {
    /// Create a solver with the given settings.
    pub fn new(settings: SolverSettings) -> Result<Self> {
        settings.validate()?;
        Ok(Self { settings })
    }

    /// The solver settings.
    #[must_use]
    pub fn settings(&self) -> &SolverSettings {
        &self.settings
    }
}

impl NcpSolver for ProjectedGaussSeidel {
    fn solve(&mut self, problem: &NcpProblem, x: &mut DVector<f64>) -> Result<SolveReport> {
        let n = problem.row_count();
        if x.len() != n {
            return Err(RbdError::DimensionMismatch {
                expected: n,
                actual: x.len(),
            });
        }
        if n == 0 {
            return Ok(SolveReport {
                iterations: 0,
                largest_change: 0.0,
            });
        }

        if self.settings.warm_starting {
            *x *= self.settings.warm_start_factor;
        } else {
            x.fill(0.0);
        }

        // Precompute W Jᵀ columns and the diagonal of J W Jᵀ + gamma.
        let rows = problem.rows();
        let mut w_lin_a = Vec::with_capacity(n);
        let mut w_ang_a = Vec::with_capacity(n);
        let mut w_lin_b = Vec::with_capacity(n);
        let mut w_ang_b = Vec::with_capacity(n);
        let mut diagonal = Vec::with_capacity(n);
        for row in rows {
            let block_a = problem.block(row.slot_a);
            let block_b = problem.block(row.slot_b);
            let la = row.lin_a * block_a.inv_mass;
            let aa = block_a.inv_inertia * row.ang_a;
            let lb = row.lin_b * block_b.inv_mass;
            let ab = block_b.inv_inertia * row.ang_b;
            diagonal.push(
                row.lin_a.dot(&la) + row.ang_a.dot(&aa) + row.lin_b.dot(&lb)
                    + row.ang_b.dot(&ab)
                    + row.gamma,
            );
            w_lin_a.push(la);
            w_ang_a.push(aa);
            w_lin_b.push(lb);
            w_ang_b.push(ab);
        }

        // Per-slot velocity deltas accumulated from the warm-start guess.
        let slots = problem.bodies().len();
        let mut dv_lin = vec![Vector3::zeros(); slots];
        let mut dv_ang = vec![Vector3::zeros(); slots];
        for (i, row) in rows.iter().enumerate() {
            let impulse = x[i];
            if impulse != 0.0 {
                dv_lin[row.slot_a] += w_lin_a[i] * impulse;
                dv_ang[row.slot_a] += w_ang_a[i] * impulse;
                dv_lin[row.slot_b] += w_lin_b[i] * impulse;
                dv_ang[row.slot_b] += w_ang_b[i] * impulse;
            }
        }

        let mut iterations = 0;
        let mut largest_change = 0.0;
        for iteration in 0..self.settings.max_iterations {
            largest_change = 0.0_f64;
            for (i, row) in rows.iter().enumerate() {
                if diagonal[i] <= f64::EPSILON {
                    // Both bodies immovable; the row cannot produce an
                    // impulse.
                    continue;
                }

                let jv = problem.velocity_term(i)
                    + row.lin_a.dot(&dv_lin[row.slot_a])
                    + row.ang_a.dot(&dv_ang[row.slot_a])
                    + row.lin_b.dot(&dv_lin[row.slot_b])
                    + row.ang_b.dot(&dv_ang[row.slot_b]);
                let residual = jv + row.gamma * x[i] - row.rhs;
                let candidate = x[i] - self.settings.relaxation * residual / diagonal[i];

                // Friction rows scale their box by the coupled normal
                // impulse; everything else has fixed bounds.
                let (lower, upper) = match row.normal_row {
                    Some(normal) => {
                        let limit = x[normal].max(0.0);
                        (row.lower * limit, row.upper * limit)
                    }
                    None => (row.lower, row.upper),
                };

                let projected = candidate.clamp(lower, upper);
                let delta = projected - x[i];
                if delta != 0.0 {
                    x[i] = projected;
                    dv_lin[row.slot_a] += w_lin_a[i] * delta;
                    dv_ang[row.slot_a] += w_ang_a[i] * delta;
                    dv_lin[row.slot_b] += w_lin_b[i] * delta;
                    dv_ang[row.slot_b] += w_ang_b[i] * delta;
                    largest_change = largest_change.max(delta.abs());
                }
            }

            iterations = iteration + 1;
            if iterations >= self.settings.min_iterations
                && largest_change < self.settings.tolerance
            {
                break;
            }
        }

        debug!(iterations, largest_change, "projected Gauss-Seidel finished");
        Ok(SolveReport {
            iterations,
            largest_change,
        })
    }
}
