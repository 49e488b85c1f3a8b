use crate::corrector::NewtonUpdateOnSubspace;
use crate::field::FieldLayout;
use crate::jacobian::TapeIndices;
use crate::settings::SubspaceSettings;
use crate::traits::AdjointOracle;
use anyhow::{bail, Context, Result};
use log::warn;
use serde::{Deserialize, Serialize};

/// Fixed-point map u <- G(u) together with its differentiation tape.
pub trait FixedPointProblem {
    fn layout(&self) -> FieldLayout;

    /// Evaluates G(state) into `out` and records the tape used by [`oracle`](Self::oracle).
    fn apply(&mut self, state: &[f64], out: &mut [f64]) -> Result<()>;

    /// Adjoint of G linearised at the latest evaluation.
    fn oracle(&mut self) -> &mut dyn AdjointOracle;

    fn tape_indices(&self) -> TapeIndices {
        TapeIndices::identity(self.layout().len())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DriverSettings {
    pub max_steps: usize,
    pub tolerance: f64,
}

impl Default for DriverSettings {
    fn default() -> Self {
        Self {
            max_steps: 200,
            tolerance: 1e-10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixedPointResult {
    pub state: Vec<f64>,
    pub iterations: usize,
    pub step_norm: f64,
    pub basis_dimension: usize,
}

/// Iterates `problem` from `initial_guess`, correcting each update on the
/// detected unstable subspace.
pub fn solve_fixed_point<P: FixedPointProblem>(
    problem: &mut P,
    initial_guess: &[f64],
    settings: SubspaceSettings,
    driver: DriverSettings,
) -> Result<FixedPointResult> {
    let layout = problem.layout();
    let dim = layout.len();
    if dim == 0 {
        bail!("Fixed-point problem has zero dimension.");
    }
    if initial_guess.len() != dim {
        bail!(
            "Initial guess dimension mismatch. Expected {}, got {}.",
            dim,
            initial_guess.len()
        );
    }
    if driver.max_steps == 0 {
        bail!("max_steps must be greater than zero.");
    }
    if driver.tolerance <= 0.0 {
        bail!("tolerance must be positive.");
    }

    let mut accelerator = NewtonUpdateOnSubspace::from_settings(&settings, layout)
        .context("Failed to set up the subspace accelerator.")?;
    let indices = problem.tape_indices();

    let mut state = initial_guess.to_vec();
    let mut raw = vec![0.0; dim];
    let mut iterations = 0usize;

    loop {
        if iterations >= driver.max_steps {
            bail!(
                "Fixed-point iteration failed to converge in {} steps.",
                driver.max_steps
            );
        }

        problem
            .apply(&state, &mut raw)
            .with_context(|| format!("Failed to evaluate G at iteration {iterations}."))?;
        accelerator.load(&raw)?;
        let corrected = accelerator.compute();
        let step_norm = l2_distance(corrected.as_slice(), &state);
        if !step_norm.is_finite() {
            bail!("Fixed-point iteration diverged at iteration {}.", iterations);
        }
        state.copy_from_slice(corrected.as_slice());
        iterations += 1;

        if accelerator.check_basis(settings.krylov_criterion) {
            if let Err(err) = accelerator.compute_projected_jacobian(0, &indices, problem.oracle()) {
                warn!("Keeping the plain update on the subspace: {err}");
            }
        }

        if step_norm <= driver.tolerance {
            return Ok(FixedPointResult {
                state,
                iterations,
                step_norm,
                basis_dimension: accelerator.basis_len(),
            });
        }
    }
}

fn l2_distance(a: &[f64], b: &[f64]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f64>()
        .sqrt()
}
