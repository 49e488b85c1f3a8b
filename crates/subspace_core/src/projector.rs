//! Projection of full-space updates onto the unstable subspace and the reduced
//! Newton recurrence carried out in basis coordinates.

use crate::basis::KrylovBasis;
use crate::field::SolutionField;
use crate::traits::Collective;
use nalgebra::{DMatrix, DVector};

/// Coordinates of the projected solution in the basis R.
///
/// `current` is `p_R`, `previous` is `pn_R`. `captured_dim` is the basis size at
/// which `previous` was last captured, used to restart the recurrence after growth.
#[derive(Debug, Clone)]
pub struct ReducedCoordinates {
    pub current: DVector<f64>,
    pub previous: DVector<f64>,
    captured_dim: usize,
}

impl Default for ReducedCoordinates {
    fn default() -> Self {
        Self {
            current: DVector::zeros(0),
            previous: DVector::zeros(0),
            captured_dim: 0,
        }
    }
}

impl ReducedCoordinates {
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn dimension(&self) -> usize {
        self.current.len()
    }

    /// `pn_R <- p_R`, `p_R <- R^T raw`, `out <- R p_R`.
    pub fn project(
        &mut self,
        basis: &KrylovBasis,
        raw: &SolutionField,
        owned: usize,
        collective: &dyn Collective,
        out: &mut SolutionField,
    ) {
        std::mem::swap(&mut self.previous, &mut self.current);

        let mut coords: Vec<f64> = basis
            .active()
            .iter()
            .map(|r| r.owned_dot(raw, owned))
            .collect();
        collective.all_reduce_sum(&mut coords);
        self.current = DVector::from_vec(coords);

        reconstruct(basis, &self.current, out);
    }

    /// Discrete Newton step `p_R <- pn_R + N (p_R - pn_R)`.
    ///
    /// The first step after the basis has grown restarts the recurrence from the
    /// fresh projection. Without an operator of matching size the step is the
    /// identity and `false` is returned.
    pub fn newton_step(&mut self, inverse: &DMatrix<f64>) -> bool {
        let dim = self.current.len();
        if dim > self.captured_dim || self.previous.len() != dim {
            self.previous = self.current.clone();
            self.captured_dim = dim;
        }
        if inverse.nrows() != dim || inverse.ncols() != dim {
            return false;
        }
        let increment = &self.current - &self.previous;
        self.current = &self.previous + inverse * increment;
        true
    }
}

/// `out <- R coords`; entries beyond the basis size are ignored.
pub fn reconstruct(basis: &KrylovBasis, coords: &DVector<f64>, out: &mut SolutionField) {
    out.fill(0.0);
    for (vector, &c) in basis.active().iter().zip(coords.iter()) {
        out.axpy(c, vector);
    }
}
