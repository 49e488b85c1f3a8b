//! Reduced Jacobian of the fixed-point map on the unstable subspace and the
//! inverse of the reduced Newton operator.

use crate::basis::KrylovBasis;
use crate::error::{SubspaceError, SubspaceResult};
use crate::field::FieldLayout;
use crate::traits::{AdjointOracle, Collective};
use log::{debug, info, warn};
use nalgebra::{DMatrix, DVector};

/// Tape positions of every field entry: `input[k]` is where entry `k` of the
/// solution enters G, `output[k]` where entry `k` of G(u) leaves it.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TapeIndices {
    pub input: Vec<usize>,
    pub output: Vec<usize>,
}

impl TapeIndices {
    pub fn new(input: Vec<usize>, output: Vec<usize>) -> Self {
        Self { input, output }
    }

    /// Entry `k` sits at tape position `k` on both sides.
    pub fn identity(len: usize) -> Self {
        Self {
            input: (0..len).collect(),
            output: (0..len).collect(),
        }
    }

    fn validate(&self, len: usize) -> SubspaceResult<()> {
        if self.input.len() != len {
            return Err(SubspaceError::DimensionMismatch {
                what: "input tape index map",
                expected: len,
                actual: self.input.len(),
            });
        }
        if self.output.len() != len {
            return Err(SubspaceError::DimensionMismatch {
                what: "output tape index map",
                expected: len,
                actual: self.output.len(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct ProjectedJacobian {
    /// `J[i, j] = R_i^T (dG/du)^T R_j`
    jacobian: DMatrix<f64>,
    /// `(I - J)^{-1}`
    inverse: DMatrix<f64>,
    /// Column `j` holds `(dG/du)^T R_j`.
    sensitivities: DMatrix<f64>,
}

impl Default for ProjectedJacobian {
    fn default() -> Self {
        Self {
            jacobian: DMatrix::zeros(0, 0),
            inverse: DMatrix::zeros(0, 0),
            sensitivities: DMatrix::zeros(0, 0),
        }
    }
}

impl ProjectedJacobian {
    pub fn jacobian(&self) -> &DMatrix<f64> {
        &self.jacobian
    }

    pub fn inverse(&self) -> &DMatrix<f64> {
        &self.inverse
    }

    /// Columns `(dG/du)^T R_j` as read back from the oracle, one row per solution entry.
    pub fn sensitivities(&self) -> &DMatrix<f64> {
        &self.sensitivities
    }

    /// Rebuilds J and `(I - J)^{-1}` for the current basis, one adjoint sweep per
    /// basis vector.
    ///
    /// A singular or ill-conditioned `I - J` leaves the identity as Newton
    /// operator, which turns the subspace step into the plain fixed-point step.
    pub fn rebuild(
        &mut self,
        basis: &KrylovBasis,
        layout: FieldLayout,
        indices: &TapeIndices,
        oracle: &mut dyn AdjointOracle,
        collective: &dyn Collective,
        max_condition: f64,
    ) -> SubspaceResult<()> {
        let len = layout.len();
        let owned = layout.owned_len();
        indices.validate(len)?;

        let vectors = basis.active();
        let n = vectors.len();
        let mut jacobian = DMatrix::zeros(n, n);
        let mut sensitivities = DMatrix::zeros(len, n);

        for (j, rj) in vectors.iter().enumerate() {
            oracle.clear_derivatives();
            for (&position, &value) in indices.output.iter().zip(rj.as_slice()) {
                oracle.seed_output(position, value);
            }
            oracle.propagate_adjoint();
            for (k, &position) in indices.input.iter().enumerate() {
                sensitivities[(k, j)] = oracle.read_input(position);
            }

            let column = sensitivities.column(j);
            let mut entries: Vec<f64> = vectors
                .iter()
                .map(|ri| {
                    ri.as_slice()[..owned]
                        .iter()
                        .zip(column.iter())
                        .map(|(a, b)| a * b)
                        .sum::<f64>()
                })
                .collect();
            collective.all_reduce_sum(&mut entries);
            for (i, value) in entries.into_iter().enumerate() {
                jacobian[(i, j)] = value;
            }
            debug!("Evaluated R^T (dG/du)^T R[{j}]");
        }

        self.jacobian = jacobian;
        self.sensitivities = sensitivities;

        let operator = DMatrix::identity(n, n) - &self.jacobian;
        match invert_reduced_operator(operator, max_condition) {
            Ok(inverse) => {
                self.inverse = inverse;
                info!("Reduced Newton operator rebuilt on {n} basis vectors");
                Ok(())
            }
            Err(err) => {
                warn!("{err}; falling back to the plain fixed-point step on the subspace");
                self.inverse = DMatrix::identity(n, n);
                Err(err)
            }
        }
    }
}

/// Inverts `I - J` after checking its 2-norm condition number.
pub fn invert_reduced_operator(
    operator: DMatrix<f64>,
    max_condition: f64,
) -> SubspaceResult<DMatrix<f64>> {
    if operator.is_empty() {
        return Ok(operator);
    }
    if operator.iter().any(|v| !v.is_finite()) {
        return Err(SubspaceError::SingularReducedJacobian);
    }

    let singular_values = operator.singular_values();
    let largest = singular_values.max();
    let smallest = singular_values.min();
    if smallest <= 0.0 {
        return Err(SubspaceError::SingularReducedJacobian);
    }
    let condition = largest / smallest;
    if !(condition <= max_condition) {
        return Err(SubspaceError::IllConditionedReducedJacobian { condition });
    }

    operator
        .try_inverse()
        .ok_or(SubspaceError::SingularReducedJacobian)
}

/// Adjoint oracle over an explicit Jacobian `A = dG/du`: propagating computes
/// `A^T seed`.
#[derive(Debug, Clone)]
pub struct DenseAdjointOracle {
    jacobian: DMatrix<f64>,
    seeds: DVector<f64>,
    adjoints: DVector<f64>,
}

impl DenseAdjointOracle {
    pub fn new(jacobian: DMatrix<f64>) -> Self {
        let (rows, cols) = jacobian.shape();
        Self {
            jacobian,
            seeds: DVector::zeros(rows),
            adjoints: DVector::zeros(cols),
        }
    }

    pub fn jacobian(&self) -> &DMatrix<f64> {
        &self.jacobian
    }

    pub fn set_jacobian(&mut self, jacobian: DMatrix<f64>) {
        *self = Self::new(jacobian);
    }
}

impl AdjointOracle for DenseAdjointOracle {
    fn clear_derivatives(&mut self) {
        self.seeds.fill(0.0);
        self.adjoints.fill(0.0);
    }

    fn seed_output(&mut self, index: usize, value: f64) {
        self.seeds[index] = value;
    }

    fn propagate_adjoint(&mut self) {
        self.adjoints = self.jacobian.tr_mul(&self.seeds);
    }

    fn read_input(&self, index: usize) -> f64 {
        self.adjoints[index]
    }
}
