use crate::error::{SubspaceError, SubspaceResult};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct SubspaceSettings {
    /// Number of stable-part deltas kept for basis detection.
    pub n_sample: usize,
    /// Capacity of the unstable-subspace basis.
    pub n_basis: usize,
    /// Threshold on |r0 / r1| of the history QR factor above which a basis vector is added.
    pub krylov_criterion: f64,
    /// Largest accepted 2-norm condition number of (I - J).
    pub max_condition_number: f64,
}

impl Default for SubspaceSettings {
    fn default() -> Self {
        Self {
            n_sample: 3,
            n_basis: 4,
            krylov_criterion: 10.0,
            max_condition_number: 1e12,
        }
    }
}

impl SubspaceSettings {
    pub fn validate(&self) -> SubspaceResult<()> {
        if self.n_sample < 2 {
            return Err(SubspaceError::InvalidConfiguration(format!(
                "n_sample must be at least 2, got {}",
                self.n_sample
            )));
        }
        if !(self.krylov_criterion > 0.0) {
            return Err(SubspaceError::InvalidConfiguration(format!(
                "krylov_criterion must be positive, got {}",
                self.krylov_criterion
            )));
        }
        if !(self.max_condition_number > 0.0) {
            return Err(SubspaceError::InvalidConfiguration(format!(
                "max_condition_number must be positive, got {}",
                self.max_condition_number
            )));
        }
        Ok(())
    }
}
