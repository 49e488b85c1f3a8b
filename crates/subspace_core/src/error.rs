use thiserror::Error;

/// Failures reported by the subspace accelerator.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SubspaceError {
    /// Sizing parameters rejected at `resize`; the accelerator is left unallocated.
    #[error("Invalid Newton update parameters: {0}")]
    InvalidConfiguration(String),

    #[error("{what} has {actual} entries, expected {expected}")]
    DimensionMismatch {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("Reduced Newton operator (I - J) is singular")]
    SingularReducedJacobian,

    #[error("Reduced Newton operator (I - J) is ill-conditioned (condition number {condition:e})")]
    IllConditionedReducedJacobian { condition: f64 },
}

pub type SubspaceResult<T> = std::result::Result<T, SubspaceError>;
