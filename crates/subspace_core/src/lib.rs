pub mod basis;
pub mod corrector;
pub mod driver;
pub mod error;
pub mod field;
pub mod history;
pub mod jacobian;
pub mod projector;
pub mod settings;
/// The `subspace_core` crate accelerates the outer fixed-point loop of an implicit
/// solver by applying a Newton step on a low-dimensional, slowly converging
/// subspace and leaving the remaining components to the plain update.
///
/// Key components:
/// - **History**: rolling window of stable-part increments (`HistoryWindow`).
/// - **Basis**: QR-based Krylov criterion and orthonormal basis growth (`KrylovBasis`).
/// - **Projector**: reduced coordinates and the discrete Newton recurrence.
/// - **Jacobian**: reduced Jacobian through an injected `AdjointOracle`.
/// - **Corrector**: `NewtonUpdateOnSubspace`, the per-iteration entry point.
/// - **Driver**: reference outer loop for problems exposing G and its adjoint.
pub mod traits;

pub use corrector::NewtonUpdateOnSubspace;
pub use error::{SubspaceError, SubspaceResult};
pub use field::{FieldLayout, SolutionField};
pub use jacobian::{DenseAdjointOracle, TapeIndices};
pub use settings::SubspaceSettings;
pub use traits::{AdjointOracle, Collective, SerialCollective};
