//! Newton correction of a fixed-point update on the detected unstable subspace.
//!
//! Every outer iteration the raw update G(u) is loaded into the work buffer and
//! [`NewtonUpdateOnSubspace::compute`] splits it into a stable part q and an
//! unstable part p = R p_R. The stable-part increments feed the history window
//! used by [`NewtonUpdateOnSubspace::check_basis`]; the unstable part is
//! advanced by the reduced Newton recurrence. After the basis grows the caller
//! rebuilds the reduced operator with
//! [`NewtonUpdateOnSubspace::compute_projected_jacobian`].

use crate::basis::KrylovBasis;
use crate::error::{SubspaceError, SubspaceResult};
use crate::field::{FieldLayout, SolutionField};
use crate::history::HistoryWindow;
use crate::jacobian::{ProjectedJacobian, TapeIndices};
use crate::projector::ReducedCoordinates;
use crate::settings::SubspaceSettings;
use crate::traits::{AdjointOracle, Collective, SerialCollective};
use log::{info, warn};
use nalgebra::{DMatrix, DVector};

pub struct NewtonUpdateOnSubspace {
    layout: FieldLayout,
    /// Raw update on input, corrected solution after `compute`.
    work: SolutionField,
    /// Stable part of the previous call.
    stable: SolutionField,
    /// Unstable part p in the standard basis.
    projected: SolutionField,
    history: HistoryWindow,
    basis: KrylovBasis,
    coordinates: ReducedCoordinates,
    jacobian: ProjectedJacobian,
    max_condition_number: f64,
    collective: Box<dyn Collective>,
}

impl Default for NewtonUpdateOnSubspace {
    /// Unallocated accelerator, see [`resize`](Self::resize).
    fn default() -> Self {
        Self {
            layout: FieldLayout::default(),
            work: SolutionField::default(),
            stable: SolutionField::default(),
            projected: SolutionField::default(),
            history: HistoryWindow::default(),
            basis: KrylovBasis::default(),
            coordinates: ReducedCoordinates::default(),
            jacobian: ProjectedJacobian::default(),
            max_condition_number: SubspaceSettings::default().max_condition_number,
            collective: Box::new(SerialCollective),
        }
    }
}

impl NewtonUpdateOnSubspace {
    /// Construction with allocation, see [`resize`](Self::resize).
    pub fn new(
        n_sample: usize,
        n_basis: usize,
        npt: usize,
        nvar: usize,
        npt_domain: usize,
    ) -> SubspaceResult<Self> {
        let mut accelerator = Self::default();
        accelerator.resize(n_sample, n_basis, npt, nvar, npt_domain)?;
        Ok(accelerator)
    }

    pub fn from_settings(settings: &SubspaceSettings, layout: FieldLayout) -> SubspaceResult<Self> {
        settings.validate()?;
        let mut accelerator = Self::new(
            settings.n_sample,
            settings.n_basis,
            layout.npt,
            layout.nvar,
            layout.npt_domain,
        )?;
        accelerator.max_condition_number = settings.max_condition_number;
        Ok(accelerator)
    }

    /// Injects the reduction service used for every global scalar.
    pub fn with_collective(mut self, collective: Box<dyn Collective>) -> Self {
        self.collective = collective;
        self
    }

    pub fn set_collective(&mut self, collective: Box<dyn Collective>) {
        self.collective = collective;
    }

    pub fn set_max_condition_number(&mut self, value: f64) {
        self.max_condition_number = value;
    }

    /// Allocates every buffer.
    ///
    /// * `n_sample` - number of stable-part increments kept for basis detection (>= 2).
    /// * `n_basis` - capacity of the unstable-subspace basis.
    /// * `npt` - points of the solution including halos.
    /// * `nvar` - variables per point.
    /// * `npt_domain` - owned points (<= `npt`); 0 means the field is not partitioned.
    ///
    /// On error the accelerator is left unallocated and must not be used.
    pub fn resize(
        &mut self,
        n_sample: usize,
        n_basis: usize,
        npt: usize,
        nvar: usize,
        npt_domain: usize,
    ) -> SubspaceResult<()> {
        let collective = std::mem::replace(&mut self.collective, Box::new(SerialCollective));
        let max_condition_number = self.max_condition_number;
        *self = Self {
            collective,
            max_condition_number,
            ..Self::default()
        };

        if n_sample < 2 {
            return Err(SubspaceError::InvalidConfiguration(format!(
                "n_sample must be at least 2, got {n_sample}"
            )));
        }
        let layout = FieldLayout::new(npt, nvar, npt_domain)?;

        self.layout = layout;
        self.work = SolutionField::zeros(layout);
        self.stable = SolutionField::zeros(layout);
        self.projected = SolutionField::zeros(layout);
        self.history = HistoryWindow::new(n_sample, layout);
        self.basis = KrylovBasis::new(n_basis, layout);
        Ok(())
    }

    /// Capacity of the subspace basis.
    pub fn size(&self) -> usize {
        self.basis.capacity()
    }

    /// Number of accepted basis vectors.
    pub fn basis_len(&self) -> usize {
        self.basis.len()
    }

    /// True once every basis slot is taken; `check_basis` then always reports
    /// no growth, whatever the criterion.
    pub fn is_saturated(&self) -> bool {
        self.basis.is_saturated()
    }

    pub fn layout(&self) -> FieldLayout {
        self.layout
    }

    /// Discards the history but the current sample and restarts basis detection.
    pub fn reset(&mut self) {
        self.history.reset();
        self.basis.reset();
        self.coordinates.reset();
    }

    /// Work buffer to load the raw (uncorrected) update into.
    pub fn work_mut(&mut self) -> &mut SolutionField {
        &mut self.work
    }

    pub fn load(&mut self, raw: &[f64]) -> SubspaceResult<()> {
        self.work.copy_from_slice(raw)
    }

    /// Appends a basis vector if the history satisfies the Krylov criterion.
    pub fn check_basis(&mut self, threshold: f64) -> bool {
        self.basis.check(
            &self.history,
            threshold,
            self.layout,
            self.collective.as_ref(),
        )
    }

    /// Rebuilds the projected Jacobian and the reduced Newton operator.
    /// Call directly after the basis has grown.
    pub fn compute_projected_jacobian(
        &mut self,
        zone: usize,
        indices: &TapeIndices,
        oracle: &mut dyn AdjointOracle,
    ) -> SubspaceResult<()> {
        info!(
            "Evaluating R^T (dG/du)^T R on zone {zone} for {} basis vectors",
            self.basis.len()
        );
        self.jacobian.rebuild(
            &self.basis,
            self.layout,
            indices,
            oracle,
            self.collective.as_ref(),
            self.max_condition_number,
        )
    }

    /// Corrects the raw update held in the work buffer.
    ///
    /// The returned field is the internal work buffer; it is overwritten by the
    /// next load.
    pub fn compute(&mut self) -> &SolutionField {
        let owned = self.layout.owned_len();

        if !self.basis.is_empty() {
            self.coordinates.project(
                &self.basis,
                &self.work,
                owned,
                self.collective.as_ref(),
                &mut self.projected,
            );
            self.work.axpy(-1.0, &self.projected);
        } else {
            self.projected.fill(0.0);
        }

        // stable <- q - q_prev, stored in the history; stable then owns a free buffer
        for (previous, &q) in self
            .stable
            .as_mut_slice()
            .iter_mut()
            .zip(self.work.as_slice())
        {
            *previous = q - *previous;
        }
        self.history.push(&mut self.stable);
        std::mem::swap(&mut self.stable, &mut self.work);

        if !self.basis.is_empty() {
            self.update_projected_solution();
        }

        for ((out, &q), &p) in self
            .work
            .as_mut_slice()
            .iter_mut()
            .zip(self.stable.as_slice())
            .zip(self.projected.as_slice())
        {
            *out = q + p;
        }
        &self.work
    }

    fn update_projected_solution(&mut self) {
        if !self.coordinates.newton_step(self.jacobian.inverse()) {
            warn!(
                "Reduced Newton operator has size {} but the basis has {} vectors; \
                 call compute_projected_jacobian after basis growth",
                self.jacobian.inverse().nrows(),
                self.basis.len()
            );
        }
        crate::projector::reconstruct(&self.basis, &self.coordinates.current, &mut self.projected);
    }

    pub fn basis_vector(&self, index: usize) -> Option<&SolutionField> {
        self.basis.vector(index)
    }

    pub fn history(&self) -> &HistoryWindow {
        &self.history
    }

    /// Current reduced coordinates `p_R` of the unstable part.
    pub fn reduced_coordinates(&self) -> &DVector<f64> {
        &self.coordinates.current
    }

    pub fn projected_jacobian(&self) -> &DMatrix<f64> {
        self.jacobian.jacobian()
    }

    pub fn newton_inverse(&self) -> &DMatrix<f64> {
        self.jacobian.inverse()
    }

    /// Unstable part p of the last corrected solution.
    pub fn unstable_part(&self) -> &SolutionField {
        &self.projected
    }
}
