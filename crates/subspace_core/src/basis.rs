//! Detection and incremental construction of the unstable-subspace basis.
//!
//! The history deltas are factored with a Householder QR. When the leading
//! diagonal entry of R dominates the second one, the deltas are aligned with a
//! single slowly converging direction and the first column of Q is appended to
//! the basis.

use crate::field::{FieldLayout, SolutionField};
use crate::history::HistoryWindow;
use crate::traits::Collective;
use log::{debug, info, warn};
use nalgebra::{DMatrix, DVector};

/// QR data of the history window shared by every partition.
#[derive(Debug, Clone)]
pub struct HistoryFactorization {
    /// Diagonal of the global R factor, one entry per sample.
    pub diagonal: Vec<f64>,
    /// Owned rows of the first column of the global Q factor.
    pub leading_direction: DVector<f64>,
}

impl HistoryFactorization {
    /// `|r0 / r1|`, or `None` when `r1` is zero or the ratio is NaN.
    pub fn leading_ratio(&self) -> Option<f64> {
        let r0 = *self.diagonal.first()?;
        let r1 = *self.diagonal.get(1)?;
        if r1 == 0.0 {
            return None;
        }
        let ratio = (r0 / r1).abs();
        if ratio.is_nan() {
            None
        } else {
            Some(ratio)
        }
    }
}

/// Factors the owned rows of the history samples.
///
/// With more than one partition the local R factors are gathered and factored
/// again (TSQR), so the diagonal and the Q column are those of the global matrix.
pub fn factor_history(
    history: &HistoryWindow,
    owned: usize,
    collective: &dyn Collective,
) -> HistoryFactorization {
    let n = history.samples();
    let mut x = DMatrix::<f64>::zeros(owned, n);
    for (j, sample) in history.iter().enumerate() {
        for (i, &value) in sample.as_slice()[..owned].iter().enumerate() {
            x[(i, j)] = value;
        }
    }

    let qr = x.qr();
    let q = qr.q();
    let r = qr.r();
    let k = r.nrows();

    if collective.size() == 1 {
        return HistoryFactorization {
            diagonal: (0..k).map(|i| r[(i, i)]).collect(),
            leading_direction: if k > 0 {
                q.column(0).into_owned()
            } else {
                DVector::zeros(owned)
            },
        };
    }

    let rows = collective.size() * n;
    let offset = collective.rank() * n;
    let mut stacked = vec![0.0; rows * n];
    for j in 0..n {
        for i in 0..k {
            stacked[j * rows + offset + i] = r[(i, j)];
        }
    }
    collective.all_reduce_sum(&mut stacked);

    let global = DMatrix::from_column_slice(rows, n, &stacked).qr();
    let q_global = global.q();
    let r_global = global.r();

    let leading_direction = if k > 0 && n > 0 {
        let coeff = DVector::from_fn(k, |i, _| q_global[(offset + i, 0)]);
        &q * coeff
    } else {
        DVector::zeros(owned)
    };

    HistoryFactorization {
        diagonal: (0..r_global.nrows()).map(|i| r_global[(i, i)]).collect(),
        leading_direction,
    }
}

/// Append-only orthonormal basis of the detected unstable subspace.
#[derive(Debug, Clone, Default)]
pub struct KrylovBasis {
    vectors: Vec<SolutionField>,
    count: usize,
    saturation_reported: bool,
}

impl KrylovBasis {
    pub fn new(capacity: usize, layout: FieldLayout) -> Self {
        Self {
            vectors: (0..capacity).map(|_| SolutionField::zeros(layout)).collect(),
            count: 0,
            saturation_reported: false,
        }
    }

    pub fn capacity(&self) -> usize {
        self.vectors.len()
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn is_saturated(&self) -> bool {
        self.count >= self.vectors.len()
    }

    /// Accepted basis vectors, in order of acceptance.
    pub fn active(&self) -> &[SolutionField] {
        &self.vectors[..self.count]
    }

    pub fn vector(&self, index: usize) -> Option<&SolutionField> {
        self.active().get(index)
    }

    /// Forgets the accepted vectors; their storage is reused by later growth.
    pub fn reset(&mut self) {
        self.count = 0;
        self.saturation_reported = false;
    }

    /// Appends a new basis vector when the history satisfies the Krylov criterion.
    ///
    /// Returns `true` iff a vector was appended. Once the basis is saturated
    /// growth is frozen.
    pub fn check(
        &mut self,
        history: &HistoryWindow,
        threshold: f64,
        layout: FieldLayout,
        collective: &dyn Collective,
    ) -> bool {
        if history.len() < 2 || !history.is_full() {
            return false;
        }

        if self.is_saturated() {
            if !self.saturation_reported {
                warn!(
                    "Basis of the unstable subspace is full ({} vectors), further growth is frozen",
                    self.vectors.len()
                );
                self.saturation_reported = true;
            }
            return false;
        }

        let owned = layout.owned_len();
        let factors = factor_history(history, owned, collective);
        let Some(ratio) = factors.leading_ratio() else {
            debug!("Krylov criterion undefined (zero or NaN diagonal ratio)");
            return false;
        };
        debug!("Krylov criterion value {ratio:e} (threshold {threshold:e})");
        if ratio <= threshold {
            return false;
        }

        let (accepted, free) = self.vectors.split_at_mut(self.count);
        let candidate = &mut free[0];
        candidate.fill(0.0);
        for (slot, &value) in candidate.as_mut_slice()[..owned]
            .iter_mut()
            .zip(factors.leading_direction.iter())
        {
            *slot = value;
        }

        // Q columns are orthogonal already; re-orthogonalize against the accepted basis anyway.
        for previous in accepted.iter() {
            let overlap = collective.global_sum(candidate.owned_dot(previous, owned));
            candidate.axpy(-overlap, previous);
        }
        let current: &SolutionField = candidate;
        let norm = collective.global_sum(current.owned_dot(current, owned)).sqrt();
        if !(norm > 0.0) || !norm.is_finite() {
            debug!("Krylov candidate lies in the current basis span, skipped");
            return false;
        }
        candidate.scale(1.0 / norm);

        self.count += 1;
        info!(
            "Krylov criterion fulfilled ({ratio:e}), appended basis vector {} of {}",
            self.count,
            self.vectors.len()
        );
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::SerialCollective;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn field(values: &[f64]) -> SolutionField {
        SolutionField::from_vec(values.to_vec())
    }

    fn window_with(layout: FieldLayout, samples: &[&[f64]]) -> HistoryWindow {
        let mut window = HistoryWindow::new(samples.len(), layout);
        // evict the zero seed by pushing one extra sample first
        window.push(&mut field(samples[0]));
        for sample in samples {
            window.push(&mut field(sample));
        }
        window
    }

    #[test]
    fn balanced_history_does_not_grow() {
        let layout = FieldLayout::serial(4, 1);
        let window = window_with(
            layout,
            &[&[1.0, 1.0, 1.0, 1.0], &[-1.5, -0.5, 0.5, 1.5], &[1.0, -1.0, -1.0, 1.0]],
        );
        let mut basis = KrylovBasis::new(2, layout);
        assert!(!basis.check(&window, 10.0, layout, &SerialCollective));
        assert!(basis.is_empty());
    }

    #[test]
    fn dominant_direction_grows_basis_with_first_q_column() {
        let layout = FieldLayout::serial(4, 1);
        let window = window_with(
            layout,
            &[
                &[5.0, -5.0, 5.0, -5.0],
                &[3.9, -4.1, 4.1, -3.9],
                &[3.3, -3.3, 3.1, -3.1],
            ],
        );
        let factors = factor_history(&window, layout.owned_len(), &SerialCollective);
        assert!(factors.leading_ratio().expect("ratio") > 10.0);

        let mut basis = KrylovBasis::new(2, layout);
        assert!(basis.check(&window, 10.0, layout, &SerialCollective));
        assert_eq!(basis.len(), 1);

        let accepted = basis.vector(0).expect("basis vector").as_slice();
        let alignment: f64 = accepted
            .iter()
            .zip(factors.leading_direction.iter())
            .map(|(a, b)| a * b)
            .sum();
        assert!((alignment.abs() - 1.0).abs() < 1e-12);
        for (a, expected) in accepted.iter().zip([0.5f64, -0.5, 0.5, -0.5]) {
            assert!((a.abs() - expected.abs()).abs() < 1e-12);
        }
    }

    #[test]
    fn zero_second_diagonal_is_not_a_growth() {
        let layout = FieldLayout::serial(3, 1);
        let window = window_with(layout, &[&[1.0, 2.0, 3.0], &[0.0; 3], &[0.0; 3]]);
        let factors = factor_history(&window, layout.owned_len(), &SerialCollective);
        assert_eq!(factors.diagonal[1], 0.0);
        assert!(factors.leading_ratio().is_none());

        let mut basis = KrylovBasis::new(1, layout);
        assert!(!basis.check(&window, 1.0, layout, &SerialCollective));
    }

    #[test]
    fn nan_history_is_not_a_growth() {
        let layout = FieldLayout::serial(2, 1);
        let window = window_with(layout, &[&[f64::NAN, 1.0], &[1.0, 0.0]]);
        let mut basis = KrylovBasis::new(1, layout);
        assert!(!basis.check(&window, 1.0, layout, &SerialCollective));
    }

    #[test]
    fn partially_filled_history_is_ignored() {
        let layout = FieldLayout::serial(2, 1);
        let mut window = HistoryWindow::new(3, layout);
        window.push(&mut field(&[1.0, 0.0]));
        let mut basis = KrylovBasis::new(1, layout);
        assert!(!basis.check(&window, 0.0, layout, &SerialCollective));
    }

    #[test]
    fn saturated_basis_freezes_growth() {
        let layout = FieldLayout::serial(4, 1);
        let window = window_with(
            layout,
            &[&[4.0, 0.0, 0.0, 0.0], &[3.0, 0.01, 0.0, 0.0], &[2.0, 0.0, 0.01, 0.0]],
        );
        let mut basis = KrylovBasis::new(1, layout);
        assert!(basis.check(&window, 10.0, layout, &SerialCollective));
        assert!(basis.is_saturated());
        assert!(!basis.check(&window, 10.0, layout, &SerialCollective));
        assert_eq!(basis.len(), 1);
    }

    #[test]
    fn random_histories_produce_orthonormal_basis() {
        let layout = FieldLayout::serial(6, 2);
        let mut rng = StdRng::seed_from_u64(7);
        let mut window = HistoryWindow::new(3, layout);
        let mut basis = KrylovBasis::new(4, layout);

        for _ in 0..20 {
            let sample: Vec<f64> = (0..layout.len()).map(|_| rng.gen_range(-1.0..1.0)).collect();
            window.push(&mut field(&sample));
            basis.check(&window, 1e-6, layout, &SerialCollective);
        }
        assert_eq!(basis.len(), 4);

        let owned = layout.owned_len();
        for (i, a) in basis.active().iter().enumerate() {
            for (j, b) in basis.active().iter().enumerate() {
                let dot = a.owned_dot(b, owned);
                let expected = if i == j { 1.0 } else { 0.0 };
                assert!(
                    (dot - expected).abs() < 1e-10,
                    "<R{i}, R{j}> = {dot}, expected {expected}"
                );
            }
        }
    }

    #[test]
    fn halo_entries_stay_out_of_the_basis() {
        let layout = FieldLayout::new(3, 1, 2).expect("layout");
        let window = window_with(
            layout,
            &[&[3.0, 0.0, 9.0], &[2.0, 0.01, 9.0], &[1.5, 0.0, 9.0]],
        );
        let mut basis = KrylovBasis::new(1, layout);
        assert!(basis.check(&window, 10.0, layout, &SerialCollective));
        let vector = basis.vector(0).expect("basis vector").as_slice();
        assert_eq!(vector[2], 0.0);
        assert!((vector[0].abs() - 1.0).abs() < 1e-12);
    }
}
