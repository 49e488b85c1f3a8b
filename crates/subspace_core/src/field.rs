//! Flat solution storage shared by the history window, the basis and the
//! work buffers of the accelerator.
//!
//! A field holds `npt * nvar` scalars, point-major: entry `(ipt, ivar)` lives at
//! `ipt * nvar + ivar`. In a partitioned run the first `npt_domain` points are
//! owned by this partition and the remainder are halo copies; only owned entries
//! take part in global reductions.

use crate::error::{SubspaceError, SubspaceResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FieldLayout {
    pub npt: usize,
    pub nvar: usize,
    pub npt_domain: usize,
}

impl FieldLayout {
    /// `npt_domain == 0` means the field is not partitioned and every point is owned.
    pub fn new(npt: usize, nvar: usize, npt_domain: usize) -> SubspaceResult<Self> {
        if npt_domain > npt {
            return Err(SubspaceError::InvalidConfiguration(format!(
                "npt_domain ({npt_domain}) exceeds npt ({npt})"
            )));
        }
        Ok(Self {
            npt,
            nvar,
            npt_domain: if npt_domain == 0 { npt } else { npt_domain },
        })
    }

    pub fn serial(npt: usize, nvar: usize) -> Self {
        Self {
            npt,
            nvar,
            npt_domain: npt,
        }
    }

    pub fn len(&self) -> usize {
        self.npt * self.nvar
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of leading entries owned by this partition.
    pub fn owned_len(&self) -> usize {
        self.npt_domain * self.nvar
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct SolutionField {
    data: Vec<f64>,
}

impl SolutionField {
    pub fn zeros(layout: FieldLayout) -> Self {
        Self {
            data: vec![0.0; layout.len()],
        }
    }

    pub fn from_vec(data: Vec<f64>) -> Self {
        Self { data }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [f64] {
        &mut self.data
    }

    pub fn fill(&mut self, value: f64) {
        self.data.fill(value);
    }

    /// Copies `values` into the field without reallocating.
    pub fn copy_from_slice(&mut self, values: &[f64]) -> SubspaceResult<()> {
        if values.len() != self.data.len() {
            return Err(SubspaceError::DimensionMismatch {
                what: "solution update",
                expected: self.data.len(),
                actual: values.len(),
            });
        }
        self.data.copy_from_slice(values);
        Ok(())
    }

    /// Local (partition) dot product over the first `owned` entries.
    pub fn owned_dot(&self, other: &SolutionField, owned: usize) -> f64 {
        self.data[..owned]
            .iter()
            .zip(&other.data[..owned])
            .map(|(a, b)| a * b)
            .sum()
    }

    /// `self += alpha * other`
    pub fn axpy(&mut self, alpha: f64, other: &SolutionField) {
        for (a, b) in self.data.iter_mut().zip(&other.data) {
            *a += alpha * b;
        }
    }

    pub fn scale(&mut self, alpha: f64) {
        for a in &mut self.data {
            *a *= alpha;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_defaults_domain_to_all_points() {
        let layout = FieldLayout::new(5, 2, 0).expect("layout");
        assert_eq!(layout.npt_domain, 5);
        assert_eq!(layout.owned_len(), 10);
        assert_eq!(layout.len(), 10);
    }

    #[test]
    fn layout_rejects_domain_larger_than_field() {
        assert!(FieldLayout::new(4, 1, 5).is_err());
    }

    #[test]
    fn owned_dot_ignores_halo_entries() {
        let a = SolutionField::from_vec(vec![1.0, 2.0, 100.0]);
        let b = SolutionField::from_vec(vec![3.0, 4.0, 100.0]);
        assert!((a.owned_dot(&b, 2) - 11.0).abs() < 1e-12);
    }

    #[test]
    fn copy_checks_length() {
        let mut field = SolutionField::zeros(FieldLayout::serial(3, 1));
        assert!(field.copy_from_slice(&[1.0, 2.0]).is_err());
        field.copy_from_slice(&[1.0, 2.0, 3.0]).expect("copy");
        assert_eq!(field.as_slice(), &[1.0, 2.0, 3.0]);
    }
}
