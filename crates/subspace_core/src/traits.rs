/// Reduction service for partitioned fields.
///
/// Every partition holding a piece of the same field must call the same
/// reductions in the same order; results are identical on all partitions.
pub trait Collective {
    /// Index of this partition.
    fn rank(&self) -> usize;

    /// Number of partitions sharing the field.
    fn size(&self) -> usize;

    /// Element-wise global sum, written back into `values` on every partition.
    fn all_reduce_sum(&self, values: &mut [f64]);

    fn global_sum(&self, local: f64) -> f64 {
        let mut buf = [local];
        self.all_reduce_sum(&mut buf);
        buf[0]
    }
}

/// Single partition: reductions are the identity.
#[derive(Debug, Clone, Copy, Default)]
pub struct SerialCollective;

impl Collective for SerialCollective {
    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn all_reduce_sum(&self, _values: &mut [f64]) {}
}

/// Reverse-mode differentiation of the fixed-point map G, recorded on a tape.
///
/// Positions are tape indices supplied by the caller through
/// [`TapeIndices`](crate::jacobian::TapeIndices).
pub trait AdjointOracle {
    /// Clears every pending derivative seed and propagated adjoint.
    fn clear_derivatives(&mut self);

    /// Seeds the adjoint of the output at tape position `index`.
    fn seed_output(&mut self, index: usize, value: f64);

    /// Propagates the seeded adjoints backward through G.
    fn propagate_adjoint(&mut self);

    /// Adjoint accumulated at input tape position `index`.
    fn read_input(&self, index: usize) -> f64;
}
