use std::sync::{Arc, Barrier, Mutex};
use std::thread;

use nalgebra::DMatrix;
use subspace_core::{Collective, DenseAdjointOracle, NewtonUpdateOnSubspace, TapeIndices};

const PARTITIONS: usize = 2;
const STEPS: usize = 12;
const THRESHOLD: f64 = 10.0;
const HALO: f64 = 99.0;

/// Diagonal of dG/du for G(u) = diag(RATES) u + OFFSET; the first entry is unstable.
const RATES: [f64; 6] = [1.6, 0.3, 0.35, 0.4, 0.45, 0.5];
const OFFSET: [f64; 6] = [0.2, 1.0, -0.5, 0.3, 0.8, -0.4];
const LINEAR_STEPS: usize = 30;

/// All-reduce between threads standing in for partitions.
struct ThreadCollective {
    rank: usize,
    size: usize,
    buffer: Arc<Mutex<Vec<f64>>>,
    barrier: Arc<Barrier>,
}

impl Collective for ThreadCollective {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn all_reduce_sum(&self, values: &mut [f64]) {
        self.barrier.wait();
        if self.rank == 0 {
            *self.buffer.lock().expect("buffer") = vec![0.0; values.len()];
        }
        self.barrier.wait();
        {
            let mut buffer = self.buffer.lock().expect("buffer");
            for (acc, v) in buffer.iter_mut().zip(values.iter()) {
                *acc += v;
            }
        }
        self.barrier.wait();
        values.copy_from_slice(&self.buffer.lock().expect("buffer"));
        self.barrier.wait();
    }
}

/// Runs `body` on every partition and collects the results by rank.
fn on_partitions<T, F>(body: F) -> Vec<T>
where
    T: Send + 'static,
    F: Fn(ThreadCollective) -> T + Send + Sync + 'static,
{
    let body = Arc::new(body);
    let buffer = Arc::new(Mutex::new(Vec::new()));
    let barrier = Arc::new(Barrier::new(PARTITIONS));
    let handles: Vec<_> = (0..PARTITIONS)
        .map(|rank| {
            let body = Arc::clone(&body);
            let collective = ThreadCollective {
                rank,
                size: PARTITIONS,
                buffer: Arc::clone(&buffer),
                barrier: Arc::clone(&barrier),
            };
            thread::spawn(move || body(collective))
        })
        .collect();
    handles
        .into_iter()
        .map(|h| h.join().expect("partition thread"))
        .collect()
}

/// Three owned points and one halo point per partition.
fn partition_accelerator() -> NewtonUpdateOnSubspace {
    NewtonUpdateOnSubspace::new(3, 2, 4, 1, 3).expect("partition accelerator")
}

fn owned_rows(rank: usize) -> std::ops::Range<usize> {
    3 * rank..3 * rank + 3
}

fn assert_same_up_to_sign(actual: &[f64], expected: &[f64], what: &str) {
    let sign = if actual
        .iter()
        .zip(expected)
        .map(|(a, b)| a * b)
        .sum::<f64>()
        < 0.0
    {
        -1.0
    } else {
        1.0
    };
    for (a, b) in actual.iter().zip(expected) {
        assert!((a - sign * b).abs() < 1e-9, "{what}: {a} vs {b}");
    }
}

/// Cumulative update with a growing oscillatory and a decaying smooth increment.
fn global_update(step: usize) -> Vec<f64> {
    let mode = [1.0, -1.0, 1.0, -1.0, 1.0, -1.0];
    let smooth = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
    let mut u = vec![0.0; 6];
    for k in 0..=step {
        let fast = 1.8f64.powi(k as i32);
        let slow = 0.4f64.powi(k as i32);
        for i in 0..6 {
            u[i] += 0.05 * fast * mode[i] + slow * smooth[i];
        }
    }
    u
}

struct Run {
    growth: Vec<bool>,
    basis: Vec<Vec<f64>>,
}

fn run(accelerator: &mut NewtonUpdateOnSubspace, local: impl Fn(&[f64]) -> Vec<f64>) -> Run {
    let owned = accelerator.layout().owned_len();
    let mut growth = Vec::new();
    for step in 0..STEPS {
        let raw = local(&global_update(step));
        accelerator.load(&raw).expect("load");
        accelerator.compute();
        growth.push(accelerator.check_basis(THRESHOLD));
    }
    let basis = (0..accelerator.basis_len())
        .map(|i| accelerator.basis_vector(i).expect("basis vector").as_slice()[..owned].to_vec())
        .collect();
    Run { growth, basis }
}

#[test]
fn partitions_take_the_same_basis_decisions_as_a_serial_run() {
    let mut serial = NewtonUpdateOnSubspace::new(3, 2, 6, 1, 0).expect("serial accelerator");
    let reference = run(&mut serial, |u| u.to_vec());
    assert!(reference.growth.iter().any(|&g| g), "reference run never grew");

    let partitions = on_partitions(|collective| {
        let rank = collective.rank();
        let mut accelerator = partition_accelerator().with_collective(Box::new(collective));
        run(&mut accelerator, move |u| {
            let mut local = u[owned_rows(rank)].to_vec();
            local.push(HALO);
            local
        })
    });

    for partition in &partitions {
        assert_eq!(partition.growth, reference.growth);
        assert_eq!(partition.basis.len(), reference.basis.len());
    }

    for (i, expected) in reference.basis.iter().enumerate() {
        let global: Vec<f64> = partitions
            .iter()
            .flat_map(|p| p.basis[i].iter().copied())
            .collect();
        assert_same_up_to_sign(&global, expected, &format!("basis {i}"));
    }
}

struct Trajectory {
    growth: Vec<bool>,
    /// Owned entries of the corrected solution after every step.
    states: Vec<Vec<f64>>,
}

/// Accelerated iteration of the diagonal map restricted to `rates`; halo
/// entries are carried through G unchanged.
fn iterate_linear_map(
    accelerator: &mut NewtonUpdateOnSubspace,
    rates: &[f64],
    offset: &[f64],
) -> Trajectory {
    let layout = accelerator.layout();
    let owned = layout.owned_len();
    let len = layout.len();

    let mut jacobian = DMatrix::<f64>::zeros(len, len);
    for (i, &rate) in rates.iter().enumerate() {
        jacobian[(i, i)] = rate;
    }
    let mut oracle = DenseAdjointOracle::new(jacobian);
    let indices = TapeIndices::identity(len);

    let mut u = vec![HALO; len];
    u[..owned].fill(0.0);
    let mut raw = vec![0.0; len];
    let mut growth = Vec::new();
    let mut states = Vec::new();
    for _ in 0..LINEAR_STEPS {
        raw.copy_from_slice(&u);
        for i in 0..owned {
            raw[i] = rates[i] * u[i] + offset[i];
        }
        accelerator.load(&raw).expect("load");
        u.copy_from_slice(accelerator.compute().as_slice());
        states.push(u[..owned].to_vec());

        let grew = accelerator.check_basis(THRESHOLD);
        if grew {
            accelerator
                .compute_projected_jacobian(0, &indices, &mut oracle)
                .expect("reduced operator");
        }
        growth.push(grew);
    }
    assert!(u[owned..].iter().all(|&h| h == HALO));
    Trajectory { growth, states }
}

#[test]
fn partitioned_correction_matches_serial_trajectory() {
    let mut serial = NewtonUpdateOnSubspace::new(3, 2, 6, 1, 0).expect("serial accelerator");
    let reference = iterate_linear_map(&mut serial, &RATES, &OFFSET);
    assert_eq!(reference.growth.iter().filter(|&&g| g).count(), 2);
    assert_eq!(serial.basis_len(), 2);

    let last = reference.states.last().expect("states");
    for ((value, rate), b) in last.iter().zip(RATES).zip(OFFSET) {
        let fixed_point = b / (1.0 - rate);
        assert!((value - fixed_point).abs() < 1e-6, "{value} vs {fixed_point}");
    }

    let partitions = on_partitions(|collective| {
        let rows = owned_rows(collective.rank());
        let mut accelerator = partition_accelerator();
        accelerator.set_collective(Box::new(collective));
        iterate_linear_map(&mut accelerator, &RATES[rows.clone()], &OFFSET[rows])
    });

    for partition in &partitions {
        assert_eq!(partition.growth, reference.growth);
    }
    for (step, expected) in reference.states.iter().enumerate() {
        for (rank, partition) in partitions.iter().enumerate() {
            let local = &expected[owned_rows(rank)];
            for (a, b) in partition.states[step].iter().zip(local) {
                assert!(
                    (a - b).abs() < 1e-9 * b.abs().max(1.0),
                    "step {step}, rank {rank}: {a} vs {b}"
                );
            }
        }
    }
}
