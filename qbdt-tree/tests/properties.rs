//! Property tests: the tree against a dense reference engine

use num_complex::Complex64;
use proptest::prelude::*;
use qbdt_core::matrix::{self, Matrix2, HADAMARD};
use qbdt_state::{AttachedEngine, DenseEngine};
use qbdt_tree::{QBdt, QBdtConfig};
use std::f64::consts::PI;

const QUBITS: usize = 5;

#[derive(Debug, Clone)]
struct Op {
    controls: Vec<usize>,
    target: usize,
    matrix: Matrix2,
}

fn gate_matrix(kind: u8, theta: f64, phi: f64, lambda: f64) -> Matrix2 {
    let phase = |a: f64| Complex64::from_polar(1.0, a);
    match kind {
        0 => matrix::u3(theta, phi, lambda),
        1 => matrix::diagonal(phase(phi), phase(lambda)),
        2 => matrix::anti_diagonal(phase(phi), phase(lambda)),
        _ => HADAMARD,
    }
}

fn op_strategy(n: usize) -> impl Strategy<Value = Op> {
    (
        0..n,
        prop::collection::vec(0..n, 0..3),
        0u8..4,
        -PI..PI,
        -PI..PI,
        -PI..PI,
    )
        .prop_map(|(target, raw_controls, kind, theta, phi, lambda)| {
            let mut controls = Vec::new();
            for c in raw_controls {
                if c != target && !controls.contains(&c) {
                    controls.push(c);
                }
            }
            Op {
                controls,
                target,
                matrix: gate_matrix(kind, theta, phi, lambda),
            }
        })
}

fn circuit(n: usize, len: usize) -> impl Strategy<Value = Vec<Op>> {
    prop::collection::vec(op_strategy(n), 0..len)
}

fn run_tree(ops: &[Op], attached: usize, config: QBdtConfig) -> QBdt {
    let mut state =
        QBdt::<DenseEngine>::with_split(QUBITS - attached, attached, 0, config).unwrap();
    for op in ops {
        state.mc_mtrx(&op.controls, &op.matrix, op.target).unwrap();
    }
    state
}

fn run_dense(n: usize, ops: &[Op]) -> Vec<Complex64> {
    let mut engine = DenseEngine::new_permutation(n, 0).unwrap();
    for op in ops {
        engine
            .apply_controlled_matrix(&op.controls, &op.matrix, op.target)
            .unwrap();
    }
    engine.amplitudes()
}

fn max_distance(a: &[Complex64], b: &[Complex64]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y).norm())
        .fold(0.0, f64::max)
}

fn normalized(raw: Vec<(f64, f64, bool)>) -> Vec<Complex64> {
    let mut amps: Vec<Complex64> = raw
        .into_iter()
        .map(|(re, im, keep)| if keep { Complex64::new(re, im) } else { Complex64::new(0.0, 0.0) })
        .collect();
    if amps.iter().all(|a| a.norm_sqr() < 1e-6) {
        amps[0] = Complex64::new(1.0, 0.0);
    }
    let norm = amps.iter().map(|a| a.norm_sqr()).sum::<f64>().sqrt();
    amps.iter().map(|a| a / norm).collect()
}

fn prepared(n: usize, ops: &[Op]) -> QBdt {
    prepared_split(n, 0, ops)
}

fn prepared_split(n: usize, attached: usize, ops: &[Op]) -> QBdt {
    let mut state =
        QBdt::<DenseEngine>::with_split(n - attached, attached, 0, QBdtConfig::default()).unwrap();
    for op in ops {
        state.mc_mtrx(&op.controls, &op.matrix, op.target).unwrap();
    }
    state
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn skip_ahead_matches_dense_reference(ops in circuit(QUBITS, 24), attached in 0usize..3) {
        let reference = run_dense(QUBITS, &ops);
        let sequential = run_tree(&ops, attached, QBdtConfig::sequential());
        let parallel = run_tree(
            &ops,
            attached,
            QBdtConfig::default().with_parallel_threshold(0).with_chunks_per_thread(2),
        );
        prop_assert!(max_distance(&sequential.get_quantum_state(), &reference) < 1e-9);
        prop_assert!(max_distance(&parallel.get_quantum_state(), &reference) < 1e-9);
    }

    #[test]
    fn unitary_circuits_stay_normalized(ops in circuit(QUBITS, 32)) {
        let state = run_tree(&ops, 0, QBdtConfig::default());
        let total: f64 = state.probabilities().iter().sum();
        prop_assert!((total - 1.0).abs() < 1e-9);
        for q in 0..QUBITS {
            let p = state.prob(q).unwrap();
            prop_assert!((0.0..=1.0).contains(&p));
        }
    }

    #[test]
    fn amplitude_round_trip(
        raw in prop::collection::vec((-1.0f64..1.0, -1.0f64..1.0, any::<bool>()), 32),
        attached in 0usize..3,
    ) {
        let amps = normalized(raw);
        let mut state =
            QBdt::<DenseEngine>::with_split(QUBITS - attached, attached, 0, QBdtConfig::default())
                .unwrap();
        state.set_quantum_state(&amps).unwrap();
        prop_assert!(max_distance(&state.get_quantum_state(), &amps) < 1e-12);
        for (i, amp) in amps.iter().enumerate() {
            prop_assert!((state.get_amplitude(i).unwrap() - amp).norm() < 1e-12);
        }
    }

    #[test]
    fn compose_then_decompose_recovers_factors(
        high in circuit(3, 10),
        low in circuit(2, 8),
        start in 0usize..=3,
    ) {
        let a = prepared(3, &high);
        let b = prepared(2, &low);
        let mut joined = a.clone();
        joined.compose(&b, start).unwrap();
        prop_assert_eq!(joined.qubit_count(), 5);

        let extracted = joined.decompose(start, 2).unwrap();
        prop_assert!(extracted.sum_sqr_diff(&b).unwrap() < 1e-9);
        prop_assert!(joined.sum_sqr_diff(&a).unwrap() < 1e-9);
    }

    #[test]
    fn compose_then_decompose_with_attached_engines(
        high in circuit(3, 10),
        low in circuit(2, 8),
        high_attached in 0usize..=2,
        low_attached in 0usize..=2,
        start in 0usize..=3,
    ) {
        let a = prepared_split(3, high_attached, &high);
        let b = prepared_split(2, low_attached, &low);
        let mut joined = a.clone();
        joined.compose(&b, start).unwrap();
        prop_assert_eq!(joined.qubit_count(), 5);

        let extracted = joined.decompose(start, 2).unwrap();
        prop_assert!(extracted.sum_sqr_diff(&b).unwrap() < 1e-9);
        prop_assert!(joined.sum_sqr_diff(&a).unwrap() < 1e-9);
    }

    #[test]
    fn measurement_collapses_onto_outcome(ops in circuit(QUBITS, 16), qubit in 0..QUBITS, draw in 0.0f64..1.0) {
        let mut state = run_tree(&ops, 1, QBdtConfig::default())
            .with_random_source(qbdt_core::random::shared(qbdt_core::random::FixedRandom(draw)));
        let outcome = state.m(qubit).unwrap();
        let p1 = state.prob(qubit).unwrap();
        let expected = if outcome { 1.0 } else { 0.0 };
        prop_assert!((p1 - expected).abs() < 1e-9);
        let total: f64 = state.probabilities().iter().sum();
        prop_assert!((total - 1.0).abs() < 1e-9);
    }
}
