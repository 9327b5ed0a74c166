//! Integration tests for basic circuit scenarios

use approx::assert_relative_eq;
use num_complex::Complex64;
use qbdt_core::matrix::{adjoint, rotation_x, u3, HADAMARD, PAULI_Y, T_GATE};
use qbdt_core::random::{shared, FixedRandom, StdRandom};
use qbdt_core::ONE;
use qbdt_state::DenseEngine;
use qbdt_tree::{QBdt, QBdtConfig};
use std::f64::consts::FRAC_1_SQRT_2;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn assert_amplitudes(state: &QBdt, expected: &[Complex64]) {
    let got = state.get_quantum_state();
    assert_eq!(got.len(), expected.len());
    for (g, e) in got.iter().zip(expected) {
        assert_relative_eq!(g.re, e.re, epsilon = 1e-12);
        assert_relative_eq!(g.im, e.im, epsilon = 1e-12);
    }
}

fn r(re: f64) -> Complex64 {
    Complex64::new(re, 0.0)
}

fn bell_pair(draw: f64) -> QBdt {
    let mut state = QBdt::new(2, 0)
        .unwrap()
        .with_random_source(shared(FixedRandom(draw)));
    state.mtrx(&HADAMARD, 0).unwrap();
    state.mc_invert(&[0], ONE, ONE, 1).unwrap();
    state
}

#[test]
fn test_hadamard_superposition() {
    init_tracing();
    let mut state = QBdt::new(2, 0).unwrap();
    state.mtrx(&HADAMARD, 0).unwrap();
    assert_amplitudes(&state, &[r(FRAC_1_SQRT_2), r(0.0), r(FRAC_1_SQRT_2), r(0.0)]);
}

#[test]
fn test_bell_pair() {
    init_tracing();
    let state = bell_pair(0.5);
    assert_amplitudes(&state, &[r(FRAC_1_SQRT_2), r(0.0), r(0.0), r(FRAC_1_SQRT_2)]);
    assert_eq!(state.sum_sqr_diff(&state).unwrap(), 0.0);

    let rebuilt = bell_pair(0.5);
    assert_relative_eq!(state.sum_sqr_diff(&rebuilt).unwrap(), 0.0, epsilon = 1e-12);
}

#[test]
fn test_bell_measurement_is_correlated() {
    init_tracing();
    for draw in [0.0, 0.999] {
        for _ in 0..10 {
            let mut state = bell_pair(draw);
            let first = state.m(0).unwrap();
            assert_eq!(first, draw < 0.5);
            assert_eq!(state.m(1).unwrap(), first);
        }
    }
}

#[test]
fn test_bell_measurement_statistics() {
    let rng = shared(StdRandom::seeded(11));
    let mut ones = 0;
    for _ in 0..400 {
        let mut state = bell_pair(0.0).with_random_source(rng.clone());
        let first = state.m(0).unwrap();
        assert_eq!(state.m(1).unwrap(), first);
        ones += usize::from(first);
    }
    assert!((120..280).contains(&ones), "{ones} ones out of 400");
}

#[test]
fn test_gate_round_trips() {
    let gates = [HADAMARD, PAULI_Y, T_GATE, rotation_x(0.77), u3(1.2, -0.4, 2.9)];
    let mut state = QBdt::new(4, 0b0110).unwrap();
    state.mtrx(&HADAMARD, 1).unwrap();
    state.mc_invert(&[1], ONE, ONE, 3).unwrap();
    let before = state.get_quantum_state();

    for (k, m) in gates.iter().enumerate() {
        let target = k % 4;
        state.mtrx(m, target).unwrap();
        state.mtrx(&adjoint(m), target).unwrap();

        let controls = [(target + 1) % 4];
        state.mc_mtrx(&controls, m, target).unwrap();
        state.mc_mtrx(&controls, &adjoint(m), target).unwrap();
    }
    for (a, b) in state.get_quantum_state().iter().zip(&before) {
        assert_relative_eq!((a - b).norm(), 0.0, epsilon = 1e-10);
    }
}

#[test]
fn test_ghz_stays_compact() {
    let mut state = QBdt::new(24, 0).unwrap();
    state.mtrx(&HADAMARD, 0).unwrap();
    for q in 1..24 {
        state.mc_invert(&[q - 1], ONE, ONE, q).unwrap();
    }
    // two paths of 24 nodes under one root
    assert!(state.node_count() <= 49, "{} nodes", state.node_count());
    assert_relative_eq!(
        state.get_amplitude((1 << 24) - 1).unwrap().re,
        FRAC_1_SQRT_2,
        epsilon = 1e-12
    );
    assert_relative_eq!(state.prob(23).unwrap(), 0.5, epsilon = 1e-12);
}

#[test]
fn test_uniform_superposition_shares_every_level() {
    let mut state = QBdt::new(12, 0).unwrap();
    for q in 0..12 {
        state.mtrx(&HADAMARD, q).unwrap();
    }
    assert_eq!(state.node_count(), 13);
    assert_relative_eq!(
        state.get_amplitude(1234).unwrap().re,
        (0.5f64).powi(6),
        epsilon = 1e-12
    );
}

#[test]
fn test_dense_fallback_matches_tree() {
    init_tracing();
    let config = QBdtConfig::default().with_seed(3);
    let mut tree = QBdt::<DenseEngine>::with_config(4, 0, config.clone()).unwrap();
    let mut dense = QBdt::<DenseEngine>::with_config(4, 0, config).unwrap();
    dense.set_dense_fallback().unwrap();

    for state in [&mut tree, &mut dense] {
        state.mtrx(&HADAMARD, 0).unwrap();
        state.mc_mtrx(&[0], &rotation_x(0.4), 2).unwrap();
        state.mc_invert(&[2], ONE, ONE, 1).unwrap();
        state.mtrx(&T_GATE, 3).unwrap();
    }
    assert!(dense.is_dense_fallback());
    assert_relative_eq!(tree.sum_sqr_diff(&dense).unwrap(), 0.0, epsilon = 1e-12);
    for q in 0..4 {
        assert_relative_eq!(tree.prob(q).unwrap(), dense.prob(q).unwrap(), epsilon = 1e-12);
    }
}
