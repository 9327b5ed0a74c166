//! Amplitude reads, full-vector loads and state comparison

use super::QBdt;
use crate::node::{self, prune, Children};
use crate::traversal::{walk, FirstError};
use num_complex::Complex64;
use qbdt_core::bits::{block_skip, pow2_mask};
use qbdt_core::{clamp_probability, is_norm_zero, QbdtError, Result, ZERO};
use qbdt_state::AttachedEngine;
use std::sync::Arc;

impl<E: AttachedEngine> QBdt<E> {
    /// Amplitude of basis state `perm`.
    pub fn get_amplitude(&self, perm: usize) -> Result<Complex64> {
        self.check_index(perm)?;
        self.amplitude_at(perm).map(|(amp, _)| amp)
    }

    /// Amplitude at `i`, and how many following indices are zero with it.
    ///
    /// The walk stops at the first zero scale, so a zero amplitude costs the
    /// depth of its zero prefix.
    pub(crate) fn amplitude_at(&self, i: usize) -> Result<(Complex64, usize)> {
        let tail = self.attached_qubits;
        let w = walk(&self.root, i >> tail, self.tree_qubits);
        if w.is_zero() {
            return Ok((ZERO, block_skip(i, self.qubit_count() - w.depth)));
        }
        match &w.node.children {
            Children::Engine(engine) => {
                let amp = w.scale * engine.get_amplitude(i & pow2_mask(tail))?;
                Ok((amp, 0))
            }
            _ if tail == 0 => Ok((w.scale, 0)),
            _ => Ok((ZERO, block_skip(i, tail))),
        }
    }

    /// `|amplitude(perm)|²`
    pub fn probability_all(&self, perm: usize) -> Result<f64> {
        Ok(self.get_amplitude(perm)?.norm_sqr())
    }

    /// Dense copy of the state.
    ///
    /// Allocates `2^qubit_count` amplitudes.
    pub fn get_quantum_state(&self) -> Vec<Complex64> {
        let mut out = vec![ZERO; self.max_index()];
        let root = &self.root;
        let levels = self.tree_qubits;
        self.traversal.fill(levels, &mut out, |i, slot| {
            let w = walk(root, i, levels);
            if w.is_zero() {
                return w.skip(i, levels);
            }
            match &w.node.children {
                Children::Engine(engine) => {
                    for (out, amp) in slot.iter_mut().zip(engine.amplitudes()) {
                        *out = w.scale * amp;
                    }
                }
                _ => slot[0] = w.scale,
            }
            0
        });
        out
    }

    /// Squared magnitudes of every amplitude.
    pub fn probabilities(&self) -> Vec<f64> {
        self.get_quantum_state()
            .into_iter()
            .map(|amp| amp.norm_sqr())
            .collect()
    }

    /// Replaces the state with `amplitudes`, then restores canonical form.
    pub fn set_quantum_state(&mut self, amplitudes: &[Complex64]) -> Result<()> {
        if amplitudes.len() != self.max_index() {
            return Err(QbdtError::DimensionMismatch {
                expected: self.max_index(),
                actual: amplitudes.len(),
            });
        }
        let mut root = node::build(
            amplitudes,
            self.tree_qubits,
            self.attached_qubits,
            self.config.parallel_threshold,
        )?;
        prune(&mut root, self.tree_qubits);
        self.root = root;
        Ok(())
    }

    /// Copies the state into `engine`, overwriting every amplitude.
    ///
    /// # Arguments
    /// * `engine` - Engine over exactly `qubit_count()` qubits
    ///
    /// # Returns
    /// [`QbdtError::QubitCountMismatch`] when the widths differ.
    ///
    /// # Example
    /// ```
    /// use qbdt_tree::{AttachedEngine, DenseEngine, QBdt};
    /// use qbdt_core::matrix::HADAMARD;
    ///
    /// let mut state = QBdt::new(2, 0).unwrap();
    /// state.mtrx(&HADAMARD, 1).unwrap();
    ///
    /// let mut engine = DenseEngine::new_permutation(2, 3).unwrap();
    /// state.get_quantum_state_into(&mut engine).unwrap();
    /// assert!((engine.probability(1).unwrap() - 0.5).abs() < 1e-12);
    /// assert!(engine.get_amplitude(3).unwrap().norm() < 1e-12);
    /// ```
    pub fn get_quantum_state_into(&self, engine: &mut E) -> Result<()> {
        self.check_engine_width(engine)?;
        for (i, amp) in self.get_quantum_state().into_iter().enumerate() {
            engine.set_amplitude(i, amp)?;
        }
        Ok(())
    }

    /// Replaces the state with the amplitudes held by `engine`.
    ///
    /// # Arguments
    /// * `engine` - Engine over exactly `qubit_count()` qubits
    ///
    /// # Returns
    /// [`QbdtError::QubitCountMismatch`] when the widths differ.
    ///
    /// # Example
    /// ```
    /// use qbdt_tree::{AttachedEngine, DenseEngine, QBdt};
    ///
    /// let engine = DenseEngine::new_permutation(3, 0b101).unwrap();
    /// let mut state = QBdt::new(3, 0).unwrap();
    /// state.set_quantum_state_from(&engine).unwrap();
    /// assert!((state.probability_all(0b101).unwrap() - 1.0).abs() < 1e-12);
    /// ```
    pub fn set_quantum_state_from(&mut self, engine: &E) -> Result<()> {
        self.check_engine_width(engine)?;
        self.set_quantum_state(&engine.amplitudes())
    }

    fn check_engine_width(&self, engine: &E) -> Result<()> {
        if engine.qubit_count() != self.qubit_count() {
            return Err(QbdtError::QubitCountMismatch {
                expected: self.qubit_count(),
                actual: engine.qubit_count(),
            });
        }
        Ok(())
    }

    /// `1 - |<self|other>|²`
    ///
    /// States of different widths are maximally dissimilar. Both walks skip
    /// ahead independently past their own zero prefixes.
    pub fn sum_sqr_diff(&self, other: &QBdt<E>) -> Result<f64> {
        if std::ptr::eq(self, other) {
            return Ok(0.0);
        }
        if self.qubit_count() != other.qubit_count() {
            return Ok(1.0);
        }
        if Arc::ptr_eq(&self.root, &other.root) && self.tree_qubits == other.tree_qubits {
            return Ok(0.0);
        }

        let errors = FirstError::default();
        let overlap = self.traversal.fold(
            self.qubit_count(),
            ZERO,
            |i, acc| {
                let mut step = || -> Result<usize> {
                    let (a, skip) = self.amplitude_at(i)?;
                    if is_norm_zero(a) {
                        return Ok(skip);
                    }
                    let (b, skip) = other.amplitude_at(i)?;
                    if is_norm_zero(b) {
                        return Ok(skip);
                    }
                    *acc += a.conj() * b;
                    Ok(0)
                };
                step().unwrap_or_else(|err| {
                    errors.record(err);
                    0
                })
            },
            |a, b| a + b,
        );
        errors.into_result()?;
        Ok(1.0 - clamp_probability(overlap.norm_sqr()))
    }

    /// Alias of [`sum_sqr_diff`](Self::sum_sqr_diff).
    pub fn fidelity_complement(&self, other: &QBdt<E>) -> Result<f64> {
        self.sum_sqr_diff(other)
    }
}

#[cfg(test)]
mod tests {
    use crate::{QBdt, QBdtConfig};
    use approx::assert_relative_eq;
    use num_complex::Complex64;
    use qbdt_core::matrix::{HADAMARD, PAULI_X};
    use qbdt_core::QbdtError;
    use qbdt_state::{AttachedEngine, DenseEngine};

    fn c(re: f64, im: f64) -> Complex64 {
        Complex64::new(re, im)
    }

    #[test]
    fn test_round_trip_with_tail() {
        let amps: Vec<Complex64> = (0..16)
            .map(|i| c((i as f64 + 1.0).sqrt(), (i % 3) as f64))
            .collect();
        let norm = amps.iter().map(|a| a.norm_sqr()).sum::<f64>().sqrt();
        let amps: Vec<Complex64> = amps.iter().map(|a| a / norm).collect();

        let mut state = QBdt::<DenseEngine>::with_split(2, 2, 0, QBdtConfig::default()).unwrap();
        state.set_quantum_state(&amps).unwrap();
        for (got, want) in state.get_quantum_state().iter().zip(&amps) {
            assert_relative_eq!((got - want).norm(), 0.0, epsilon = 1e-12);
        }
        assert_relative_eq!(
            state.get_amplitude(7).unwrap().re,
            amps[7].re,
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_set_quantum_state_rejects_wrong_length() {
        let mut state = QBdt::new(2, 0).unwrap();
        assert!(state.set_quantum_state(&[c(1.0, 0.0); 3]).is_err());
    }

    #[test]
    fn test_engine_transfer_round_trip() {
        let mut state = QBdt::<DenseEngine>::with_split(2, 1, 0, QBdtConfig::default()).unwrap();
        state.mtrx(&HADAMARD, 0).unwrap();
        state.mc_mtrx(&[0], &HADAMARD, 2).unwrap();

        let mut engine = DenseEngine::new_permutation(3, 0b111).unwrap();
        state.get_quantum_state_into(&mut engine).unwrap();
        for (got, want) in engine.amplitudes().iter().zip(state.get_quantum_state()) {
            assert_relative_eq!((got - want).norm(), 0.0, epsilon = 1e-12);
        }

        let mut copy = QBdt::<DenseEngine>::with_split(1, 2, 0, QBdtConfig::default()).unwrap();
        copy.set_quantum_state_from(&engine).unwrap();
        assert_relative_eq!(copy.sum_sqr_diff(&state).unwrap(), 0.0, epsilon = 1e-12);
        assert_eq!(copy.tree_qubit_count(), 1);
    }

    #[test]
    fn test_engine_transfer_rejects_width_mismatch() {
        let mut state = QBdt::new(2, 0).unwrap();
        let mut engine = DenseEngine::new_permutation(3, 0).unwrap();
        let mismatch = Err(QbdtError::QubitCountMismatch {
            expected: 2,
            actual: 3,
        });
        assert_eq!(state.get_quantum_state_into(&mut engine), mismatch);
        assert_eq!(state.set_quantum_state_from(&engine), mismatch);
    }

    #[test]
    fn test_sparse_state_compresses() {
        let mut amps = vec![c(0.0, 0.0); 64];
        amps[0] = c(1.0, 0.0);
        let state: QBdt<DenseEngine> = QBdt::from_amplitudes(6, &amps, QBdtConfig::default()).unwrap();
        assert_eq!(state.node_count(), 7);
    }

    #[test]
    fn test_sum_sqr_diff() {
        let mut a = QBdt::new(2, 0).unwrap();
        a.mtrx(&HADAMARD, 0).unwrap();
        let b = a.clone();
        assert_eq!(a.sum_sqr_diff(&a).unwrap(), 0.0);
        assert_relative_eq!(a.sum_sqr_diff(&b).unwrap(), 0.0, epsilon = 1e-12);

        let mut flipped = b.clone();
        flipped.mtrx(&PAULI_X, 1).unwrap();
        assert_relative_eq!(a.sum_sqr_diff(&flipped).unwrap(), 1.0, epsilon = 1e-12);

        let wider = QBdt::new(3, 0).unwrap();
        assert_eq!(a.fidelity_complement(&wider).unwrap(), 1.0);
    }

    #[test]
    fn test_probabilities_sum_to_one() {
        let mut state = QBdt::new(3, 0).unwrap();
        state.mtrx(&HADAMARD, 1).unwrap();
        let probs = state.probabilities();
        assert_relative_eq!(probs.iter().sum::<f64>(), 1.0, epsilon = 1e-12);
        assert_relative_eq!(probs[0b010], 0.5, epsilon = 1e-12);
        assert_relative_eq!(state.probability_all(0b000).unwrap(), 0.5, epsilon = 1e-12);
    }
}
