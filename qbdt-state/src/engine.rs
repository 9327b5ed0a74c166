//! Interface of the dense engines that hang below the deepest tree level

use num_complex::Complex64;
use qbdt_core::{Matrix2, Result};
use std::fmt::Debug;

/// A self-contained state over a small register, attached to tree leaves.
///
/// Engines use the same most-significant-first qubit order as the tree: qubit
/// 0 of an engine is the highest bit of its basis index. Leaves share engines
/// through `Arc` and privatize them with `Arc::make_mut`, so every engine is
/// cheap to clone and safe to read from many threads.
///
/// Engines hold unit-norm vectors while attached. The tree keeps the
/// magnitude in the leaf scale.
pub trait AttachedEngine: Clone + Debug + Send + Sync + 'static {
    /// Basis state `perm` over `num_qubits` qubits.
    fn new_permutation(num_qubits: usize, perm: usize) -> Result<Self>;

    /// Engine holding a copy of `amplitudes`, which must have `2^num_qubits` entries.
    fn from_amplitudes(num_qubits: usize, amplitudes: &[Complex64]) -> Result<Self>;

    fn qubit_count(&self) -> usize;

    /// `2^qubit_count`
    fn max_index(&self) -> usize {
        1usize << self.qubit_count()
    }

    fn get_amplitude(&self, index: usize) -> Result<Complex64>;

    fn set_amplitude(&mut self, index: usize, value: Complex64) -> Result<()>;

    /// Copy of the full amplitude vector.
    fn amplitudes(&self) -> Vec<Complex64>;

    /// Applies `matrix` to `qubit`.
    fn apply_matrix(&mut self, matrix: &Matrix2, qubit: usize) -> Result<()>;

    /// Applies `matrix` to `target` where every qubit in `controls` is 1.
    fn apply_controlled_matrix(
        &mut self,
        controls: &[usize],
        matrix: &Matrix2,
        target: usize,
    ) -> Result<()>;

    /// Probability that `qubit` reads 1.
    fn probability(&self, qubit: usize) -> Result<f64>;

    /// Measures `qubit`, forcing `result` when given.
    ///
    /// With `apply` set the engine collapses onto the outcome and renormalizes.
    fn force_measure(
        &mut self,
        qubit: usize,
        result: Option<bool>,
        rng: &mut dyn FnMut() -> f64,
        apply: bool,
    ) -> Result<bool>;

    /// Measures the parity of the basis-index bits in `mask`, forcing
    /// `result` when given, and collapses onto the outcome.
    ///
    /// Returns `true` for odd parity. Bit `b` of `mask` is qubit
    /// `qubit_count() - 1 - b`.
    fn force_measure_parity(
        &mut self,
        mask: usize,
        result: Option<bool>,
        rng: &mut dyn FnMut() -> f64,
    ) -> Result<bool>;

    /// Measures every qubit and collapses onto the sampled basis state.
    fn measure_all(&mut self, rng: &mut dyn FnMut() -> f64) -> usize;

    /// Appends `other`'s qubits after this engine's qubits.
    ///
    /// Returns the index of the first appended qubit.
    fn compose(&mut self, other: &Self) -> Result<usize>;

    /// Splits off qubits `[start, start + length)` into a new engine.
    ///
    /// The range is assumed separable from the rest. Both this engine and the
    /// returned one are left normalized.
    fn decompose(&mut self, start: usize, length: usize) -> Result<Self>;

    /// Exchanges two qubits.
    fn swap(&mut self, qubit_a: usize, qubit_b: usize) -> Result<()>;

    /// Squared norm of the state.
    fn norm(&self) -> f64;

    /// Rescales to unit norm. A zero vector is left unchanged.
    fn normalize(&mut self);

    /// Multiplies every amplitude by `factor`.
    fn scale_amplitudes(&mut self, factor: Complex64);

    /// `<self|other>`
    fn inner_product(&self, other: &Self) -> Result<Complex64> {
        let ours = self.amplitudes();
        let theirs = other.amplitudes();
        if ours.len() != theirs.len() {
            return Err(qbdt_core::QbdtError::QubitCountMismatch {
                expected: self.qubit_count(),
                actual: other.qubit_count(),
            });
        }
        Ok(ours.iter().zip(&theirs).map(|(a, b)| a.conj() * b).sum())
    }
}
