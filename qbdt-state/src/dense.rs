//! Dense state-vector engine
//!
//! [`DenseEngine`] is the default [`AttachedEngine`]: a plain `Vec` of
//! amplitudes driven by the kernels in [`crate::kernels`].

use crate::engine::AttachedEngine;
use crate::kernels;
use num_complex::Complex64;
use qbdt_core::bits::{pow2, pow2_mask, qubit_bit};
use qbdt_core::error::{check_qubit, check_range};
use qbdt_core::{unit_phase, Matrix2, QbdtError, Result, NORM_EPSILON, ONE, ZERO};
use tracing::trace;

/// Widest register a dense engine will allocate.
pub const MAX_ENGINE_QUBITS: usize = 30;

/// Vector length from which kernels run on the rayon pool.
pub const DEFAULT_PARALLEL_THRESHOLD: usize = 1 << 14;

/// Dense quantum state over a small register
///
/// # Example
///
/// ```
/// use qbdt_state::{AttachedEngine, DenseEngine};
/// use qbdt_core::matrix::HADAMARD;
///
/// let mut engine = DenseEngine::new_permutation(2, 0).unwrap();
/// engine.apply_matrix(&HADAMARD, 0).unwrap();
/// assert!((engine.probability(0).unwrap() - 0.5).abs() < 1e-12);
/// assert!(engine.probability(1).unwrap() < 1e-12);
/// ```
#[derive(Debug, Clone)]
pub struct DenseEngine {
    num_qubits: usize,
    amplitudes: Vec<Complex64>,
    parallel_threshold: usize,
}

impl DenseEngine {
    fn check_width(num_qubits: usize) -> Result<()> {
        if num_qubits > MAX_ENGINE_QUBITS {
            return Err(QbdtError::TooManyQubits {
                num_qubits,
                max: MAX_ENGINE_QUBITS,
            });
        }
        Ok(())
    }

    /// Overrides the vector length from which kernels run in parallel.
    pub fn with_parallel_threshold(mut self, threshold: usize) -> Self {
        self.parallel_threshold = threshold;
        self
    }

    #[inline]
    fn parallel(&self) -> bool {
        self.amplitudes.len() >= self.parallel_threshold
    }

    /// Read-only view of the amplitudes.
    #[inline]
    pub fn as_slice(&self) -> &[Complex64] {
        &self.amplitudes
    }

    fn check_index(&self, index: usize) -> Result<()> {
        if index >= self.amplitudes.len() {
            return Err(QbdtError::DimensionMismatch {
                expected: self.amplitudes.len(),
                actual: index + 1,
            });
        }
        Ok(())
    }

    fn collapse(&mut self, qubit: usize, result: bool, probability: f64) {
        let bit = qubit_bit(qubit, self.num_qubits);
        let factor = Complex64::new(1.0 / probability.sqrt(), 0.0);
        let parallel = self.parallel();
        kernels::collapse_bit(&mut self.amplitudes, bit, result, factor, parallel);
    }
}

impl AttachedEngine for DenseEngine {
    fn new_permutation(num_qubits: usize, perm: usize) -> Result<Self> {
        Self::check_width(num_qubits)?;
        let len = pow2(num_qubits);
        if perm >= len {
            return Err(QbdtError::DimensionMismatch {
                expected: len,
                actual: perm + 1,
            });
        }
        let mut amplitudes = vec![ZERO; len];
        amplitudes[perm] = ONE;
        Ok(Self {
            num_qubits,
            amplitudes,
            parallel_threshold: DEFAULT_PARALLEL_THRESHOLD,
        })
    }

    fn from_amplitudes(num_qubits: usize, amplitudes: &[Complex64]) -> Result<Self> {
        Self::check_width(num_qubits)?;
        let len = pow2(num_qubits);
        if amplitudes.len() != len {
            return Err(QbdtError::DimensionMismatch {
                expected: len,
                actual: amplitudes.len(),
            });
        }
        Ok(Self {
            num_qubits,
            amplitudes: amplitudes.to_vec(),
            parallel_threshold: DEFAULT_PARALLEL_THRESHOLD,
        })
    }

    #[inline]
    fn qubit_count(&self) -> usize {
        self.num_qubits
    }

    fn get_amplitude(&self, index: usize) -> Result<Complex64> {
        self.check_index(index)?;
        Ok(self.amplitudes[index])
    }

    fn set_amplitude(&mut self, index: usize, value: Complex64) -> Result<()> {
        self.check_index(index)?;
        self.amplitudes[index] = value;
        Ok(())
    }

    fn amplitudes(&self) -> Vec<Complex64> {
        self.amplitudes.clone()
    }

    fn apply_matrix(&mut self, matrix: &Matrix2, qubit: usize) -> Result<()> {
        self.apply_controlled_matrix(&[], matrix, qubit)
    }

    fn apply_controlled_matrix(
        &mut self,
        controls: &[usize],
        matrix: &Matrix2,
        target: usize,
    ) -> Result<()> {
        check_qubit(target, self.num_qubits)?;
        let mut control_mask = 0;
        for &control in controls {
            check_qubit(control, self.num_qubits)?;
            if control == target {
                return Err(QbdtError::InvalidArgument(format!(
                    "qubit {target} is both control and target"
                )));
            }
            control_mask |= pow2(qubit_bit(control, self.num_qubits));
        }
        let bit = qubit_bit(target, self.num_qubits);
        let parallel = self.parallel();
        kernels::apply_controlled_2x2(&mut self.amplitudes, matrix, bit, control_mask, parallel);
        Ok(())
    }

    fn probability(&self, qubit: usize) -> Result<f64> {
        check_qubit(qubit, self.num_qubits)?;
        let bit = qubit_bit(qubit, self.num_qubits);
        let p = kernels::probability_of_bit(&self.amplitudes, bit, self.parallel());
        Ok(qbdt_core::clamp_probability(p))
    }

    fn force_measure(
        &mut self,
        qubit: usize,
        result: Option<bool>,
        rng: &mut dyn FnMut() -> f64,
        apply: bool,
    ) -> Result<bool> {
        let p1 = self.probability(qubit)?;
        let outcome = match result {
            Some(forced) => {
                let p = if forced { p1 } else { 1.0 - p1 };
                if p <= NORM_EPSILON {
                    return Err(QbdtError::ImpossibleOutcome {
                        qubit,
                        result: forced,
                    });
                }
                forced
            }
            None if p1 >= 1.0 => true,
            None if p1 <= 0.0 => false,
            None => rng() <= p1,
        };
        if apply {
            let p = if outcome { p1 } else { 1.0 - p1 };
            self.collapse(qubit, outcome, p);
        }
        Ok(outcome)
    }

    fn force_measure_parity(
        &mut self,
        mask: usize,
        result: Option<bool>,
        rng: &mut dyn FnMut() -> f64,
    ) -> Result<bool> {
        if mask >= self.amplitudes.len() {
            return Err(QbdtError::DimensionMismatch {
                expected: self.amplitudes.len(),
                actual: mask + 1,
            });
        }
        let parallel = self.parallel();
        let p_odd =
            qbdt_core::clamp_probability(kernels::parity_probability(&self.amplitudes, mask, parallel));
        let outcome = match result {
            Some(forced) => {
                let p = if forced { p_odd } else { 1.0 - p_odd };
                if p <= NORM_EPSILON {
                    return Err(QbdtError::ImpossibleParity {
                        mask,
                        result: forced,
                    });
                }
                forced
            }
            None if p_odd >= 1.0 => true,
            None if p_odd <= 0.0 => false,
            None => rng() <= p_odd,
        };
        let p = if outcome { p_odd } else { 1.0 - p_odd };
        let factor = Complex64::new(1.0 / p.sqrt(), 0.0);
        kernels::collapse_parity(&mut self.amplitudes, mask, outcome, factor, parallel);
        trace!(mask, outcome, "measured parity");
        Ok(outcome)
    }

    fn measure_all(&mut self, rng: &mut dyn FnMut() -> f64) -> usize {
        let total = self.norm();
        let draw = rng() * total;
        let mut cumulative = 0.0;
        let mut outcome = None;
        let mut last_nonzero = 0;
        for (i, amp) in self.amplitudes.iter().enumerate() {
            let p = amp.norm_sqr();
            if p <= NORM_EPSILON {
                continue;
            }
            last_nonzero = i;
            cumulative += p;
            if draw < cumulative {
                outcome = Some(i);
                break;
            }
        }
        let outcome = outcome.unwrap_or(last_nonzero);
        let phase = unit_phase(self.amplitudes[outcome]);
        self.amplitudes.iter_mut().for_each(|a| *a = ZERO);
        self.amplitudes[outcome] = phase;
        outcome
    }

    fn compose(&mut self, other: &Self) -> Result<usize> {
        let start = self.num_qubits;
        let num_qubits = start + other.num_qubits;
        Self::check_width(num_qubits)?;
        let parallel = self.parallel() || other.parallel();
        self.amplitudes = kernels::kron(&self.amplitudes, &other.amplitudes, parallel);
        self.num_qubits = num_qubits;
        trace!(qubits = num_qubits, parallel, "composed dense engines");
        Ok(start)
    }

    fn decompose(&mut self, start: usize, length: usize) -> Result<Self> {
        check_range(start, length, self.num_qubits)?;
        let low_bits = self.num_qubits - start - length;
        let low_mask = pow2_mask(low_bits);
        let part_mask = pow2_mask(length);
        let compose_index = |rest: usize, part: usize| {
            ((rest >> low_bits) << (length + low_bits)) | (part << low_bits) | (rest & low_mask)
        };

        // The largest amplitude fixes one coordinate of each factor.
        let (pivot, pivot_amp) = self
            .amplitudes
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.norm_sqr().total_cmp(&b.1.norm_sqr()))
            .map(|(i, a)| (i, *a))
            .unwrap_or((0, ZERO));
        if pivot_amp.norm_sqr() <= NORM_EPSILON {
            return Err(QbdtError::InvalidArgument(
                "cannot decompose a zero state".to_string(),
            ));
        }
        let pivot_part = (pivot >> low_bits) & part_mask;
        let pivot_rest = ((pivot >> (length + low_bits)) << low_bits) | (pivot & low_mask);

        let part: Vec<Complex64> = (0..pow2(length))
            .map(|p| self.amplitudes[compose_index(pivot_rest, p)])
            .collect();
        let rest: Vec<Complex64> = (0..pow2(self.num_qubits - length))
            .map(|r| self.amplitudes[compose_index(r, pivot_part)])
            .collect();

        let mut extracted = Self::from_amplitudes(length, &part)?
            .with_parallel_threshold(self.parallel_threshold);
        extracted.normalize();
        self.num_qubits -= length;
        self.amplitudes = rest;
        self.normalize();
        trace!(start, length, pivot, "decomposed dense engine");
        Ok(extracted)
    }

    fn swap(&mut self, qubit_a: usize, qubit_b: usize) -> Result<()> {
        check_qubit(qubit_a, self.num_qubits)?;
        check_qubit(qubit_b, self.num_qubits)?;
        kernels::swap_bits(
            &mut self.amplitudes,
            qubit_bit(qubit_a, self.num_qubits),
            qubit_bit(qubit_b, self.num_qubits),
        );
        Ok(())
    }

    fn norm(&self) -> f64 {
        kernels::norm_sqr(&self.amplitudes, self.parallel())
    }

    fn normalize(&mut self) {
        let norm = self.norm();
        if norm <= NORM_EPSILON {
            return;
        }
        let factor = Complex64::new(1.0 / norm.sqrt(), 0.0);
        let parallel = self.parallel();
        kernels::scale(&mut self.amplitudes, factor, parallel);
    }

    fn scale_amplitudes(&mut self, factor: Complex64) {
        let parallel = self.parallel();
        kernels::scale(&mut self.amplitudes, factor, parallel);
    }
}
