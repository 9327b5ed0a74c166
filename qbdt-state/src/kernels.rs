//! Amplitude kernels over a dense vector
//!
//! Kernels address index bits, not qubits; callers translate qubit indices
//! with [`qbdt_core::bits::qubit_bit`]. Each kernel takes a `parallel` flag
//! and fans out with rayon over independent blocks when it is set.

use num_complex::Complex64;
use qbdt_core::bits::{bit_is_set, pow2};
use qbdt_core::Matrix2;
use rayon::prelude::*;

/// Applies `gate` to the pair `(i, i | 2^target_bit)` of every index `i`
/// whose `control_mask` bits are all set.
pub fn apply_controlled_2x2(
    state: &mut [Complex64],
    gate: &Matrix2,
    target_bit: usize,
    control_mask: usize,
    parallel: bool,
) {
    let stride = pow2(target_bit);
    let block = stride * 2;

    let apply_block = |(index, chunk): (usize, &mut [Complex64])| {
        let base = index * block;
        for j in 0..stride {
            if (base + j) & control_mask != control_mask {
                continue;
            }
            let a = chunk[j];
            let b = chunk[j + stride];
            chunk[j] = gate[0][0] * a + gate[0][1] * b;
            chunk[j + stride] = gate[1][0] * a + gate[1][1] * b;
        }
    };

    if parallel {
        state.par_chunks_mut(block).enumerate().for_each(apply_block);
    } else {
        state.chunks_mut(block).enumerate().for_each(apply_block);
    }
}

/// Probability that `bit` reads 1.
pub fn probability_of_bit(state: &[Complex64], bit: usize, parallel: bool) -> f64 {
    let term = |(i, amp): (usize, &Complex64)| {
        if bit_is_set(i, bit) {
            amp.norm_sqr()
        } else {
            0.0
        }
    };
    if parallel {
        state.par_iter().enumerate().map(term).sum()
    } else {
        state.iter().enumerate().map(term).sum()
    }
}

/// Squared norm of the whole vector.
pub fn norm_sqr(state: &[Complex64], parallel: bool) -> f64 {
    if parallel {
        state.par_iter().map(|a| a.norm_sqr()).sum()
    } else {
        state.iter().map(|a| a.norm_sqr()).sum()
    }
}

/// Zeroes every amplitude whose `bit` differs from `result` and multiplies
/// the survivors by `factor`.
pub fn collapse_bit(
    state: &mut [Complex64],
    bit: usize,
    result: bool,
    factor: Complex64,
    parallel: bool,
) {
    let project = |(i, amp): (usize, &mut Complex64)| {
        if bit_is_set(i, bit) == result {
            *amp *= factor;
        } else {
            *amp = Complex64::new(0.0, 0.0);
        }
    };
    if parallel {
        state.par_iter_mut().enumerate().for_each(project);
    } else {
        state.iter_mut().enumerate().for_each(project);
    }
}

/// Probability that the bits of `mask` have odd parity.
pub fn parity_probability(state: &[Complex64], mask: usize, parallel: bool) -> f64 {
    let term = |(i, amp): (usize, &Complex64)| {
        if odd_parity(i, mask) {
            amp.norm_sqr()
        } else {
            0.0
        }
    };
    if parallel {
        state.par_iter().enumerate().map(term).sum()
    } else {
        state.iter().enumerate().map(term).sum()
    }
}

/// Zeroes every amplitude whose `mask` parity differs from `odd` and
/// multiplies the survivors by `factor`.
pub fn collapse_parity(
    state: &mut [Complex64],
    mask: usize,
    odd: bool,
    factor: Complex64,
    parallel: bool,
) {
    let project = |(i, amp): (usize, &mut Complex64)| {
        if odd_parity(i, mask) == odd {
            *amp *= factor;
        } else {
            *amp = Complex64::new(0.0, 0.0);
        }
    };
    if parallel {
        state.par_iter_mut().enumerate().for_each(project);
    } else {
        state.iter_mut().enumerate().for_each(project);
    }
}

#[inline]
fn odd_parity(index: usize, mask: usize) -> bool {
    (index & mask).count_ones() & 1 == 1
}

/// Multiplies every amplitude by `factor`.
pub fn scale(state: &mut [Complex64], factor: Complex64, parallel: bool) {
    if parallel {
        state.par_iter_mut().for_each(|a| *a *= factor);
    } else {
        state.iter_mut().for_each(|a| *a *= factor);
    }
}

/// Exchanges the values of two index bits.
pub fn swap_bits(state: &mut [Complex64], bit_a: usize, bit_b: usize) {
    if bit_a == bit_b {
        return;
    }
    let mask_a = pow2(bit_a);
    let mask_b = pow2(bit_b);
    for i in 0..state.len() {
        if i & mask_a != 0 && i & mask_b == 0 {
            state.swap(i, i ^ mask_a ^ mask_b);
        }
    }
}

/// Kronecker product with `high` on the most significant bits.
pub fn kron(high: &[Complex64], low: &[Complex64], parallel: bool) -> Vec<Complex64> {
    let width = low.len();
    let mut out = vec![Complex64::new(0.0, 0.0); high.len() * width];
    let fill = |(i, chunk): (usize, &mut [Complex64])| {
        let h = high[i];
        for (slot, l) in chunk.iter_mut().zip(low) {
            *slot = h * l;
        }
    };
    if parallel {
        out.par_chunks_mut(width).enumerate().for_each(fill);
    } else {
        out.chunks_mut(width).enumerate().for_each(fill);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use qbdt_core::matrix::{HADAMARD, PAULI_X};

    fn basis(len: usize, index: usize) -> Vec<Complex64> {
        let mut v = vec![Complex64::new(0.0, 0.0); len];
        v[index] = Complex64::new(1.0, 0.0);
        v
    }

    #[test]
    fn test_hadamard_on_low_bit() {
        let mut state = basis(4, 0);
        apply_controlled_2x2(&mut state, &HADAMARD, 0, 0, false);
        assert_relative_eq!(state[0].re, std::f64::consts::FRAC_1_SQRT_2, epsilon = 1e-12);
        assert_relative_eq!(state[1].re, std::f64::consts::FRAC_1_SQRT_2, epsilon = 1e-12);
        assert_relative_eq!(state[2].norm(), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_controlled_respects_mask() {
        // |10> with control on bit 1 flips bit 0
        let mut state = basis(4, 0b10);
        apply_controlled_2x2(&mut state, &PAULI_X, 0, 0b10, true);
        assert_relative_eq!(state[0b11].re, 1.0, epsilon = 1e-12);

        // |00> is untouched
        let mut state = basis(4, 0);
        apply_controlled_2x2(&mut state, &PAULI_X, 0, 0b10, false);
        assert_relative_eq!(state[0].re, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let mut a: Vec<Complex64> = (0..64)
            .map(|i| Complex64::new((i as f64).sin(), (i as f64).cos()))
            .collect();
        let mut b = a.clone();
        apply_controlled_2x2(&mut a, &HADAMARD, 3, 0b100001, false);
        apply_controlled_2x2(&mut b, &HADAMARD, 3, 0b100001, true);
        for (x, y) in a.iter().zip(&b) {
            assert_relative_eq!(x.re, y.re, epsilon = 1e-12);
            assert_relative_eq!(x.im, y.im, epsilon = 1e-12);
        }
        assert_relative_eq!(norm_sqr(&a, false), norm_sqr(&b, true), epsilon = 1e-9);
    }

    #[test]
    fn test_swap_bits() {
        let mut state = basis(8, 0b001);
        swap_bits(&mut state, 0, 2);
        assert_relative_eq!(state[0b100].re, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_kron_order() {
        let high = basis(2, 1);
        let low = basis(4, 2);
        let out = kron(&high, &low, false);
        assert_eq!(out.len(), 8);
        assert_relative_eq!(out[0b110].re, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_collapse_bit() {
        let h = Complex64::new(0.5, 0.0);
        let mut state = vec![h; 4];
        collapse_bit(&mut state, 1, true, Complex64::new(2.0_f64.sqrt(), 0.0), false);
        assert_relative_eq!(state[0].norm(), 0.0, epsilon = 1e-12);
        assert_relative_eq!(probability_of_bit(&state, 1, false), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_parity_collapse() {
        let h = Complex64::new(0.5, 0.0);
        let mut state = vec![h; 4];
        assert_relative_eq!(parity_probability(&state, 0b11, false), 0.5, epsilon = 1e-12);
        assert_relative_eq!(parity_probability(&state, 0, true), 0.0, epsilon = 1e-12);

        collapse_parity(&mut state, 0b11, true, Complex64::new(2.0_f64.sqrt(), 0.0), true);
        assert_relative_eq!(state[0b00].norm(), 0.0, epsilon = 1e-12);
        assert_relative_eq!(state[0b11].norm(), 0.0, epsilon = 1e-12);
        assert_relative_eq!(state[0b01].re, std::f64::consts::FRAC_1_SQRT_2, epsilon = 1e-12);
        assert_relative_eq!(parity_probability(&state, 0b11, false), 1.0, epsilon = 1e-12);
    }
}
