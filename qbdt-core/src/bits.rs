//! Index arithmetic for most-significant-first qubit ordering
//!
//! Qubit 0 is the most significant bit of a basis index. In an `n`-qubit
//! register, qubit `q` lives at index bit `n - 1 - q`.

/// Widest register addressable with a `usize` basis index.
pub const MAX_QUBITS: usize = usize::BITS as usize - 1;

/// `2^exp`
#[inline]
pub const fn pow2(exp: usize) -> usize {
    1usize << exp
}

/// `2^exp - 1`
#[inline]
pub const fn pow2_mask(exp: usize) -> usize {
    pow2(exp) - 1
}

/// Index bit that carries `qubit` in a `num_qubits` register.
#[inline]
pub const fn qubit_bit(qubit: usize, num_qubits: usize) -> usize {
    num_qubits - 1 - qubit
}

/// Whether `bit` is set in `index`.
#[inline]
pub const fn bit_is_set(index: usize, bit: usize) -> bool {
    (index >> bit) & 1 == 1
}

/// Number of indices after `i` that share its bits above the low `levels`.
///
/// When a walk meets a zero subtree with `levels` levels still below it,
/// every index in that aligned block is zero and can be skipped.
#[inline]
pub const fn block_skip(i: usize, levels: usize) -> usize {
    (i | pow2_mask(levels)) - i
}

/// Number of indices after `i` that cannot satisfy `i & mask == mask`.
///
/// Also returns 0 when `i + 1` is the next match, so callers test
/// `i & mask == mask` before treating 0 as a hit.
#[inline]
pub fn mask_skip(i: usize, mask: usize) -> usize {
    let missing = mask & !i;
    if missing == 0 {
        return 0;
    }
    let high = usize::BITS as usize - 1 - missing.leading_zeros() as usize;
    let next = (((i >> high) | 1) << high) | (mask & pow2_mask(high));
    next - i - 1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_qubit_bit_is_msb_first() {
        assert_eq!(qubit_bit(0, 3), 2);
        assert_eq!(qubit_bit(2, 3), 0);
    }

    #[test]
    fn test_block_skip() {
        assert_eq!(block_skip(0b1000, 2), 3);
        assert_eq!(block_skip(0b1010, 2), 1);
        assert_eq!(block_skip(0b1011, 2), 0);
        assert_eq!(block_skip(5, 0), 0);
    }

    #[test]
    fn test_mask_skip_lands_on_next_match() {
        for mask in [0b1usize, 0b101, 0b110, 0b1001] {
            let mut i = 0;
            let mut visited = Vec::new();
            while i < 16 {
                let skip = mask_skip(i, mask);
                if skip == 0 && i & mask == mask {
                    visited.push(i);
                }
                i += skip + 1;
            }
            let expected: Vec<usize> = (0..16).filter(|i| i & mask == mask).collect();
            assert_eq!(visited, expected, "mask {mask:#b}");
        }
    }
}
