//! # qbdt-core
//!
//! Shared vocabulary for the qbdt quantum state engine: the error type,
//! 2x2 operator matrices, basis-index arithmetic and random sources.
//!
//! Amplitudes are [`Complex64`]. A value is treated as zero when its squared
//! magnitude is at or below [`NORM_EPSILON`]; every component uses this one
//! threshold.

pub mod bits;
pub mod error;
pub mod matrix;
pub mod random;

pub use error::{QbdtError, Result};
pub use matrix::{Matrix2, MatrixKind};
pub use num_complex::Complex64;
pub use random::{RandomSource, SharedRandom};

/// Squared-magnitude floor below which an amplitude or scale counts as zero.
pub const NORM_EPSILON: f64 = 1e-24;

pub const ZERO: Complex64 = Complex64::new(0.0, 0.0);
pub const ONE: Complex64 = Complex64::new(1.0, 0.0);

/// Whether `value` is zero under [`NORM_EPSILON`].
#[inline]
pub fn is_norm_zero(value: Complex64) -> bool {
    value.norm_sqr() <= NORM_EPSILON
}

/// Whether `a` and `b` agree under [`NORM_EPSILON`].
#[inline]
pub fn approx_eq(a: Complex64, b: Complex64) -> bool {
    is_norm_zero(a - b)
}

/// Clamps a probability computed with rounding error into `[0, 1]`.
#[inline]
pub fn clamp_probability(p: f64) -> f64 {
    p.clamp(0.0, 1.0)
}

/// Unit-magnitude phase of `value`, or 1 when `value` is zero.
#[inline]
pub fn unit_phase(value: Complex64) -> Complex64 {
    if is_norm_zero(value) {
        ONE
    } else {
        value / value.norm()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_norm_zero_threshold() {
        assert!(is_norm_zero(Complex64::new(1e-13, 0.0)));
        assert!(!is_norm_zero(Complex64::new(1e-11, 0.0)));
    }

    #[test]
    fn test_unit_phase() {
        let p = unit_phase(Complex64::new(0.0, -3.0));
        assert_relative_eq!(p.im, -1.0, epsilon = 1e-12);
        assert_eq!(unit_phase(ZERO), ONE);
    }
}
