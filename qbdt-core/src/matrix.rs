//! 2x2 operator matrices and their classification
//!
//! Matrices are row-major `[[m00, m01], [m10, m11]]` acting on the
//! `(|0>, |1>)` amplitudes of one qubit.

use crate::{is_norm_zero, ONE, ZERO};
use num_complex::Complex64;

const I: Complex64 = Complex64::new(0.0, 1.0);
const NEG_I: Complex64 = Complex64::new(0.0, -1.0);
const NEG_ONE: Complex64 = Complex64::new(-1.0, 0.0);
const INV_SQRT2: f64 = std::f64::consts::FRAC_1_SQRT_2;

/// Single-qubit operator
pub type Matrix2 = [[Complex64; 2]; 2];

/// Hadamard gate matrix
/// H = 1/√2 * [[1,  1],
///             [1, -1]]
pub const HADAMARD: Matrix2 = [
    [
        Complex64::new(INV_SQRT2, 0.0),
        Complex64::new(INV_SQRT2, 0.0),
    ],
    [
        Complex64::new(INV_SQRT2, 0.0),
        Complex64::new(-INV_SQRT2, 0.0),
    ],
];

/// Pauli-X gate matrix
pub const PAULI_X: Matrix2 = [[ZERO, ONE], [ONE, ZERO]];

/// Pauli-Y gate matrix
pub const PAULI_Y: Matrix2 = [[ZERO, NEG_I], [I, ZERO]];

/// Pauli-Z gate matrix
pub const PAULI_Z: Matrix2 = [[ONE, ZERO], [ZERO, NEG_ONE]];

/// Identity gate matrix
pub const IDENTITY: Matrix2 = [[ONE, ZERO], [ZERO, ONE]];

/// S gate matrix (√Z)
pub const S_GATE: Matrix2 = [[ONE, ZERO], [ZERO, I]];

/// T gate matrix (√S)
pub const T_GATE: Matrix2 = [
    [ONE, ZERO],
    [ZERO, Complex64::new(INV_SQRT2, INV_SQRT2)],
];

/// RX(θ) = [[cos(θ/2), -i sin(θ/2)], [-i sin(θ/2), cos(θ/2)]]
pub fn rotation_x(theta: f64) -> Matrix2 {
    let (sin_val, cos_val) = (theta / 2.0).sin_cos();
    [
        [Complex64::new(cos_val, 0.0), Complex64::new(0.0, -sin_val)],
        [Complex64::new(0.0, -sin_val), Complex64::new(cos_val, 0.0)],
    ]
}

/// RY(θ) = [[cos(θ/2), -sin(θ/2)], [sin(θ/2), cos(θ/2)]]
pub fn rotation_y(theta: f64) -> Matrix2 {
    let (sin_val, cos_val) = (theta / 2.0).sin_cos();
    [
        [Complex64::new(cos_val, 0.0), Complex64::new(-sin_val, 0.0)],
        [Complex64::new(sin_val, 0.0), Complex64::new(cos_val, 0.0)],
    ]
}

/// RZ(θ) = diag(e^(-iθ/2), e^(iθ/2))
pub fn rotation_z(theta: f64) -> Matrix2 {
    let half = theta / 2.0;
    diagonal(Complex64::from_polar(1.0, -half), Complex64::from_polar(1.0, half))
}

/// P(θ) = diag(1, e^(iθ))
pub fn phase(theta: f64) -> Matrix2 {
    diagonal(ONE, Complex64::from_polar(1.0, theta))
}

/// U3(θ, φ, λ), the general single-qubit unitary
pub fn u3(theta: f64, phi: f64, lambda: f64) -> Matrix2 {
    let (sin_val, cos_val) = (theta / 2.0).sin_cos();
    [
        [
            Complex64::new(cos_val, 0.0),
            -Complex64::from_polar(sin_val, lambda),
        ],
        [
            Complex64::from_polar(sin_val, phi),
            Complex64::from_polar(cos_val, phi + lambda),
        ],
    ]
}

/// diag(top_left, bottom_right)
#[inline]
pub fn diagonal(top_left: Complex64, bottom_right: Complex64) -> Matrix2 {
    [[top_left, ZERO], [ZERO, bottom_right]]
}

/// [[0, top_right], [bottom_left, 0]]
#[inline]
pub fn anti_diagonal(top_right: Complex64, bottom_left: Complex64) -> Matrix2 {
    [[ZERO, top_right], [bottom_left, ZERO]]
}

/// Shape of a matrix, which decides how cheaply it can be applied to a tree node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatrixKind {
    /// Only the diagonal is nonzero: a per-branch phase/scale
    Diagonal,
    /// Only the off-diagonal is nonzero: a branch swap plus scale
    AntiDiagonal,
    /// Anything that mixes the two branches
    General,
}

/// Classifies `m` by which of its entries are effectively zero.
pub fn classify(m: &Matrix2) -> MatrixKind {
    if is_norm_zero(m[0][1]) && is_norm_zero(m[1][0]) {
        MatrixKind::Diagonal
    } else if is_norm_zero(m[0][0]) && is_norm_zero(m[1][1]) {
        MatrixKind::AntiDiagonal
    } else {
        MatrixKind::General
    }
}

/// Conjugate transpose
pub fn adjoint(m: &Matrix2) -> Matrix2 {
    [
        [m[0][0].conj(), m[1][0].conj()],
        [m[0][1].conj(), m[1][1].conj()],
    ]
}

/// Matrix product `a · b`
pub fn multiply(a: &Matrix2, b: &Matrix2) -> Matrix2 {
    let mut out = [[ZERO; 2]; 2];
    for (row, out_row) in out.iter_mut().enumerate() {
        for (col, entry) in out_row.iter_mut().enumerate() {
            *entry = a[row][0] * b[0][col] + a[row][1] * b[1][col];
        }
    }
    out
}

/// Applies `m` to an amplitude pair.
#[inline]
pub fn apply(m: &Matrix2, a0: Complex64, a1: Complex64) -> (Complex64, Complex64) {
    (m[0][0] * a0 + m[0][1] * a1, m[1][0] * a0 + m[1][1] * a1)
}

/// Whether `m · m†` is the identity within `epsilon`.
pub fn is_unitary(m: &Matrix2, epsilon: f64) -> bool {
    let product = multiply(m, &adjoint(m));
    product
        .iter()
        .flatten()
        .zip(IDENTITY.iter().flatten())
        .all(|(p, id)| (p - id).norm() <= epsilon)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f64::consts::PI;

    #[test]
    fn test_standard_gates_are_unitary() {
        for m in [HADAMARD, PAULI_X, PAULI_Y, PAULI_Z, S_GATE, T_GATE] {
            assert!(is_unitary(&m, 1e-12));
        }
        assert!(is_unitary(&u3(0.3, 1.1, -0.7), 1e-12));
        assert!(!is_unitary(&diagonal(ONE, Complex64::new(2.0, 0.0)), 1e-12));
    }

    #[test]
    fn test_classify() {
        assert_eq!(classify(&PAULI_Z), MatrixKind::Diagonal);
        assert_eq!(classify(&phase(0.4)), MatrixKind::Diagonal);
        assert_eq!(classify(&PAULI_X), MatrixKind::AntiDiagonal);
        assert_eq!(classify(&PAULI_Y), MatrixKind::AntiDiagonal);
        assert_eq!(classify(&HADAMARD), MatrixKind::General);
    }

    #[test]
    fn test_rotation_identities() {
        // RX(π) = -iX
        let rx = rotation_x(PI);
        assert_relative_eq!(rx[0][1].im, -1.0, epsilon = 1e-12);
        assert_relative_eq!(rx[0][0].norm(), 0.0, epsilon = 1e-12);

        // T·T = S
        let tt = multiply(&T_GATE, &T_GATE);
        assert_relative_eq!(tt[1][1].re, S_GATE[1][1].re, epsilon = 1e-12);
        assert_relative_eq!(tt[1][1].im, S_GATE[1][1].im, epsilon = 1e-12);
    }

    #[test]
    fn test_adjoint_inverts() {
        let m = u3(0.9, 0.2, 1.3);
        let product = multiply(&adjoint(&m), &m);
        assert_relative_eq!(product[0][0].re, 1.0, epsilon = 1e-12);
        assert_relative_eq!(product[0][1].norm(), 0.0, epsilon = 1e-12);
    }
}
