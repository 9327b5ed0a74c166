//! Error types shared by the tree and its attached engines

use thiserror::Error;

/// Errors that can occur while building or manipulating a quantum state
#[derive(Error, Debug, Clone, PartialEq)]
pub enum QbdtError {
    /// Qubit index outside the register
    #[error("Invalid qubit index {index} for {num_qubits}-qubit state")]
    InvalidQubitIndex { index: usize, num_qubits: usize },

    /// Basis index or amplitude buffer of the wrong size
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Qubit range that does not fit in the register
    #[error("Invalid qubit range [{start}, {start}+{length}) for {num_qubits}-qubit state")]
    InvalidRange {
        start: usize,
        length: usize,
        num_qubits: usize,
    },

    /// Two states that must have the same width do not
    #[error("Qubit count mismatch: expected {expected}, got {actual}")]
    QubitCountMismatch { expected: usize, actual: usize },

    /// Forced measurement outcome with zero probability
    #[error("Cannot force qubit {qubit} to {result}: outcome has zero probability")]
    ImpossibleOutcome { qubit: usize, result: bool },

    /// Forced parity outcome with zero probability
    #[error("Cannot force parity of mask {mask:#b} to {result}: outcome has zero probability")]
    ImpossibleParity { mask: usize, result: bool },

    /// Register wider than the representation supports
    #[error("{num_qubits} qubits requested, at most {max} supported")]
    TooManyQubits { num_qubits: usize, max: usize },

    /// Any other malformed argument
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

/// Result type for qbdt operations
pub type Result<T> = std::result::Result<T, QbdtError>;

/// Checks that `qubit` addresses one of `num_qubits` qubits.
#[inline]
pub fn check_qubit(qubit: usize, num_qubits: usize) -> Result<()> {
    if qubit >= num_qubits {
        return Err(QbdtError::InvalidQubitIndex {
            index: qubit,
            num_qubits,
        });
    }
    Ok(())
}

/// Checks that `[start, start + length)` lies inside a `num_qubits` register.
#[inline]
pub fn check_range(start: usize, length: usize, num_qubits: usize) -> Result<()> {
    match start.checked_add(length) {
        Some(end) if end <= num_qubits => Ok(()),
        _ => Err(QbdtError::InvalidRange {
            start,
            length,
            num_qubits,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_qubit() {
        assert!(check_qubit(2, 3).is_ok());
        assert_eq!(
            check_qubit(3, 3),
            Err(QbdtError::InvalidQubitIndex {
                index: 3,
                num_qubits: 3
            })
        );
    }

    #[test]
    fn test_check_range() {
        assert!(check_range(1, 2, 3).is_ok());
        assert!(check_range(3, 0, 3).is_ok());
        assert!(check_range(2, 2, 3).is_err());
        assert!(check_range(usize::MAX, 2, 3).is_err());
    }

    #[test]
    fn test_error_display() {
        let err = QbdtError::ImpossibleOutcome {
            qubit: 1,
            result: true,
        };
        assert_eq!(
            err.to_string(),
            "Cannot force qubit 1 to true: outcome has zero probability"
        );
    }
}
