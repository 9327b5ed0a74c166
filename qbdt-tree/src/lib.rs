//! Quantum binary decision tree state engine
//!
//! A [`QBdt`] stores an `n`-qubit state as a weighted binary tree. Each level
//! decides one qubit, each edge carries a complex scale, and the amplitude of
//! a basis state is the product of the scales along its path. Identical
//! subtrees are shared, so states with little entanglement, many zero
//! amplitudes or repeated structure stay small.
//!
//! The last qubits of a register can be handed to dense engines attached at
//! the leaves ([`AttachedEngine`], default [`DenseEngine`]). A state that
//! stops compressing well can fall back to a single dense engine.
//!
//! # Traversal
//!
//! Gates, measurements and full-vector reads walk the basis index space with
//! a skip-ahead driver: a visit that lands below a zero subtree, or on an
//! index whose controls are not all set, skips the whole aligned block. Wide
//! walks run in chunks on the rayon pool.
//!
//! # Example
//!
//! ```
//! use qbdt_tree::QBdt;
//! use qbdt_core::matrix::HADAMARD;
//! use qbdt_core::ONE;
//!
//! let mut state = QBdt::new(3, 0).unwrap();
//! state.mtrx(&HADAMARD, 0).unwrap();
//! state.mc_invert(&[0], ONE, ONE, 1).unwrap();
//! state.mc_invert(&[1], ONE, ONE, 2).unwrap();
//!
//! assert!((state.prob(2).unwrap() - 0.5).abs() < 1e-12);
//! // GHZ states share one subtree per level
//! assert!(state.node_count() <= 7);
//! ```

pub mod config;
mod memo;
mod node;
mod qbdt;
mod traversal;

pub use config::QBdtConfig;
pub use qbdt::{QBdt, TreeStats};
pub use qbdt_core::{Complex64, Matrix2, QbdtError, Result};
pub use qbdt_state::{AttachedEngine, DenseEngine};
